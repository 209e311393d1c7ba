use std::net::SocketAddr;

use crate::commands::Command;

// ── Sync metrics ────────────────────────────────────────────────

/// Counter: total sync attempts. Labels: status (applied/failed).
pub const SYNCS_TOTAL: &str = "roomclerk_syncs_total";

/// Histogram: successful sync duration in seconds.
pub const SYNC_DURATION_SECONDS: &str = "roomclerk_sync_duration_seconds";

/// Counter: feed events dropped because they would not parse.
pub const PARSE_ERRORS_TOTAL: &str = "roomclerk_parse_errors_total";

/// Gauge: bookings currently in the active (future-ending) view.
pub const BOOKINGS_ACTIVE: &str = "roomclerk_bookings_active";

// ── Command and chat metrics ────────────────────────────────────

/// Counter: slash/chat commands dispatched. Labels: command.
pub const COMMANDS_TOTAL: &str = "roomclerk_commands_total";

/// Counter: webhook requests rejected for a bad shared secret.
pub const AUTH_FAILURES_TOTAL: &str = "roomclerk_auth_failures_total";

/// Counter: daily digests broadcast.
pub const DIGESTS_TOTAL: &str = "roomclerk_digests_total";

/// Counter: channel topics actually rewritten.
pub const TOPIC_UPDATES_TOTAL: &str = "roomclerk_topic_updates_total";

/// Counter: individual chat deliveries that failed (fan-out continues).
pub const CHAT_DELIVERY_FAILURES_TOTAL: &str = "roomclerk_chat_delivery_failures_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::List => "list",
        Command::Help => "help",
        Command::Book(_) => "book",
    }
}
