use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use roomclerk::bot::Bot;
use roomclerk::config::Config;
use roomclerk::gateway::{ChatGateway, SlackGateway};
use roomclerk::provider::GoogleCalendar;
use roomclerk::{observability, webhook};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    // Any config problem is fatal: no partial startup.
    let config = Config::load()?;
    observability::init(config.metrics_port);

    let provider = Arc::new(GoogleCalendar::new(
        config.calendar_id.clone(),
        config.calendar_token.clone(),
    )?);
    let gateway = Arc::new(SlackGateway::new(config.slack_token.clone())?);

    let calendar_id = config.calendar_id.clone();
    let timezone = config.timezone;
    let port = config.port;
    let bot = Arc::new(Bot::new(config, provider, gateway.clone()));

    // First sync carries no cursor and fetches everything from now forward.
    // A provider that cannot be reached at startup is fatal too.
    bot.reconciler().sync().await?;
    let loaded = bot.reconciler().snapshot().await.active.len();
    bot.announce_topic().await;

    let events = gateway.subscribe();
    tokio::spawn(gateway.clone().run_session());
    tokio::spawn(bot.clone().run(events));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("roomclerk listening on {addr}");
    info!("  calendar: {calendar_id}");
    info!("  timezone: {timezone}");
    info!("  active bookings: {loaded}");

    axum::serve(listener, webhook::router(bot))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("roomclerk stopped");
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM. In-flight syncs are simply abandoned; the
/// no-partial-application rule makes that safe.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
