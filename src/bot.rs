use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use crate::commands::{self, Command};
use crate::config::Config;
use crate::gateway::{self, ChatGateway, GatewayEvent, Message, TopicWriter};
use crate::observability;
use crate::provider::{CalendarProvider, parse_event};
use crate::reconciler::Reconciler;
use crate::scheduler::Scheduler;

/// Composition root: wires the reconciler, the chat gateway, and the
/// dispatcher together, and runs the event loop that drives the cadences.
pub struct Bot {
    config: Config,
    provider: Arc<dyn CalendarProvider>,
    gateway: Arc<dyn ChatGateway>,
    reconciler: Reconciler,
    topics: TopicWriter,
}

impl Bot {
    pub fn new(
        config: Config,
        provider: Arc<dyn CalendarProvider>,
        gateway: Arc<dyn ChatGateway>,
    ) -> Self {
        let reconciler = Reconciler::new(provider.clone(), config.calendar_id.clone());
        Self {
            config,
            provider,
            gateway,
            reconciler,
            topics: TopicWriter::new(),
        }
    }

    pub fn slash_token(&self) -> &str {
        &self.config.slash_token
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    // ── Command dispatch ─────────────────────────────────

    /// Single entry for inbound commands, whether they arrived over the
    /// webhook or the chat session.
    pub async fn dispatch(&self, _channel: &str, user: &str, text: &str) -> Message {
        let command = commands::parse(text);
        metrics::counter!(
            observability::COMMANDS_TOTAL,
            "command" => observability::command_label(&command)
        )
        .increment(1);

        match command {
            Command::Help => commands::render_help(),
            Command::List => {
                let snapshot = self.reconciler.snapshot().await;
                commands::render_list(
                    &snapshot,
                    &self.config.calendar_id,
                    self.config.timezone,
                    Utc::now(),
                )
            }
            Command::Book(text) => self.book(user, &text).await,
        }
    }

    /// Quick-add through the provider, then an immediate out-of-band sync so
    /// the new booking shows up in `list` without waiting for the next tick.
    async fn book(&self, user: &str, text: &str) -> Message {
        let raw = match self.provider.quick_add(&format!("{user}: {text}")).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("quick add rejected: {e}");
                return commands::render_book_failed();
            }
        };

        let label = parse_event(&self.config.calendar_id, &raw)
            .ok()
            .flatten()
            .map(|booking| booking.time_label(Utc::now(), self.config.timezone));

        match self.reconciler.sync().await {
            Ok(outcome) if outcome.next_changed => self.announce_topic().await,
            Ok(_) => {}
            Err(e) => warn!("post-booking sync failed: {e}"),
        }

        commands::render_booked(label)
    }

    // ── Side effects ─────────────────────────────────────

    /// Push the next-booking topic to every channel. Channels already showing
    /// it are skipped by the writer's cache.
    pub async fn announce_topic(&self) {
        let snapshot = self.reconciler.snapshot().await;
        let topic = commands::topic_text(snapshot.next.as_ref(), self.config.timezone, Utc::now());
        self.topics.set_all(self.gateway.as_ref(), &topic).await;
    }

    /// Broadcast the daily digest: the same today/tomorrow view `list` renders.
    pub async fn broadcast_digest(&self) {
        let snapshot = self.reconciler.snapshot().await;
        let message = commands::render_list(
            &snapshot,
            &self.config.calendar_id,
            self.config.timezone,
            Utc::now(),
        );
        gateway::broadcast_message(self.gateway.as_ref(), &message).await;
        metrics::counter!(observability::DIGESTS_TOTAL).increment(1);
    }

    /// One resync tick: sync, react to a changed head, then check the digest
    /// deadline. A failed sync leaves everything untouched and the next tick
    /// doubles as the retry.
    async fn tick(&self, scheduler: &mut Scheduler) {
        match self.reconciler.sync().await {
            Ok(outcome) => {
                if outcome.next_changed {
                    self.announce_topic().await;
                }
            }
            Err(e) => {
                error!("sync failed: {e}");
                return;
            }
        }

        if scheduler.digest_due(Utc::now()) {
            info!("daily digest due, broadcasting");
            self.broadcast_digest().await;
        }
    }

    // ── Event loop ───────────────────────────────────────

    /// Run the bot loop: gateway session events plus the resync tick. Ticks
    /// fire only while the session is connected.
    pub async fn run(self: Arc<Self>, mut events: broadcast::Receiver<GatewayEvent>) {
        let mut scheduler = Scheduler::new(self.config.timezone, self.config.digest_hour, Utc::now());
        info!("next daily digest scheduled for {}", scheduler.next_digest());

        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.sync_interval_secs.max(1)));
        // A session that reconnects after a gap gets one tick, not a burst.
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut connected = false;

        loop {
            tokio::select! {
                _ = ticker.tick(), if connected => self.tick(&mut scheduler).await,
                event = events.recv() => match event {
                    Ok(GatewayEvent::Connected) => {
                        info!("chat session connected, resuming resync");
                        connected = true;
                    }
                    Ok(GatewayEvent::Disconnected) => {
                        info!("chat session disconnected, pausing resync");
                        connected = false;
                    }
                    Ok(GatewayEvent::Message { channel, user, text }) => {
                        let reply = self.dispatch(&channel, &user, &text).await;
                        if let Err(e) = self.gateway.post_message(&channel, &reply).await {
                            warn!("reply to {channel} failed: {e}");
                        }
                    }
                    Ok(GatewayEvent::Error(e)) => warn!("gateway error: {e}"),
                    Ok(GatewayEvent::Other) => {}
                    Err(RecvError::Lagged(missed)) => {
                        warn!("gateway event stream lagged, {missed} events dropped");
                    }
                    Err(RecvError::Closed) => {
                        info!("gateway event stream closed, stopping bot loop");
                        return;
                    }
                },
            }
        }
    }
}
