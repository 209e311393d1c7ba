mod store;
#[cfg(test)]
mod tests;

pub use store::Store;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::model::{Booking, ChangeSummary};
use crate::observability;
use crate::provider::{CalendarProvider, EventPage, ProviderError, parse_event};

/// What one sync did, and whether the "next booking" changed with it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub summary: ChangeSummary,
    pub next_changed: bool,
}

/// A read-only view of the last-committed booking state.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub active: Vec<Booking>,
    pub next: Option<Booking>,
}

/// Merges the provider's event feed into the booking store and keeps the
/// derived views consistent. All mutation funnels through `sync`, which holds
/// `gate` for its whole duration, so at most one sync is ever in flight;
/// concurrent callers queue behind it.
pub struct Reconciler {
    provider: Arc<dyn CalendarProvider>,
    calendar_id: String,
    store: RwLock<Store>,
    gate: Mutex<()>,
}

impl Reconciler {
    pub fn new(provider: Arc<dyn CalendarProvider>, calendar_id: String) -> Self {
        Self {
            provider,
            calendar_id,
            store: RwLock::new(Store::new()),
            gate: Mutex::new(()),
        }
    }

    /// Clone of the committed state. Rebuilds happen under the store's write
    /// lock, so a snapshot never observes a store mid-rebuild.
    pub async fn snapshot(&self) -> Snapshot {
        let store = self.store.read().await;
        Snapshot {
            active: store.active().to_vec(),
            next: store.next().cloned(),
        }
    }

    pub async fn sync(&self) -> Result<SyncOutcome, ProviderError> {
        self.sync_at(Utc::now()).await
    }

    /// Sync against an explicit clock. On any provider failure the store and
    /// cursor are left exactly as they were: the fetch completes before any
    /// state is touched, so there is no partial application to undo.
    pub async fn sync_at(&self, now: DateTime<Utc>) -> Result<SyncOutcome, ProviderError> {
        let _serialized = self.gate.lock().await;

        let cursor = self.store.read().await.cursor().map(str::to_string);
        let started = std::time::Instant::now();

        let (page, cursor_was_rejected) =
            match self.provider.list_events(cursor.as_deref(), now).await {
                Ok(page) => (page, false),
                Err(ProviderError::CursorGone) => {
                    // The provider no longer honors our cursor. Everything
                    // derived from it is suspect; re-read the feed from scratch.
                    warn!("sync cursor rejected by provider, falling back to a full fetch");
                    match self.provider.list_events(None, now).await {
                        Ok(page) => (page, true),
                        Err(e) => {
                            metrics::counter!(observability::SYNCS_TOTAL, "status" => "failed")
                                .increment(1);
                            return Err(e);
                        }
                    }
                }
                Err(e) => {
                    metrics::counter!(observability::SYNCS_TOTAL, "status" => "failed")
                        .increment(1);
                    return Err(e);
                }
            };

        let outcome = self.apply(page, cursor_was_rejected, now).await;
        metrics::counter!(observability::SYNCS_TOTAL, "status" => "applied").increment(1);
        metrics::histogram!(observability::SYNC_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        Ok(outcome)
    }

    /// Commit one fetched page. The write lock is held across apply and
    /// rebuild so readers only ever see committed state.
    async fn apply(&self, page: EventPage, reset: bool, now: DateTime<Utc>) -> SyncOutcome {
        let mut store = self.store.write().await;
        if reset {
            store.clear();
        }

        let mut summary = ChangeSummary::default();
        for raw in &page.events {
            let candidate = match parse_event(&self.calendar_id, raw) {
                Ok(candidate) => candidate,
                Err(e) => {
                    // A malformed event never aborts the batch; it is treated
                    // as absent and dropped.
                    warn!("skipping malformed event: {e}");
                    metrics::counter!(observability::PARSE_ERRORS_TOTAL).increment(1);
                    None
                }
            };
            store.apply(&raw.id, candidate, &mut summary);
        }

        store.set_cursor(&page.next_cursor);
        let next_changed = store.rebuild(now);
        metrics::gauge!(observability::BOOKINGS_ACTIVE).set(store.active().len() as f64);

        if !summary.is_empty() {
            info!(
                "calendar delta: {} added, {} updated, {} deleted ({} tracked)",
                summary.added,
                summary.updated,
                summary.deleted,
                store.len()
            );
        }

        SyncOutcome {
            summary,
            next_changed,
        }
    }
}
