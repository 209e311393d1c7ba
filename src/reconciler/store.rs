use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::model::{Booking, ChangeSummary};

/// Authoritative booking state plus its derived views. Owned by the
/// Reconciler; mutated only while its writer holds the store lock.
#[derive(Debug, Default)]
pub struct Store {
    /// Superset of what is visible: past bookings stay until the provider
    /// reports them deleted.
    by_id: HashMap<String, Booking>,
    /// Ascending by `(start, id)`, only bookings whose `end` was still in the
    /// future at the last rebuild.
    active: Vec<Booking>,
    next: Option<Booking>,
    cursor: Option<String>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    /// Replace the cursor with the provider's returned token. An empty token
    /// clears it, forcing the next fetch to be a full one.
    pub fn set_cursor(&mut self, token: &str) {
        self.cursor = if token.is_empty() {
            None
        } else {
            Some(token.to_string())
        };
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn active(&self) -> &[Booking] {
        &self.active
    }

    pub fn next(&self) -> Option<&Booking> {
        self.next.as_ref()
    }

    /// Drop everything, cursor included. Used when the provider rejects the
    /// cursor and the feed must be re-read from scratch.
    pub fn clear(&mut self) {
        self.by_id.clear();
        self.active.clear();
        self.next = None;
        self.cursor = None;
    }

    /// Apply one event's candidate: `Some` upserts, `None` removes. Removing
    /// an unknown id still counts as deleted so replays stay no-op idempotent.
    pub fn apply(&mut self, id: &str, candidate: Option<Booking>, summary: &mut ChangeSummary) {
        match candidate {
            None => {
                self.by_id.remove(id);
                summary.deleted += 1;
            }
            Some(booking) => {
                if self.by_id.insert(booking.id.clone(), booking).is_some() {
                    summary.updated += 1;
                } else {
                    summary.added += 1;
                }
            }
        }
    }

    /// Rebuild the sorted active view and `next` from scratch. Returns true
    /// if `next` changed: a different booking id, or presence flipped.
    pub fn rebuild(&mut self, now: DateTime<Utc>) -> bool {
        let mut active: Vec<Booking> = self
            .by_id
            .values()
            .filter(|b| b.end > now)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));

        let next = active.first().cloned();
        let changed = match (&self.next, &next) {
            (None, None) => false,
            (Some(before), Some(after)) => before.id != after.id,
            _ => true,
        };

        self.active = active;
        self.next = next;
        changed
    }
}
