use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;

use crate::model::local_at;

/// Owns the daily-digest deadline. No booking state lives here, only
/// timestamps; the bot loop supplies the clock on every tick.
#[derive(Debug)]
pub struct Scheduler {
    next_digest: DateTime<Utc>,
}

impl Scheduler {
    /// The first deadline is *today* at the digest hour in the display zone.
    /// Starting after that hour means one digest fires on the first tick.
    pub fn new(tz: Tz, digest_hour: u32, now: DateTime<Utc>) -> Self {
        let today = now.with_timezone(&tz).date_naive();
        Self {
            next_digest: local_at(today, digest_hour, tz),
        }
    }

    pub fn next_digest(&self) -> DateTime<Utc> {
        self.next_digest
    }

    /// True at most once per passing of the deadline. The deadline advances
    /// in whole 24h steps until it is in the future again, so a process that
    /// slept across several days owes exactly one catch-up digest.
    pub fn digest_due(&mut self, now: DateTime<Utc>) -> bool {
        if now <= self.next_digest {
            return false;
        }
        while self.next_digest <= now {
            self.next_digest += Duration::hours(24);
        }
        true
    }
}
