use chrono::offset::LocalResult;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// A single meeting-room booking, mirrored from the calendar provider.
/// `id` is the provider's opaque event id and the primary key everywhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub calendar_id: String,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Booking {
    /// True iff `start` falls in the half-open range `[range_start, range_end)`.
    pub fn is_within(&self, range_start: DateTime<Utc>, range_end: DateTime<Utc>) -> bool {
        self.start >= range_start && self.start < range_end
    }

    /// Friendly time label relative to `now`, rendered in the display zone:
    /// "Today from 1:00 to 2:00pm", "Tomorrow from …", "Sat Mar 7 from …".
    pub fn time_label(&self, now: DateTime<Utc>, tz: Tz) -> String {
        let start = self.start.with_timezone(&tz);
        let end = self.end.with_timezone(&tz);
        let today = now.with_timezone(&tz).date_naive();

        let day = if start.date_naive() == today {
            "Today".to_string()
        } else if Some(start.date_naive()) == today.succ_opt() {
            "Tomorrow".to_string()
        } else {
            start.format("%a %b %-d").to_string()
        };

        format!(
            "{day} from {} to {}",
            start.format("%-I:%M"),
            end.format("%-I:%M%P")
        )
    }
}

/// Counts of bookings touched by one sync batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    pub added: u64,
    pub updated: u64,
    pub deleted: u64,
}

impl ChangeSummary {
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.updated == 0 && self.deleted == 0
    }
}

/// Resolve a wall-clock hour on `date` in `tz` to an instant. Ambiguous local
/// times (DST fall-back) take the earlier offset; nonexistent ones (DST gap)
/// resolve to the first valid time after the gap.
pub fn local_at(date: NaiveDate, hour: u32, tz: Tz) -> DateTime<Utc> {
    let naive = date
        .and_hms_opt(hour, 0, 0)
        .unwrap_or_else(|| date.and_time(NaiveTime::MIN));
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(t) => t.with_timezone(&Utc),
        LocalResult::Ambiguous(earlier, _) => earlier.with_timezone(&Utc),
        LocalResult::None => {
            let mut probe = naive;
            loop {
                probe += Duration::minutes(30);
                if let LocalResult::Single(t) | LocalResult::Ambiguous(t, _) =
                    tz.from_local_datetime(&probe)
                {
                    return t.with_timezone(&Utc);
                }
            }
        }
    }
}
