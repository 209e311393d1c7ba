use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::gateway::{Attachment, Field, Message, RESPONSE_IN_CHANNEL};
use crate::model::{Booking, local_at};
use crate::reconciler::Snapshot;

/// Card color for today's bookings.
const COLOR_TODAY: &str = "#3BCBFF";
/// Card color for tomorrow's bookings.
const COLOR_TOMORROW: &str = "#33FF3D";

/// A parsed inbound chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    Help,
    /// Quick-add with the user's full original text.
    Book(String),
}

/// First token decides: `list` and `help` are keywords, anything else is a
/// quick-add booking carrying the whole text. Empty input gets help.
pub fn parse(text: &str) -> Command {
    let trimmed = text.trim();
    let Some(first) = trimmed.split_whitespace().next() else {
        return Command::Help;
    };
    match first.to_ascii_lowercase().as_str() {
        "list" => Command::List,
        "help" => Command::Help,
        _ => Command::Book(trimmed.to_string()),
    }
}

// ── Rendering ────────────────────────────────────────────

/// Today's and tomorrow's bookings as cards, bucketed by local calendar day,
/// with the calendar link and help cards appended unconditionally.
pub fn render_list(snapshot: &Snapshot, calendar_id: &str, tz: Tz, now: DateTime<Utc>) -> Message {
    let today = now.with_timezone(&tz).date_naive();
    let tomorrow = today.succ_opt().unwrap_or(today);
    let day_after = tomorrow.succ_opt().unwrap_or(tomorrow);

    let today_start = local_at(today, 0, tz);
    let tomorrow_start = local_at(tomorrow, 0, tz);
    let day_after_start = local_at(day_after, 0, tz);

    let mut text = "No bookings to show.".to_string();
    let mut attachments = Vec::new();
    if !snapshot.active.is_empty() {
        text = "Upcoming Bookings:".to_string();
        attachments.extend(cards_for_window(
            &snapshot.active,
            COLOR_TODAY,
            today_start,
            tomorrow_start,
            tz,
            now,
        ));
        attachments.extend(cards_for_window(
            &snapshot.active,
            COLOR_TOMORROW,
            tomorrow_start,
            day_after_start,
            tz,
            now,
        ));
    }
    attachments.push(calendar_link(calendar_id));
    attachments.push(help_card());

    Message {
        text,
        attachments,
        response_type: Some(RESPONSE_IN_CHANNEL.to_string()),
    }
}

pub fn render_help() -> Message {
    Message {
        text: "Booking command syntax:".to_string(),
        attachments: vec![help_card()],
        response_type: None,
    }
}

pub fn render_booked(label: Option<String>) -> Message {
    let text = match label {
        Some(label) => format!("Booked for {label}."),
        None => "Booked.".to_string(),
    };
    Message {
        text,
        attachments: Vec::new(),
        response_type: Some(RESPONSE_IN_CHANNEL.to_string()),
    }
}

pub fn render_book_failed() -> Message {
    Message {
        text: "Could not book that.".to_string(),
        attachments: Vec::new(),
        response_type: None,
    }
}

/// Channel-topic line advertising the next booking.
pub fn topic_text(next: Option<&Booking>, tz: Tz, now: DateTime<Utc>) -> String {
    match next {
        Some(booking) => format!(
            "*Next Booking:* {} {}",
            booking.time_label(now, tz),
            booking.title
        ),
        None => "No bookings today.".to_string(),
    }
}

/// Cards for bookings starting inside `[from, to)`. Numbering follows the
/// booking's position in the full active list, so a card keeps its number
/// across the today/tomorrow buckets.
fn cards_for_window(
    active: &[Booking],
    color: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    tz: Tz,
    now: DateTime<Utc>,
) -> Vec<Attachment> {
    active
        .iter()
        .enumerate()
        .filter(|(_, booking)| booking.is_within(from, to))
        .map(|(index, booking)| {
            booking_card(booking, &format!("Booking #{}", index + 1), color, tz, now)
        })
        .collect()
}

fn booking_card(booking: &Booking, title: &str, color: &str, tz: Tz, now: DateTime<Utc>) -> Attachment {
    Attachment {
        color: Some(color.to_string()),
        fields: vec![
            Field {
                title: title.to_string(),
                value: booking.time_label(now, tz),
                short: true,
            },
            Field {
                title: "Who/What".to_string(),
                value: booking.title.clone(),
                short: true,
            },
        ],
        ..Attachment::default()
    }
}

fn calendar_link(calendar_id: &str) -> Attachment {
    Attachment {
        title: Some("Full calendar".to_string()),
        fields: vec![Field {
            title: String::new(),
            value: format!(
                "<https://calendar.google.com/calendar/embed?src={calendar_id}|Open in Google Calendar>"
            ),
            short: false,
        }],
        mrkdwn_in: vec!["fields".to_string()],
        ..Attachment::default()
    }
}

fn help_card() -> Attachment {
    let entry = |value: &str| Field {
        title: String::new(),
        value: value.to_string(),
        short: true,
    };
    Attachment {
        fields: vec![
            entry("/book list"),
            entry("Show upcoming bookings"),
            entry("/book 1pm meeting"),
            entry("Book the room for 1pm"),
            entry("/book help"),
            entry("Show this help"),
        ],
        ..Attachment::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Tz;

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn booking(id: &str, start: &str, end: &str) -> Booking {
        Booking {
            id: id.to_string(),
            calendar_id: "room".to_string(),
            title: format!("{id} meeting"),
            start: utc(start),
            end: utc(end),
        }
    }

    #[test]
    fn parse_routes_keywords_case_insensitively() {
        assert_eq!(parse("list"), Command::List);
        assert_eq!(parse("  LIST everything "), Command::List);
        assert_eq!(parse("help"), Command::Help);
        assert_eq!(parse("Help me"), Command::Help);
    }

    #[test]
    fn parse_sends_empty_input_to_help() {
        assert_eq!(parse(""), Command::Help);
        assert_eq!(parse("   "), Command::Help);
    }

    #[test]
    fn parse_defaults_to_book_with_the_full_text() {
        assert_eq!(
            parse(" tomorrow 3pm standup "),
            Command::Book("tomorrow 3pm standup".to_string())
        );
        assert_eq!(parse("listish"), Command::Book("listish".to_string()));
    }

    #[test]
    fn list_buckets_today_and_tomorrow_with_global_numbering() {
        let now = utc("2024-03-05T10:00:00Z");
        let snapshot = Snapshot {
            active: vec![
                booking("a", "2024-03-05T13:00:00Z", "2024-03-05T14:00:00Z"),
                booking("b", "2024-03-06T09:00:00Z", "2024-03-06T10:00:00Z"),
                booking("c", "2024-03-09T09:00:00Z", "2024-03-09T10:00:00Z"),
            ],
            next: None,
        };

        let message = render_list(&snapshot, "room", Tz::UTC, now);
        assert_eq!(message.text, "Upcoming Bookings:");
        assert_eq!(message.response_type.as_deref(), Some(RESPONSE_IN_CHANNEL));

        // Two day cards plus the link and help cards; "c" is out of range.
        assert_eq!(message.attachments.len(), 4);
        assert_eq!(message.attachments[0].fields[0].title, "Booking #1");
        assert_eq!(message.attachments[0].color.as_deref(), Some(COLOR_TODAY));
        assert_eq!(message.attachments[1].fields[0].title, "Booking #2");
        assert_eq!(
            message.attachments[1].color.as_deref(),
            Some(COLOR_TOMORROW)
        );
        assert_eq!(
            message.attachments[2].title.as_deref(),
            Some("Full calendar")
        );
    }

    #[test]
    fn empty_list_still_carries_link_and_help() {
        let message = render_list(
            &Snapshot::default(),
            "room",
            Tz::UTC,
            utc("2024-03-05T10:00:00Z"),
        );
        assert_eq!(message.text, "No bookings to show.");
        assert_eq!(message.attachments.len(), 2);
    }

    #[test]
    fn topic_text_covers_both_states() {
        let now = utc("2024-03-05T10:00:00Z");
        let next = booking("a", "2024-03-05T13:00:00Z", "2024-03-05T14:00:00Z");
        assert_eq!(
            topic_text(Some(&next), Tz::UTC, now),
            "*Next Booking:* Today from 1:00 to 2:00pm a meeting"
        );
        assert_eq!(topic_text(None, Tz::UTC, now), "No bookings today.");
    }

    #[test]
    fn booked_reply_mentions_the_time_when_known() {
        assert_eq!(
            render_booked(Some("Today from 1:00 to 2:00pm".to_string())).text,
            "Booked for Today from 1:00 to 2:00pm."
        );
        assert_eq!(render_booked(None).text, "Booked.");
    }
}
