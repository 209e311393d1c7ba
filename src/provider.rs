use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::model::Booking;

const GOOGLE_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

/// Upper bound on any single provider call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Status string the provider uses for deleted events.
const STATUS_CANCELLED: &str = "cancelled";

// ── Wire types ───────────────────────────────────────────

/// One event as reported by the provider feed. Everything beyond the id is
/// optional on the wire; ingestion decides what is usable.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEvent {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub start: Option<EventTime>,
    #[serde(default)]
    pub end: Option<EventTime>,
}

/// Provider timestamp: timed events carry `dateTime`, all-day events only `date`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventTime {
    #[serde(rename = "dateTime")]
    pub date_time: Option<String>,
    pub date: Option<String>,
}

/// One batch of the event feed plus the cursor for the next incremental fetch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventPage {
    #[serde(default, rename = "items")]
    pub events: Vec<RawEvent>,
    #[serde(default, rename = "nextSyncToken")]
    pub next_cursor: String,
}

// ── Errors ───────────────────────────────────────────────

#[derive(Debug)]
pub enum ProviderError {
    /// The provider rejected the stored sync cursor; the caller must fall
    /// back to a full fetch.
    CursorGone,
    Timeout,
    Http(String),
    Status(u16, String),
    Decode(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::CursorGone => write!(f, "sync cursor no longer valid"),
            ProviderError::Timeout => write!(f, "provider request timed out"),
            ProviderError::Http(e) => write!(f, "provider request failed: {e}"),
            ProviderError::Status(code, body) => {
                write!(f, "provider returned status {code}: {body}")
            }
            ProviderError::Decode(e) => write!(f, "provider response unreadable: {e}"),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Per-event ingestion failure. Never propagated past the event it names.
#[derive(Debug)]
pub enum ParseError {
    MissingTimestamp(String),
    BadTimestamp(String, String),
    EmptyRange(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::MissingTimestamp(id) => {
                write!(f, "event {id}: missing start/end timestamp")
            }
            ParseError::BadTimestamp(id, value) => {
                write!(f, "event {id}: unparseable timestamp {value:?}")
            }
            ParseError::EmptyRange(id) => write!(f, "event {id}: start is not before end"),
        }
    }
}

impl std::error::Error for ParseError {}

// ── Provider contract ────────────────────────────────────

/// The calendar side of the bot. One batch per call: a `Some` cursor selects
/// the incremental feed, `None` a full fetch bounded to `time_min` forward
/// with cancelled events excluded and recurring ones expanded.
#[async_trait]
pub trait CalendarProvider: Send + Sync {
    async fn list_events(
        &self,
        cursor: Option<&str>,
        time_min: DateTime<Utc>,
    ) -> Result<EventPage, ProviderError>;

    /// Submit a natural-language booking. Date/time parsing of `text` is
    /// entirely the provider's job.
    async fn quick_add(&self, text: &str) -> Result<RawEvent, ProviderError>;
}

/// Build the candidate booking for one feed event. `Ok(None)` means the event
/// is cancelled and any stored booking under this id must go.
pub fn parse_event(calendar_id: &str, raw: &RawEvent) -> Result<Option<Booking>, ParseError> {
    if raw.status.as_deref() == Some(STATUS_CANCELLED) {
        return Ok(None);
    }
    let start = parse_instant(&raw.id, raw.start.as_ref())?;
    let end = parse_instant(&raw.id, raw.end.as_ref())?;
    if start >= end {
        return Err(ParseError::EmptyRange(raw.id.clone()));
    }
    Ok(Some(Booking {
        id: raw.id.clone(),
        calendar_id: calendar_id.to_string(),
        title: raw.summary.clone().unwrap_or_default(),
        start,
        end,
    }))
}

fn parse_instant(id: &str, time: Option<&EventTime>) -> Result<DateTime<Utc>, ParseError> {
    // All-day events carry only `date` and are not bookings we can place on
    // a clock; they fail here and drop at ingestion.
    let Some(value) = time.and_then(|t| t.date_time.as_deref()) else {
        return Err(ParseError::MissingTimestamp(id.to_string()));
    };
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| ParseError::BadTimestamp(id.to_string(), value.to_string()))
}

// ── Google Calendar ──────────────────────────────────────

/// Calendar v3 REST client. OAuth exchange/refresh is out of scope: config
/// hands this a ready bearer token.
pub struct GoogleCalendar {
    http: reqwest::Client,
    base_url: String,
    calendar_id: String,
    token: String,
}

impl GoogleCalendar {
    pub fn new(calendar_id: String, token: String) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Http(e.to_string()))?;
        Ok(Self {
            http,
            base_url: GOOGLE_API_BASE.to_string(),
            calendar_id,
            token,
        })
    }

    /// Point the client at a different API root (tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn events_url(&self, suffix: &str) -> String {
        format!("{}/calendars/{}/events{suffix}", self.base_url, self.calendar_id)
    }
}

fn transport_err(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Http(e.to_string())
    }
}

#[async_trait]
impl CalendarProvider for GoogleCalendar {
    async fn list_events(
        &self,
        cursor: Option<&str>,
        time_min: DateTime<Utc>,
    ) -> Result<EventPage, ProviderError> {
        let request = self.http.get(self.events_url("")).bearer_auth(&self.token);
        let time_min = time_min.to_rfc3339();
        let request = match cursor {
            Some(token) => request.query(&[("syncToken", token)]),
            None => request.query(&[
                ("timeMin", time_min.as_str()),
                ("singleEvents", "true"),
                ("showDeleted", "false"),
            ]),
        };

        let response = request.send().await.map_err(transport_err)?;
        match response.status().as_u16() {
            200 => response
                .json::<EventPage>()
                .await
                .map_err(|e| ProviderError::Decode(e.to_string())),
            // 410 Gone is how the provider reports an expired sync token.
            410 => Err(ProviderError::CursorGone),
            code => Err(ProviderError::Status(
                code,
                response.text().await.unwrap_or_default(),
            )),
        }
    }

    async fn quick_add(&self, text: &str) -> Result<RawEvent, ProviderError> {
        let response = self
            .http
            .post(self.events_url("/quickAdd"))
            .bearer_auth(&self.token)
            .query(&[("text", text)])
            .send()
            .await
            .map_err(transport_err)?;
        match response.status().as_u16() {
            200 => response
                .json::<RawEvent>()
                .await
                .map_err(|e| ProviderError::Decode(e.to_string())),
            code => Err(ProviderError::Status(
                code,
                response.text().await.unwrap_or_default(),
            )),
        }
    }
}
