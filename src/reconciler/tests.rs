use super::*;

use std::collections::VecDeque;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use chrono::Duration;

use crate::provider::{EventTime, RawEvent};

/// Provider fed from a script of canned results, recording the cursor of
/// every fetch it sees.
struct ScriptedProvider {
    script: StdMutex<VecDeque<Result<EventPage, ProviderError>>>,
    calls: StdMutex<Vec<Option<String>>>,
}

impl ScriptedProvider {
    fn new(script: Vec<Result<EventPage, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            script: StdMutex::new(script.into()),
            calls: StdMutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<Option<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CalendarProvider for ScriptedProvider {
    async fn list_events(
        &self,
        cursor: Option<&str>,
        _time_min: DateTime<Utc>,
    ) -> Result<EventPage, ProviderError> {
        self.calls.lock().unwrap().push(cursor.map(str::to_string));
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(EventPage::default()))
    }

    async fn quick_add(&self, _text: &str) -> Result<RawEvent, ProviderError> {
        Err(ProviderError::Http("not scripted".to_string()))
    }
}

fn reconciler(script: Vec<Result<EventPage, ProviderError>>) -> (Reconciler, Arc<ScriptedProvider>) {
    let provider = ScriptedProvider::new(script);
    (
        Reconciler::new(provider.clone(), "room".to_string()),
        provider,
    )
}

/// Hours after the fixed test epoch.
fn t(hours: i64) -> DateTime<Utc> {
    "2024-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap() + Duration::hours(hours)
}

fn timed(at: DateTime<Utc>) -> Option<EventTime> {
    Some(EventTime {
        date_time: Some(at.to_rfc3339()),
        date: None,
    })
}

fn ev(id: &str, start_h: i64, end_h: i64) -> RawEvent {
    ev_titled(id, start_h, end_h, "meeting")
}

fn ev_titled(id: &str, start_h: i64, end_h: i64, title: &str) -> RawEvent {
    RawEvent {
        id: id.to_string(),
        status: Some("confirmed".to_string()),
        summary: Some(title.to_string()),
        start: timed(t(start_h)),
        end: timed(t(end_h)),
    }
}

fn cancelled(id: &str) -> RawEvent {
    RawEvent {
        id: id.to_string(),
        status: Some("cancelled".to_string()),
        ..RawEvent::default()
    }
}

fn page(events: Vec<RawEvent>, cursor: &str) -> Result<EventPage, ProviderError> {
    Ok(EventPage {
        events,
        next_cursor: cursor.to_string(),
    })
}

fn active_ids(snapshot: &Snapshot) -> Vec<&str> {
    snapshot.active.iter().map(|b| b.id.as_str()).collect()
}

// ── Delta application ────────────────────────────────────

#[tokio::test]
async fn first_sync_is_full_and_sorted() {
    let (r, provider) = reconciler(vec![page(vec![ev("b", 3, 4), ev("a", 1, 2)], "c1")]);

    let outcome = r.sync_at(t(0)).await.unwrap();
    assert_eq!(outcome.summary.added, 2);
    assert!(outcome.next_changed);

    let snapshot = r.snapshot().await;
    assert_eq!(active_ids(&snapshot), vec!["a", "b"]);
    assert_eq!(snapshot.next.as_ref().unwrap().id, "a");
    // No stored cursor yet: the first fetch must have been a full one.
    assert_eq!(provider.calls(), vec![None]);
    assert_eq!(r.store.read().await.cursor(), Some("c1"));
}

#[tokio::test]
async fn cancelled_event_never_lands_and_later_cancel_removes() {
    let (r, _) = reconciler(vec![
        page(vec![ev("a", 10, 11), cancelled("b")], "c1"),
        page(vec![cancelled("a")], "c2"),
    ]);

    let outcome = r.sync_at(t(0)).await.unwrap();
    assert_eq!(outcome.summary.added, 1);
    assert_eq!(outcome.summary.deleted, 1);
    assert_eq!(active_ids(&r.snapshot().await), vec!["a"]);

    let outcome = r.sync_at(t(0)).await.unwrap();
    assert_eq!(outcome.summary.deleted, 1);
    assert!(outcome.next_changed);

    let snapshot = r.snapshot().await;
    assert!(snapshot.active.is_empty());
    assert!(snapshot.next.is_none());
}

#[tokio::test]
async fn expired_bookings_leave_active_but_stay_tracked() {
    let (r, _) = reconciler(vec![page(vec![ev("past", -3, -2), ev("soon", 1, 2)], "c1")]);

    r.sync_at(t(0)).await.unwrap();

    let snapshot = r.snapshot().await;
    assert_eq!(active_ids(&snapshot), vec!["soon"]);
    // The record survives until the provider deletes it.
    assert_eq!(r.store.read().await.len(), 2);
}

#[tokio::test]
async fn booking_ending_now_is_not_active() {
    let (r, _) = reconciler(vec![page(vec![ev("a", -1, 0)], "c1")]);
    r.sync_at(t(0)).await.unwrap();
    assert!(r.snapshot().await.active.is_empty());
}

#[tokio::test]
async fn equal_starts_sort_by_id() {
    let (r, _) = reconciler(vec![page(vec![ev("b", 1, 3), ev("a", 1, 2)], "c1")]);

    r.sync_at(t(0)).await.unwrap();

    let snapshot = r.snapshot().await;
    assert_eq!(active_ids(&snapshot), vec!["a", "b"]);
    assert_eq!(snapshot.next.as_ref().unwrap().id, "a");
}

#[tokio::test]
async fn update_replaces_in_place() {
    let (r, _) = reconciler(vec![
        page(vec![ev("a", 1, 2)], "c1"),
        page(vec![ev_titled("a", 2, 3, "moved")], "c2"),
    ]);

    r.sync_at(t(0)).await.unwrap();
    let outcome = r.sync_at(t(0)).await.unwrap();
    assert_eq!(outcome.summary.updated, 1);
    assert_eq!(outcome.summary.added, 0);

    let snapshot = r.snapshot().await;
    assert_eq!(snapshot.active.len(), 1);
    assert_eq!(snapshot.active[0].title, "moved");
    assert_eq!(snapshot.active[0].start, t(2));
}

#[tokio::test]
async fn cancelling_unknown_id_is_a_counted_noop() {
    let (r, _) = reconciler(vec![page(vec![cancelled("ghost")], "c1")]);

    let outcome = r.sync_at(t(0)).await.unwrap();
    assert_eq!(outcome.summary.deleted, 1);
    assert!(!outcome.next_changed);
    assert!(r.store.read().await.is_empty());
}

// ── Parse containment ────────────────────────────────────

#[tokio::test]
async fn malformed_event_is_skipped_without_aborting_the_batch() {
    let mut bad = ev("bad", 1, 2);
    bad.start = Some(EventTime {
        date_time: Some("whenever".to_string()),
        date: None,
    });

    let (r, _) = reconciler(vec![page(vec![bad, ev("good", 3, 4)], "c1")]);

    let outcome = r.sync_at(t(0)).await.unwrap();
    assert_eq!(outcome.summary.added, 1);
    assert_eq!(outcome.summary.deleted, 1);
    assert_eq!(active_ids(&r.snapshot().await), vec!["good"]);
}

#[tokio::test]
async fn known_booking_going_malformed_is_dropped() {
    let mut mangled = ev("a", 1, 2);
    mangled.end = None;

    let (r, _) = reconciler(vec![
        page(vec![ev("a", 1, 2)], "c1"),
        page(vec![mangled], "c2"),
    ]);

    r.sync_at(t(0)).await.unwrap();
    let outcome = r.sync_at(t(0)).await.unwrap();
    assert_eq!(outcome.summary.deleted, 1);
    assert!(r.store.read().await.is_empty());
}

// ── Cursor handling ──────────────────────────────────────

#[tokio::test]
async fn cursor_threads_between_syncs() {
    let (r, provider) = reconciler(vec![
        page(vec![ev("a", 1, 2)], "c1"),
        page(vec![], "c2"),
        page(vec![], "c3"),
    ]);

    r.sync_at(t(0)).await.unwrap();
    r.sync_at(t(0)).await.unwrap();
    r.sync_at(t(0)).await.unwrap();

    assert_eq!(
        provider.calls(),
        vec![None, Some("c1".to_string()), Some("c2".to_string())]
    );
}

#[tokio::test]
async fn empty_returned_token_forces_next_full_fetch() {
    let (r, provider) = reconciler(vec![
        page(vec![ev("a", 1, 2)], ""),
        page(vec![], "c2"),
    ]);

    r.sync_at(t(0)).await.unwrap();
    r.sync_at(t(0)).await.unwrap();

    assert_eq!(provider.calls(), vec![None, None]);
}

#[tokio::test]
async fn rejected_cursor_falls_back_to_full_fetch_and_drops_stale_state() {
    let (r, provider) = reconciler(vec![
        page(vec![ev("a", 1, 2), ev("b", 3, 4)], "c1"),
        Err(ProviderError::CursorGone),
        page(vec![ev("b", 3, 4)], "c2"),
    ]);

    r.sync_at(t(0)).await.unwrap();
    let outcome = r.sync_at(t(0)).await.unwrap();

    // "a" was deleted while our cursor was dead; only the refetched feed counts.
    assert_eq!(outcome.summary.added, 1);
    assert_eq!(active_ids(&r.snapshot().await), vec!["b"]);
    assert_eq!(
        provider.calls(),
        vec![None, Some("c1".to_string()), None]
    );
    assert_eq!(r.store.read().await.cursor(), Some("c2"));
}

// ── Idempotence and failure atomicity ────────────────────

#[tokio::test]
async fn empty_delta_is_an_idempotent_noop() {
    let (r, _) = reconciler(vec![
        page(vec![ev("a", 1, 2), ev("b", 3, 4)], "c1"),
        page(vec![], "c1"),
    ]);

    r.sync_at(t(0)).await.unwrap();
    let before = r.snapshot().await;

    let outcome = r.sync_at(t(0)).await.unwrap();
    assert!(outcome.summary.is_empty());
    assert!(!outcome.next_changed);

    let after = r.snapshot().await;
    assert_eq!(active_ids(&before), active_ids(&after));
    assert_eq!(before.next, after.next);
    assert_eq!(r.store.read().await.cursor(), Some("c1"));
}

#[tokio::test]
async fn provider_error_leaves_everything_untouched() {
    let (r, _) = reconciler(vec![
        page(vec![ev("a", 1, 2), ev("b", 3, 4)], "c1"),
        Err(ProviderError::Http("boom".to_string())),
    ]);

    r.sync_at(t(0)).await.unwrap();
    let before = r.snapshot().await;

    let err = r.sync_at(t(0)).await.unwrap_err();
    assert!(matches!(err, ProviderError::Http(_)));

    let after = r.snapshot().await;
    assert_eq!(before.active, after.active);
    assert_eq!(before.next, after.next);
    assert_eq!(r.store.read().await.cursor(), Some("c1"));
}

#[tokio::test]
async fn full_fetch_retry_failure_still_reports_the_error() {
    let (r, _) = reconciler(vec![
        page(vec![ev("a", 1, 2)], "c1"),
        Err(ProviderError::CursorGone),
        Err(ProviderError::Timeout),
    ]);

    r.sync_at(t(0)).await.unwrap();
    let err = r.sync_at(t(0)).await.unwrap_err();
    assert!(matches!(err, ProviderError::Timeout));
}

// ── Next-booking signal ──────────────────────────────────

#[tokio::test]
async fn next_always_heads_the_active_list() {
    let (r, _) = reconciler(vec![
        page(vec![ev("late", 5, 6)], "c1"),
        page(vec![ev("early", 1, 2)], "c2"),
        page(vec![cancelled("early")], "c3"),
    ]);

    for _ in 0..3 {
        r.sync_at(t(0)).await.unwrap();
        let snapshot = r.snapshot().await;
        assert_eq!(
            snapshot.next.as_ref().map(|b| b.id.as_str()),
            snapshot.active.first().map(|b| b.id.as_str())
        );
    }
}

#[tokio::test]
async fn next_changed_fires_only_on_real_changes() {
    let (r, _) = reconciler(vec![
        page(vec![ev("a", 5, 6)], "c1"),
        page(vec![ev("b", 1, 2)], "c2"),
        page(vec![ev("c", 8, 9)], "c3"),
        page(vec![cancelled("b")], "c4"),
    ]);

    // Absent -> "a".
    assert!(r.sync_at(t(0)).await.unwrap().next_changed);
    // "b" starts earlier and takes over.
    assert!(r.sync_at(t(0)).await.unwrap().next_changed);
    // "c" lands behind the head: no change.
    assert!(!r.sync_at(t(0)).await.unwrap().next_changed);
    // Head cancelled: back to "a".
    assert!(r.sync_at(t(0)).await.unwrap().next_changed);
    assert_eq!(r.snapshot().await.next.unwrap().id, "a");
}

#[tokio::test]
async fn next_expiring_between_syncs_counts_as_a_change() {
    let (r, _) = reconciler(vec![
        page(vec![ev("a", 1, 2)], "c1"),
        page(vec![], "c2"),
    ]);

    r.sync_at(t(0)).await.unwrap();
    // By the second sync the booking has ended; the rebuild prunes it.
    let outcome = r.sync_at(t(3)).await.unwrap();
    assert!(outcome.next_changed);
    assert!(r.snapshot().await.next.is_none());
}
