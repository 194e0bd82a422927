//! Message timeline merge and the store-subscription consumer.
//!
//! The timeline is fed from two sources: local optimistic inserts made
//! synchronously on send, and confirmed rows arriving on the store's
//! notification stream. Both funnel through [`Timeline::apply`], which
//! guarantees each message id appears exactly once, at the position implied
//! by `(created_at, id)`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use parley_core::types::{Message, MessageStatus};
use parley_store::EventReceiver;

use crate::session::SharedState;

#[derive(Default)]
struct TimelineState {
    seen: HashSet<Uuid>,
    messages: Vec<Message>,
}

/// An ordered, duplicate-free view of one session's messages.
#[derive(Default)]
pub struct Timeline {
    state: Mutex<TimelineState>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one message into the timeline.
    ///
    /// Returns `true` if the message was new, `false` if its id had already
    /// been seen (the optimistic copy and the store's confirmed echo share
    /// an id, so exactly one of them lands).
    pub fn apply(&self, message: &Message) -> bool {
        let mut state = self.lock();
        if !state.seen.insert(message.id) {
            debug!(message_id = %message.id, "Duplicate message discarded");
            return false;
        }
        // Append fast-path; binary search only when the store delivers
        // something out of order.
        let key = message.sort_key();
        let out_of_order = state
            .messages
            .last()
            .is_some_and(|last| last.sort_key() > key);
        if out_of_order {
            let pos = state.messages.partition_point(|m| m.sort_key() <= key);
            state.messages.insert(pos, message.clone());
        } else {
            state.messages.push(message.clone());
        }
        true
    }

    /// Update a message's delivery status in place.
    ///
    /// Status transitions are the one mutation a persisted message allows.
    pub fn apply_status(
        &self,
        message_id: Uuid,
        status: MessageStatus,
        read_at: Option<DateTime<Utc>>,
    ) -> bool {
        let mut state = self.lock();
        if let Some(msg) = state.messages.iter_mut().find(|m| m.id == message_id) {
            msg.status = Some(status);
            if read_at.is_some() {
                msg.read_at = read_at;
            }
            true
        } else {
            false
        }
    }

    /// A point-in-time copy of the ordered timeline.
    pub fn snapshot(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().messages.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TimelineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Owns the single live store subscription for an open session.
///
/// Re-attaching tears down the previous consumer task first, so a remote
/// event is never delivered to two listeners of the same session.
#[derive(Default)]
pub struct TimelineSync {
    handle: Option<JoinHandle<()>>,
}

impl TimelineSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start consuming store events into the shared session state.
    pub fn attach(&mut self, rx: EventReceiver, shared: Arc<SharedState>) {
        self.detach();
        self.handle = Some(tokio::spawn(consume_events(rx, shared)));
    }

    /// Stop the consumer task, if any.
    pub fn detach(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_attached(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for TimelineSync {
    fn drop(&mut self) {
        self.detach();
    }
}

async fn consume_events(mut rx: EventReceiver, shared: Arc<SharedState>) {
    loop {
        match rx.recv().await {
            Ok(event) => shared.handle_event(event),
            Err(RecvError::Lagged(skipped)) => {
                // The timeline self-heals on the next events; dedup makes
                // replays harmless, but gaps are worth a trace.
                warn!(skipped, "Store event stream lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use parley_core::types::Sender;

    fn message(session_id: Uuid, content: &str) -> Message {
        Message::new(session_id, content, Sender::User, false)
    }

    // ---- Dedup ----

    #[test]
    fn test_apply_new_message() {
        let timeline = Timeline::new();
        let msg = message(Uuid::new_v4(), "hello");
        assert!(timeline.apply(&msg));
        assert_eq!(timeline.len(), 1);
    }

    #[test]
    fn test_apply_duplicate_id_discarded() {
        let timeline = Timeline::new();
        let msg = message(Uuid::new_v4(), "hello");
        assert!(timeline.apply(&msg));
        assert!(!timeline.apply(&msg));
        assert_eq!(timeline.len(), 1);
    }

    #[test]
    fn test_confirmed_echo_with_adjusted_timestamp_still_dedups() {
        // The store may clamp created_at; the echo keeps the same id.
        let timeline = Timeline::new();
        let msg = message(Uuid::new_v4(), "hello");
        timeline.apply(&msg);
        let mut echo = msg.clone();
        echo.created_at = echo.created_at + Duration::milliseconds(3);
        assert!(!timeline.apply(&echo));
        assert_eq!(timeline.len(), 1);
    }

    // ---- Ordering ----

    #[test]
    fn test_in_order_appends() {
        let timeline = Timeline::new();
        let sid = Uuid::new_v4();
        let base = Utc::now();
        for i in 0..5 {
            let mut msg = message(sid, &format!("msg {}", i));
            msg.created_at = base + Duration::milliseconds(i);
            timeline.apply(&msg);
        }
        let snapshot = timeline.snapshot();
        for (i, msg) in snapshot.iter().enumerate() {
            assert_eq!(msg.content, format!("msg {}", i));
        }
    }

    #[test]
    fn test_out_of_order_arrival_sorted_by_created_at() {
        let timeline = Timeline::new();
        let sid = Uuid::new_v4();
        let base = Utc::now();

        let mut late = message(sid, "second");
        late.created_at = base + Duration::milliseconds(10);
        let mut early = message(sid, "first");
        early.created_at = base;

        timeline.apply(&late);
        timeline.apply(&early);

        let snapshot = timeline.snapshot();
        assert_eq!(snapshot[0].content, "first");
        assert_eq!(snapshot[1].content, "second");
    }

    #[test]
    fn test_strict_order_invariant_holds() {
        let timeline = Timeline::new();
        let sid = Uuid::new_v4();
        let base = Utc::now();
        // Interleave arrivals.
        for offset in [5i64, 1, 9, 3, 7, 0, 8, 2, 6, 4] {
            let mut msg = message(sid, &format!("m{}", offset));
            msg.created_at = base + Duration::milliseconds(offset);
            timeline.apply(&msg);
        }
        let snapshot = timeline.snapshot();
        assert_eq!(snapshot.len(), 10);
        for pair in snapshot.windows(2) {
            assert!(pair[0].sort_key() < pair[1].sort_key());
        }
    }

    // ---- Status ----

    #[test]
    fn test_apply_status_updates_in_place() {
        let timeline = Timeline::new();
        let msg = message(Uuid::new_v4(), "hello");
        timeline.apply(&msg);
        let ts = Utc::now();
        assert!(timeline.apply_status(msg.id, MessageStatus::Read, Some(ts)));
        let snapshot = timeline.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].status, Some(MessageStatus::Read));
        assert_eq!(snapshot[0].read_at, Some(ts));
    }

    #[test]
    fn test_apply_status_unknown_id() {
        let timeline = Timeline::new();
        assert!(!timeline.apply_status(Uuid::new_v4(), MessageStatus::Read, None));
    }

    // ---- Misc ----

    #[test]
    fn test_empty_timeline() {
        let timeline = Timeline::new();
        assert!(timeline.is_empty());
        assert_eq!(timeline.len(), 0);
        assert!(timeline.snapshot().is_empty());
    }

    #[test]
    fn test_sync_detach_is_idempotent() {
        let mut sync = TimelineSync::new();
        assert!(!sync.is_attached());
        sync.detach();
        assert!(!sync.is_attached());
    }
}
