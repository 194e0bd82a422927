//! Transient per-session UI signals: typing indicator and unread badge.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Typing and unread state derived from the message flow.
///
/// The typing indicator is a counter, not a flag: overlapping replies each
/// call `start_typing`/`finish_typing`, and the indicator stays visible
/// while any reply is pending without ever rendering twice.
#[derive(Debug, Default)]
pub struct SessionSignals {
    typing: AtomicUsize,
    unread: AtomicBool,
}

impl SessionSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// A reply started computing; the indicator becomes visible.
    pub fn start_typing(&self) {
        self.typing.fetch_add(1, Ordering::SeqCst);
    }

    /// A reply was emitted or aborted; the indicator clears once no reply
    /// remains pending.
    pub fn finish_typing(&self) {
        // Saturating: a stray finish without a start stays at zero.
        let _ = self
            .typing
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub fn is_typing(&self) -> bool {
        self.typing.load(Ordering::SeqCst) > 0
    }

    /// A non-visitor message arrived while the widget surface was closed.
    pub fn set_unread(&self) {
        self.unread.store(true, Ordering::SeqCst);
    }

    /// The surface opened or the visitor acknowledged.
    pub fn clear_unread(&self) {
        self.unread.store(false, Ordering::SeqCst);
    }

    pub fn has_unread(&self) -> bool {
        self.unread.load(Ordering::SeqCst)
    }
}
