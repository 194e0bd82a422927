//! One visitor's conversation session.
//!
//! `ChatSession` owns the optimistic submit path: append the visitor's
//! message locally, persist it, pick exactly one responder, hold the typing
//! indicator through the simulated delay, then emit the reply. The shared
//! state it wraps is also what the store-subscription consumer mutates, so
//! local and remote updates converge on the same timeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_core::config::{TypingConfig, WidgetConfig};
use parley_core::events::ChatEvent;
use parley_core::types::{
    Message, Reply, RuleKind, Sender, Session, SessionStatus, WidgetSettings,
};
use parley_rules::{AiResponder, ResponderSelector, RuleSnapshot};
use parley_store::ChatStore;

use crate::error::EngineError;
use crate::signals::SessionSignals;
use crate::timeline::{Timeline, TimelineSync};

/// State shared between the session, the widget surface, and the
/// store-subscription consumer task.
pub struct SharedState {
    pub(crate) tenant: String,
    overrides: WidgetConfig,
    session: Mutex<Session>,
    settings: Mutex<WidgetSettings>,
    pub(crate) timeline: Timeline,
    pub(crate) signals: SessionSignals,
    open: AtomicBool,
    welcomed: AtomicBool,
}

impl SharedState {
    fn new(
        tenant: String,
        overrides: WidgetConfig,
        session: Session,
        settings: WidgetSettings,
    ) -> Self {
        Self {
            tenant,
            overrides,
            session: Mutex::new(session),
            settings: Mutex::new(settings),
            timeline: Timeline::new(),
            signals: SessionSignals::new(),
            open: AtomicBool::new(false),
            welcomed: AtomicBool::new(false),
        }
    }

    pub(crate) fn session(&self) -> Session {
        self.lock_session().clone()
    }

    pub(crate) fn session_id(&self) -> Uuid {
        self.lock_session().id
    }

    pub(crate) fn settings_snapshot(&self) -> WidgetSettings {
        self.settings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn set_settings(&self, settings: WidgetSettings) {
        *self.settings.lock().unwrap_or_else(|e| e.into_inner()) = settings;
    }

    pub(crate) fn set_session_status(&self, status: SessionStatus) {
        self.lock_session().status = status;
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub(crate) fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fold one store event into the shared state.
    ///
    /// Called from the subscription consumer; synchronous and lock-scoped,
    /// never held across an await.
    pub(crate) fn handle_event(&self, event: ChatEvent) {
        match event {
            ChatEvent::MessageInserted { message } => {
                if message.session_id != self.session_id() {
                    return;
                }
                let inserted = self.timeline.apply(&message);
                if inserted && message.sender != Sender::User && !self.is_open() {
                    self.signals.set_unread();
                }
            }
            ChatEvent::MessageStatusChanged {
                message_id,
                session_id,
                status,
                read_at,
                ..
            } => {
                if session_id == self.session_id() {
                    self.timeline.apply_status(message_id, status, read_at);
                }
            }
            ChatEvent::SessionStatusChanged {
                session_id, status, ..
            } => {
                if session_id == self.session_id() {
                    info!(%session_id, status = status.as_str(), "Session status changed remotely");
                    self.set_session_status(status);
                }
            }
            ChatEvent::SettingsUpdated {
                tenant,
                mut settings,
                ..
            } => {
                if tenant == self.tenant {
                    self.overrides.apply_overrides(&mut settings);
                    self.set_settings(settings);
                }
            }
            // Rule snapshots are read fresh per message; nothing to invalidate.
            ChatEvent::RulesChanged { .. } => {}
        }
    }
}

/// One visitor's conversation: timeline, lifecycle, and reply emission.
pub struct ChatSession {
    pub(crate) store: Arc<dyn ChatStore>,
    selector: ResponderSelector,
    typing_delay: Duration,
    pub(crate) shared: Arc<SharedState>,
    sync: Mutex<TimelineSync>,
}

impl ChatSession {
    /// Assemble a session around an existing store row.
    pub fn new(
        tenant: impl Into<String>,
        store: Arc<dyn ChatStore>,
        ai: Arc<dyn AiResponder>,
        typing: &TypingConfig,
        overrides: WidgetConfig,
        session: Session,
        settings: WidgetSettings,
    ) -> Self {
        let shared = Arc::new(SharedState::new(
            tenant.into(),
            overrides,
            session,
            settings,
        ));
        Self {
            store,
            selector: ResponderSelector::new(ai),
            typing_delay: Duration::from_millis(typing.delay_ms),
            shared,
            sync: Mutex::new(TimelineSync::new()),
        }
    }

    /// Load the session's persisted messages into the timeline.
    pub async fn hydrate(&self) -> Result<(), EngineError> {
        let messages = self.store.messages(self.shared.session_id()).await?;
        for message in &messages {
            self.shared.timeline.apply(message);
        }
        Ok(())
    }

    /// Subscribe to the store's notification stream.
    ///
    /// Attaching again first tears down the previous consumer, so the same
    /// remote event is never delivered twice.
    pub fn attach_sync(&self) {
        let rx = self.store.subscribe();
        self.lock_sync().attach(rx, Arc::clone(&self.shared));
    }

    /// Tear down the subscription consumer.
    pub fn detach_sync(&self) {
        self.lock_sync().detach();
    }

    /// Handle a visitor message end to end.
    ///
    /// The visitor's message is appended and persisted immediately; the
    /// reply is selected, held behind the typing indicator for the
    /// simulated delay, then emitted. Returns the reply message.
    pub async fn submit_visitor_message(&self, content: &str) -> Result<Message, EngineError> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            debug!("Ignoring empty visitor message");
            return Err(EngineError::EmptyMessage);
        }
        let session_id = {
            let session = self.shared.session();
            if session.is_closed() {
                warn!(session_id = %session.id, "Visitor message rejected: session closed");
                return Err(EngineError::SessionClosed(session.id));
            }
            session.id
        };

        // Optimistic local insert; the visitor's own message is never
        // delayed behind persistence or selection.
        let user_msg = Message::new(session_id, trimmed, Sender::User, false);
        self.shared.timeline.apply(&user_msg);
        if let Err(e) = self.store.insert_message(&user_msg).await {
            warn!(error = %e, "Failed to persist visitor message; keeping local copy");
        }

        self.shared.signals.start_typing();
        let reply = self.select_reply(trimmed).await;
        tokio::time::sleep(self.typing_delay).await;

        // A session closed mid-delay still completes the insert; the
        // message lands on the dead timeline and rendering is the
        // surface's problem.
        let reply_msg = self.emit_reply(session_id, reply).await;
        self.shared.signals.finish_typing();
        Ok(reply_msg)
    }

    /// Synthesize the welcome message on first open of an empty timeline.
    ///
    /// One-shot per session instance: calling this twice never produces a
    /// second welcome.
    pub async fn welcome_if_empty(&self) {
        if self.shared.welcomed.swap(true, Ordering::SeqCst) {
            return;
        }
        if !self.shared.timeline.is_empty() {
            return;
        }
        let session_id = self.shared.session_id();
        let text = self.shared.settings_snapshot().welcome_message;
        let msg = Message::new(session_id, text, Sender::Bot, false);
        self.shared.timeline.apply(&msg);
        if let Err(e) = self.store.insert_message(&msg).await {
            warn!(error = %e, "Failed to persist welcome message; keeping local copy");
        }
    }

    /// Close the session. Terminal: no reopen exists.
    pub async fn close(&self) -> Result<(), EngineError> {
        let session_id = self.shared.session_id();
        self.store
            .update_session_status(session_id, SessionStatus::Closed)
            .await?;
        self.shared.set_session_status(SessionStatus::Closed);
        info!(%session_id, "Session closed");
        Ok(())
    }

    async fn select_reply(&self, content: &str) -> Reply {
        let tenant = &self.shared.tenant;
        // Fresh snapshot per invocation; administrators edit rules
        // out-of-band and a store failure just means an empty rule set.
        let advanced = self
            .store
            .rules(tenant, RuleKind::Advanced)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to read advanced rules");
                Vec::new()
            });
        let auto = self
            .store
            .rules(tenant, RuleKind::Auto)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to read auto rules");
                Vec::new()
            });
        let snapshot = RuleSnapshot::new(auto, advanced);
        let settings = self.shared.settings_snapshot();
        self.selector.select(content, &snapshot, &settings).await
    }

    async fn emit_reply(&self, session_id: Uuid, reply: Reply) -> Message {
        let msg = Message::new(session_id, reply.text, reply.sender, reply.is_html);
        self.shared.timeline.apply(&msg);
        if msg.sender != Sender::User && !self.shared.is_open() {
            self.shared.signals.set_unread();
        }
        if let Err(e) = self.store.insert_message(&msg).await {
            warn!(error = %e, "Failed to persist reply; keeping local copy");
        }
        msg
    }

    fn lock_sync(&self) -> std::sync::MutexGuard<'_, TimelineSync> {
        self.sync.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// =============================================================================
// Tests
// =============================================================================
