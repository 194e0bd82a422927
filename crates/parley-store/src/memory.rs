//! In-memory reference implementation of [`ChatStore`].
//!
//! Backs tests and the `--memory` demo mode. Mirrors the durable store's
//! observable behavior exactly: ordered rows, id-idempotent inserts,
//! monotonic per-session timestamps, and an event echo for every mutation.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use parley_core::error::Result;
use parley_core::events::ChatEvent;
use parley_core::types::{
    Message, MessageStatus, OperatorMode, Rule, RuleKind, Session, SessionStatus, VisitorId,
    WidgetSettings,
};

use crate::store::{ChatStore, EventReceiver, EVENT_CHANNEL_CAPACITY};

#[derive(Default)]
struct Inner {
    rules: HashMap<(String, RuleKind), Vec<Rule>>,
    settings: HashMap<String, WidgetSettings>,
    sessions: HashMap<Uuid, Session>,
    /// (tenant, visitor id) -> session id.
    visitor_index: HashMap<(String, String), Uuid>,
    messages: HashMap<Uuid, Vec<Message>>,
    /// Highest `created_at` handed out per session.
    last_created: HashMap<Uuid, DateTime<Utc>>,
}

/// Thread-safe in-memory chat store.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    events: broadcast::Sender<ChatEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Mutex::new(Inner::default()),
            events,
        }
    }

    fn emit(&self, event: ChatEvent) {
        // No receivers is fine; events are fire-and-forget.
        let _ = self.events.send(event);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Lock poisoning would mean a panic mid-mutation; propagating the
        // poisoned data is still safer than deadlocking every caller.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn rules(&self, tenant: &str, kind: RuleKind) -> Result<Vec<Rule>> {
        let inner = self.lock();
        Ok(inner
            .rules
            .get(&(tenant.to_string(), kind))
            .cloned()
            .unwrap_or_default())
    }

    async fn put_rules(&self, tenant: &str, kind: RuleKind, rules: Vec<Rule>) -> Result<()> {
        {
            let mut inner = self.lock();
            inner.rules.insert((tenant.to_string(), kind), rules);
        }
        self.emit(ChatEvent::RulesChanged {
            tenant: tenant.to_string(),
            kind,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn settings(&self, tenant: &str) -> Result<WidgetSettings> {
        let inner = self.lock();
        Ok(inner.settings.get(tenant).cloned().unwrap_or_default())
    }

    async fn update_settings(&self, tenant: &str, settings: WidgetSettings) -> Result<()> {
        {
            let mut inner = self.lock();
            inner.settings.insert(tenant.to_string(), settings.clone());
        }
        self.emit(ChatEvent::SettingsUpdated {
            tenant: tenant.to_string(),
            settings,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn set_operator_mode(&self, tenant: &str, mode: OperatorMode) -> Result<()> {
        let settings = {
            let mut inner = self.lock();
            let settings = inner.settings.entry(tenant.to_string()).or_default();
            settings.operator_mode = mode;
            settings.clone()
        };
        self.emit(ChatEvent::SettingsUpdated {
            tenant: tenant.to_string(),
            settings,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn set_online(&self, tenant: &str, online: bool) -> Result<()> {
        let settings = {
            let mut inner = self.lock();
            let settings = inner.settings.entry(tenant.to_string()).or_default();
            settings.is_online = online;
            settings.clone()
        };
        self.emit(ChatEvent::SettingsUpdated {
            tenant: tenant.to_string(),
            settings,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn find_or_create_session(&self, tenant: &str, visitor: &VisitorId) -> Result<Session> {
        let mut inner = self.lock();
        let key = (tenant.to_string(), visitor.0.clone());
        if let Some(session_id) = inner.visitor_index.get(&key) {
            if let Some(session) = inner.sessions.get(session_id) {
                return Ok(session.clone());
            }
        }
        let session = Session::new(visitor.clone());
        debug!(session_id = %session.id, visitor = %visitor, "Created session");
        inner.visitor_index.insert(key, session.id);
        inner.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn update_session_status(&self, session_id: Uuid, status: SessionStatus) -> Result<()> {
        {
            let mut inner = self.lock();
            if let Some(session) = inner.sessions.get_mut(&session_id) {
                session.status = status;
            }
        }
        self.emit(ChatEvent::SessionStatusChanged {
            session_id,
            status,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn insert_message(&self, message: &Message) -> Result<()> {
        let stored = {
            let mut inner = self.lock();
            let timeline = inner.messages.entry(message.session_id).or_default();
            if timeline.iter().any(|m| m.id == message.id) {
                // Id is the dedup key; a re-insert is a no-op.
                return Ok(());
            }

            let mut stored = message.clone();
            // Keep per-session timestamps strictly increasing so append
            // order and created_at order always agree.
            if let Some(last) = inner.last_created.get(&message.session_id) {
                if stored.created_at <= *last {
                    stored.created_at = *last + Duration::milliseconds(1);
                }
            }
            inner
                .last_created
                .insert(stored.session_id, stored.created_at);
            inner
                .messages
                .entry(stored.session_id)
                .or_default()
                .push(stored.clone());
            stored
        };
        self.emit(ChatEvent::MessageInserted { message: stored });
        Ok(())
    }

    async fn mark_read(&self, message_id: Uuid) -> Result<()> {
        let now = Utc::now();
        let found = {
            let mut inner = self.lock();
            let mut found = None;
            for timeline in inner.messages.values_mut() {
                if let Some(msg) = timeline.iter_mut().find(|m| m.id == message_id) {
                    msg.status = Some(MessageStatus::Read);
                    msg.read_at = Some(now);
                    found = Some(msg.session_id);
                    break;
                }
            }
            found
        };
        if let Some(session_id) = found {
            self.emit(ChatEvent::MessageStatusChanged {
                message_id,
                session_id,
                status: MessageStatus::Read,
                read_at: Some(now),
                timestamp: now,
            });
        }
        Ok(())
    }

    async fn messages(&self, session_id: Uuid) -> Result<Vec<Message>> {
        let inner = self.lock();
        let mut messages = inner
            .messages
            .get(&session_id)
            .cloned()
            .unwrap_or_default();
        messages.sort_by_key(|m| m.sort_key());
        Ok(messages)
    }

    fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::types::{MatchType, Sender};

    fn message(session_id: Uuid, content: &str) -> Message {
        Message::new(session_id, content, Sender::User, false)
    }

    // ---- Sessions ----

    #[tokio::test]
    async fn test_find_or_create_session_resumes() {
        let store = MemoryStore::new();
        let visitor = VisitorId::generate();
        let first = store.find_or_create_session("acme", &visitor).await.unwrap();
        let second = store.find_or_create_session("acme", &visitor).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_sessions_scoped_per_tenant() {
        let store = MemoryStore::new();
        let visitor = VisitorId("shared".to_string());
        let a = store.find_or_create_session("acme", &visitor).await.unwrap();
        let b = store.find_or_create_session("globex", &visitor).await.unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_closed_session_is_still_resumed_not_reopened() {
        let store = MemoryStore::new();
        let visitor = VisitorId::generate();
        let session = store.find_or_create_session("acme", &visitor).await.unwrap();
        store
            .update_session_status(session.id, SessionStatus::Closed)
            .await
            .unwrap();
        let resumed = store.find_or_create_session("acme", &visitor).await.unwrap();
        assert_eq!(resumed.id, session.id);
        assert_eq!(resumed.status, SessionStatus::Closed);
    }

    // ---- Messages ----

    #[tokio::test]
    async fn test_insert_message_round_trip() {
        let store = MemoryStore::new();
        let sid = Uuid::new_v4();
        let msg = message(sid, "hello");
        store.insert_message(&msg).await.unwrap();
        let messages = store.messages(sid).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, msg.id);
        assert_eq!(messages[0].content, "hello");
    }

    #[tokio::test]
    async fn test_insert_same_id_is_idempotent() {
        let store = MemoryStore::new();
        let sid = Uuid::new_v4();
        let msg = message(sid, "hello");
        store.insert_message(&msg).await.unwrap();
        store.insert_message(&msg).await.unwrap();
        assert_eq!(store.messages(sid).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_created_at_clamped_monotonic() {
        let store = MemoryStore::new();
        let sid = Uuid::new_v4();
        let mut a = message(sid, "first");
        let mut b = message(sid, "second");
        let ts = Utc::now();
        a.created_at = ts;
        b.created_at = ts; // identical timestamps collide
        store.insert_message(&a).await.unwrap();
        store.insert_message(&b).await.unwrap();
        let messages = store.messages(sid).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].created_at < messages[1].created_at);
        assert_eq!(messages[0].content, "first");
        assert_eq!(messages[1].content, "second");
    }

    #[tokio::test]
    async fn test_messages_ordered_by_created_at() {
        let store = MemoryStore::new();
        let sid = Uuid::new_v4();
        for i in 0..5 {
            store
                .insert_message(&message(sid, &format!("msg {}", i)))
                .await
                .unwrap();
        }
        let messages = store.messages(sid).await.unwrap();
        let mut sorted = messages.clone();
        sorted.sort_by_key(|m| m.sort_key());
        assert_eq!(messages, sorted);
    }

    #[tokio::test]
    async fn test_mark_read_stamps_status() {
        let store = MemoryStore::new();
        let sid = Uuid::new_v4();
        let msg = message(sid, "hello");
        store.insert_message(&msg).await.unwrap();
        store.mark_read(msg.id).await.unwrap();
        let messages = store.messages(sid).await.unwrap();
        assert_eq!(messages[0].status, Some(MessageStatus::Read));
        assert!(messages[0].read_at.is_some());
    }

    // ---- Rules ----

    #[tokio::test]
    async fn test_put_and_read_rules_preserves_order() {
        let store = MemoryStore::new();
        let rules = vec![
            Rule::new(vec!["a".to_string()], MatchType::Exact, "first"),
            Rule::new(vec!["b".to_string()], MatchType::Exact, "second"),
        ];
        store
            .put_rules("acme", RuleKind::Auto, rules.clone())
            .await
            .unwrap();
        let read = store.rules("acme", RuleKind::Auto).await.unwrap();
        assert_eq!(read, rules);
    }

    #[tokio::test]
    async fn test_rules_empty_by_default() {
        let store = MemoryStore::new();
        assert!(store.rules("acme", RuleKind::Advanced).await.unwrap().is_empty());
    }

    // ---- Settings ----

    #[tokio::test]
    async fn test_settings_default_when_unset() {
        let store = MemoryStore::new();
        let settings = store.settings("acme").await.unwrap();
        assert_eq!(settings, WidgetSettings::default());
    }

    #[tokio::test]
    async fn test_set_operator_mode_persists() {
        let store = MemoryStore::new();
        store
            .set_operator_mode("acme", OperatorMode::Live)
            .await
            .unwrap();
        let settings = store.settings("acme").await.unwrap();
        assert_eq!(settings.operator_mode, OperatorMode::Live);
    }

    #[tokio::test]
    async fn test_set_online_persists() {
        let store = MemoryStore::new();
        store.set_online("acme", true).await.unwrap();
        assert!(store.settings("acme").await.unwrap().is_online);
        store.set_online("acme", false).await.unwrap();
        assert!(!store.settings("acme").await.unwrap().is_online);
    }

    // ---- Events ----

    #[tokio::test]
    async fn test_insert_emits_message_inserted() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe();
        let sid = Uuid::new_v4();
        let msg = message(sid, "hello");
        store.insert_message(&msg).await.unwrap();
        match rx.recv().await.unwrap() {
            ChatEvent::MessageInserted { message } => {
                assert_eq!(message.id, msg.id);
                assert_eq!(message.session_id, sid);
            }
            other => panic!("Unexpected event: {:?}", other.event_name()),
        }
    }

    #[tokio::test]
    async fn test_duplicate_insert_emits_once() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe();
        let msg = message(Uuid::new_v4(), "hello");
        store.insert_message(&msg).await.unwrap();
        store.insert_message(&msg).await.unwrap();
        assert!(rx.recv().await.is_ok());
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_settings_update_emits_event() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe();
        store.set_online("acme", true).await.unwrap();
        match rx.recv().await.unwrap() {
            ChatEvent::SettingsUpdated { tenant, settings, .. } => {
                assert_eq!(tenant, "acme");
                assert!(settings.is_online);
            }
            other => panic!("Unexpected event: {:?}", other.event_name()),
        }
    }

    #[tokio::test]
    async fn test_session_close_emits_event() {
        let store = MemoryStore::new();
        let session = store
            .find_or_create_session("acme", &VisitorId::generate())
            .await
            .unwrap();
        let mut rx = store.subscribe();
        store
            .update_session_status(session.id, SessionStatus::Closed)
            .await
            .unwrap();
        match rx.recv().await.unwrap() {
            ChatEvent::SessionStatusChanged {
                session_id, status, ..
            } => {
                assert_eq!(session_id, session.id);
                assert_eq!(status, SessionStatus::Closed);
            }
            other => panic!("Unexpected event: {:?}", other.event_name()),
        }
    }

    #[tokio::test]
    async fn test_put_rules_emits_event() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe();
        store
            .put_rules("acme", RuleKind::Advanced, vec![])
            .await
            .unwrap();
        match rx.recv().await.unwrap() {
            ChatEvent::RulesChanged { tenant, kind, .. } => {
                assert_eq!(tenant, "acme");
                assert_eq!(kind, RuleKind::Advanced);
            }
            other => panic!("Unexpected event: {:?}", other.event_name()),
        }
    }
}
