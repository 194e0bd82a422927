//! The embeddable widget runtime.
//!
//! An explicitly constructed surface handed to the UI layer by reference;
//! there is no ambient global instance. Construction validates the embed
//! configuration (the tenant identifier is the one hard requirement),
//! resumes or creates the visitor's session, hydrates the timeline, and
//! attaches the store subscription.

use std::sync::Arc;

use tracing::warn;

use parley_core::config::{TypingConfig, WidgetConfig};
use parley_core::types::{
    Message, OperatorMode, QuickAction, Session, VisitorId, WidgetSettings,
};
use parley_rules::AiResponder;
use parley_store::ChatStore;

use crate::error::EngineError;
use crate::session::ChatSession;

/// One visitor's widget: session, timeline, signals, operator controls.
pub struct WidgetRuntime {
    session: ChatSession,
}

impl WidgetRuntime {
    /// Initialize the widget for a visitor.
    ///
    /// Fails fast on a missing tenant identifier; no surface may exist
    /// without one. A settings read failure degrades to defaults; session
    /// creation failure aborts, since nothing works without a session row.
    pub async fn init(
        config: &WidgetConfig,
        store: Arc<dyn ChatStore>,
        ai: Arc<dyn AiResponder>,
        typing: &TypingConfig,
        visitor: VisitorId,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let tenant = config.tenant.trim().to_string();

        let mut settings = match store.settings(&tenant).await {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = %e, "Failed to load settings; using defaults");
                WidgetSettings::default()
            }
        };
        config.apply_overrides(&mut settings);

        let session = store.find_or_create_session(&tenant, &visitor).await?;

        let chat = ChatSession::new(
            tenant,
            store,
            ai,
            typing,
            config.clone(),
            session,
            settings,
        );
        chat.hydrate().await?;
        chat.attach_sync();
        Ok(Self { session: chat })
    }

    // ---- Visitor surface ----

    /// Handle a visitor message; returns the emitted reply.
    pub async fn submit_visitor_message(&self, content: &str) -> Result<Message, EngineError> {
        self.session.submit_visitor_message(content).await
    }

    /// Submit a quick action's canned message as the visitor.
    pub async fn submit_quick_action(
        &self,
        action: &QuickAction,
    ) -> Result<Message, EngineError> {
        self.session.submit_visitor_message(&action.message).await
    }

    /// Show the widget surface: clears the unread badge and emits the
    /// welcome message into an empty timeline.
    pub async fn open_widget(&self) {
        self.session.shared.set_open(true);
        self.session.shared.signals.clear_unread();
        self.session.welcome_if_empty().await;
    }

    /// Hide the widget surface.
    pub fn close_widget(&self) {
        self.session.shared.set_open(false);
    }

    /// Explicit visitor acknowledgement of new messages.
    pub fn acknowledge_unread(&self) {
        self.session.shared.signals.clear_unread();
    }

    // ---- Operator surface ----

    /// Switch the tenant's fallback responder family.
    pub async fn set_operator_mode(&self, mode: OperatorMode) -> Result<(), EngineError> {
        self.session
            .store
            .set_operator_mode(&self.session.shared.tenant, mode)
            .await?;
        let mut settings = self.session.shared.settings_snapshot();
        settings.operator_mode = mode;
        self.session.shared.set_settings(settings);
        Ok(())
    }

    /// Flip the operator's online flag; returns the new value.
    pub async fn toggle_online_status(&self) -> Result<bool, EngineError> {
        let online = !self.session.shared.settings_snapshot().is_online;
        self.session
            .store
            .set_online(&self.session.shared.tenant, online)
            .await?;
        let mut settings = self.session.shared.settings_snapshot();
        settings.is_online = online;
        self.session.shared.set_settings(settings);
        Ok(online)
    }

    /// Close the conversation. Terminal.
    pub async fn close_session(&self) -> Result<(), EngineError> {
        self.session.close().await
    }

    // ---- Read accessors ----

    pub fn timeline(&self) -> Vec<Message> {
        self.session.shared.timeline.snapshot()
    }

    pub fn settings(&self) -> WidgetSettings {
        self.session.shared.settings_snapshot()
    }

    pub fn session_info(&self) -> Session {
        self.session.shared.session()
    }

    pub fn is_typing(&self) -> bool {
        self.session.shared.signals.is_typing()
    }

    pub fn has_unread(&self) -> bool {
        self.session.shared.signals.has_unread()
    }

    pub fn is_open(&self) -> bool {
        self.session.shared.is_open()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use parley_core::types::{MatchType, Rule, RuleKind, Sender, SessionStatus};
    use parley_rules::CannedAiResponder;
    use parley_store::MemoryStore;
    use uuid::Uuid;

    fn fast_typing() -> TypingConfig {
        TypingConfig { delay_ms: 5 }
    }

    async fn widget_with_store(store: Arc<MemoryStore>) -> WidgetRuntime {
        WidgetRuntime::init(
            &WidgetConfig::for_tenant("acme"),
            store,
            Arc::new(CannedAiResponder),
            &fast_typing(),
            VisitorId::generate(),
        )
        .await
        .unwrap()
    }

    async fn widget() -> WidgetRuntime {
        widget_with_store(Arc::new(MemoryStore::new())).await
    }

    /// Poll until `check` passes or ~1s elapses.
    async fn wait_for(mut check: impl FnMut() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition never became true");
    }

    // ---- Initialization ----

    #[tokio::test]
    async fn test_init_requires_tenant() {
        let result = WidgetRuntime::init(
            &WidgetConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(CannedAiResponder),
            &fast_typing(),
            VisitorId::generate(),
        )
        .await;
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[tokio::test]
    async fn test_init_applies_display_overrides() {
        let config = WidgetConfig {
            tenant: "acme".to_string(),
            business_name: Some("Acme Corp".to_string()),
            ..WidgetConfig::default()
        };
        let runtime = WidgetRuntime::init(
            &config,
            Arc::new(MemoryStore::new()),
            Arc::new(CannedAiResponder),
            &fast_typing(),
            VisitorId::generate(),
        )
        .await
        .unwrap();
        assert_eq!(runtime.settings().business_name, "Acme Corp");
    }

    #[tokio::test]
    async fn test_init_resumes_existing_session_with_history() {
        let store = Arc::new(MemoryStore::new());
        let visitor = VisitorId::generate();
        let session = store
            .find_or_create_session("acme", &visitor)
            .await
            .unwrap();
        store
            .insert_message(&Message::new(
                session.id,
                "earlier conversation",
                Sender::User,
                false,
            ))
            .await
            .unwrap();

        let runtime = WidgetRuntime::init(
            &WidgetConfig::for_tenant("acme"),
            store,
            Arc::new(CannedAiResponder),
            &fast_typing(),
            visitor,
        )
        .await
        .unwrap();
        assert_eq!(runtime.session_info().id, session.id);
        assert_eq!(runtime.timeline().len(), 1);
        assert_eq!(runtime.timeline()[0].content, "earlier conversation");
    }

    // ---- Open / close / welcome ----

    #[tokio::test]
    async fn test_open_widget_emits_welcome_once() {
        let runtime = widget().await;
        runtime.open_widget().await;
        runtime.close_widget();
        runtime.open_widget().await;
        let timeline = runtime.timeline();
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline[0].sender, Sender::Bot);
        assert!(runtime.is_open());
    }

    #[tokio::test]
    async fn test_open_widget_skips_welcome_with_history() {
        let store = Arc::new(MemoryStore::new());
        let visitor = VisitorId::generate();
        let session = store
            .find_or_create_session("acme", &visitor)
            .await
            .unwrap();
        store
            .insert_message(&Message::new(session.id, "hi", Sender::User, false))
            .await
            .unwrap();

        let runtime = WidgetRuntime::init(
            &WidgetConfig::for_tenant("acme"),
            store,
            Arc::new(CannedAiResponder),
            &fast_typing(),
            visitor,
        )
        .await
        .unwrap();
        runtime.open_widget().await;
        assert_eq!(runtime.timeline().len(), 1);
    }

    // ---- Unread badge ----

    #[tokio::test]
    async fn test_reply_while_closed_sets_unread_and_open_clears() {
        let runtime = widget().await;
        assert!(!runtime.has_unread());
        runtime.submit_visitor_message("hello").await.unwrap();
        assert!(runtime.has_unread());
        runtime.open_widget().await;
        assert!(!runtime.has_unread());
    }

    #[tokio::test]
    async fn test_reply_while_open_leaves_unread_clear() {
        let runtime = widget().await;
        runtime.open_widget().await;
        runtime.submit_visitor_message("hello").await.unwrap();
        assert!(!runtime.has_unread());
    }

    #[tokio::test]
    async fn test_remote_agent_message_sets_unread_when_closed() {
        let store = Arc::new(MemoryStore::new());
        let runtime = widget_with_store(store.clone()).await;
        let sid = runtime.session_info().id;

        // A human operator replies from the dashboard.
        store
            .insert_message(&Message::new(
                sid,
                "Agent here, how can I help?",
                Sender::Agent,
                false,
            ))
            .await
            .unwrap();

        wait_for(|| runtime.timeline().len() == 1).await;
        assert!(runtime.has_unread());
        assert_eq!(runtime.timeline()[0].sender, Sender::Agent);
    }

    // ---- Timeline reconciliation ----

    #[tokio::test]
    async fn test_store_echo_does_not_duplicate_optimistic_insert() {
        let runtime = widget().await;
        runtime.submit_visitor_message("hello").await.unwrap();
        // Give the subscription consumer time to deliver the echoes.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let timeline = runtime.timeline();
        assert_eq!(timeline.len(), 2);
        let mut ids = std::collections::HashSet::new();
        for msg in &timeline {
            assert!(ids.insert(msg.id), "duplicate message id in timeline");
        }
    }

    #[tokio::test]
    async fn test_messages_for_other_sessions_are_ignored() {
        let store = Arc::new(MemoryStore::new());
        let runtime = widget_with_store(store.clone()).await;
        store
            .insert_message(&Message::new(
                Uuid::new_v4(),
                "different conversation",
                Sender::Agent,
                false,
            ))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(runtime.timeline().is_empty());
        assert!(!runtime.has_unread());
    }

    #[tokio::test]
    async fn test_remote_close_rejects_further_messages() {
        let store = Arc::new(MemoryStore::new());
        let runtime = widget_with_store(store.clone()).await;
        let sid = runtime.session_info().id;

        store
            .update_session_status(sid, SessionStatus::Closed)
            .await
            .unwrap();
        wait_for(|| runtime.session_info().is_closed()).await;

        let result = runtime.submit_visitor_message("still there?").await;
        assert!(matches!(result, Err(EngineError::SessionClosed(_))));
    }

    #[tokio::test]
    async fn test_remote_settings_update_applies_with_overrides() {
        let store = Arc::new(MemoryStore::new());
        let config = WidgetConfig {
            tenant: "acme".to_string(),
            business_name: Some("Override Name".to_string()),
            ..WidgetConfig::default()
        };
        let runtime = WidgetRuntime::init(
            &config,
            store.clone(),
            Arc::new(CannedAiResponder),
            &fast_typing(),
            VisitorId::generate(),
        )
        .await
        .unwrap();

        let mut settings = WidgetSettings::default();
        settings.business_name = "Stored Name".to_string();
        settings.is_online = true;
        store.update_settings("acme", settings).await.unwrap();

        wait_for(|| runtime.settings().is_online).await;
        // Stored change landed, but the embed override still wins.
        assert_eq!(runtime.settings().business_name, "Override Name");
    }

    #[tokio::test]
    async fn test_mark_read_propagates_to_timeline() {
        let store = Arc::new(MemoryStore::new());
        let runtime = widget_with_store(store.clone()).await;
        let reply = runtime.submit_visitor_message("hello").await.unwrap();

        store.mark_read(reply.id).await.unwrap();
        wait_for(|| {
            runtime
                .timeline()
                .iter()
                .any(|m| m.id == reply.id && m.read_at.is_some())
        })
        .await;
    }

    // ---- Operator controls ----

    #[tokio::test]
    async fn test_set_operator_mode_round_trips() {
        let store = Arc::new(MemoryStore::new());
        let runtime = widget_with_store(store.clone()).await;
        runtime.set_operator_mode(OperatorMode::Live).await.unwrap();
        assert_eq!(runtime.settings().operator_mode, OperatorMode::Live);
        assert_eq!(
            store.settings("acme").await.unwrap().operator_mode,
            OperatorMode::Live
        );
    }

    #[tokio::test]
    async fn test_toggle_online_status_flips() {
        let runtime = widget().await;
        assert!(runtime.toggle_online_status().await.unwrap());
        assert!(runtime.settings().is_online);
        assert!(!runtime.toggle_online_status().await.unwrap());
        assert!(!runtime.settings().is_online);
    }

    #[tokio::test]
    async fn test_live_mode_online_gets_agent_ack() {
        let runtime = widget().await;
        runtime.set_operator_mode(OperatorMode::Live).await.unwrap();
        runtime.toggle_online_status().await.unwrap(); // now online
        let reply = runtime.submit_visitor_message("need a human").await.unwrap();
        assert_eq!(reply.sender, Sender::Agent);
    }

    #[tokio::test]
    async fn test_live_mode_offline_falls_back() {
        let runtime = widget().await;
        runtime.set_operator_mode(OperatorMode::Live).await.unwrap();
        let reply = runtime.submit_visitor_message("need a human").await.unwrap();
        assert_eq!(reply.sender, Sender::Bot);
        assert_eq!(reply.content, WidgetSettings::default().fallback_message);
    }

    // ---- Rules end to end ----

    #[tokio::test]
    async fn test_advanced_rule_precedence_end_to_end() {
        let store = Arc::new(MemoryStore::new());
        store
            .put_rules(
                "acme",
                RuleKind::Auto,
                vec![Rule::new(
                    vec!["hours".to_string()],
                    MatchType::Fuzzy,
                    "We are open 9-5.",
                )],
            )
            .await
            .unwrap();
        store
            .put_rules(
                "acme",
                RuleKind::Advanced,
                vec![Rule::new_html(
                    vec!["hours".to_string()],
                    MatchType::Fuzzy,
                    "<b>Open 9-5, Mon-Fri</b>",
                )],
            )
            .await
            .unwrap();

        let runtime = widget_with_store(store).await;
        let reply = runtime
            .submit_visitor_message("what are your hours?")
            .await
            .unwrap();
        assert_eq!(reply.content, "<b>Open 9-5, Mon-Fri</b>");
        assert_eq!(reply.sender, Sender::Ai);
        assert!(reply.is_html);
    }

    // ---- Quick actions ----

    #[tokio::test]
    async fn test_quick_action_submits_as_user() {
        let runtime = widget().await;
        let action = runtime.settings().quick_actions[0].clone();
        runtime.submit_quick_action(&action).await.unwrap();
        let timeline = runtime.timeline();
        assert_eq!(timeline[0].sender, Sender::User);
        assert_eq!(timeline[0].content, action.message);
    }
}
