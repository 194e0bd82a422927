//! The `ChatStore` trait: what the engine requires of its record store.

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use parley_core::error::Result;
use parley_core::events::ChatEvent;
use parley_core::types::{
    Message, OperatorMode, Rule, RuleKind, Session, SessionStatus, VisitorId, WidgetSettings,
};

/// Buffered events per subscriber before lagging kicks in.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Receiving half of a store's change-notification stream.
pub type EventReceiver = broadcast::Receiver<ChatEvent>;

/// An external keyed record store with change notifications.
///
/// One ordered event stream exists per store; [`ChatStore::subscribe`]
/// hands out receivers and consumers filter by session id. Every mutation
/// made through this trait is echoed on the stream, including back to the
/// client that made it. Message ids are client-generated and reused as
/// store ids, so subscribers deduplicate echoes by id.
#[async_trait]
pub trait ChatStore: Send + Sync {
    // ---- Rules ----

    /// Read one of the tenant's rule tables, in stored order.
    async fn rules(&self, tenant: &str, kind: RuleKind) -> Result<Vec<Rule>>;

    /// Replace one of the tenant's rule tables (administrative edit).
    async fn put_rules(&self, tenant: &str, kind: RuleKind, rules: Vec<Rule>) -> Result<()>;

    // ---- Settings ----

    /// Read the tenant's widget settings; defaults when none are stored.
    async fn settings(&self, tenant: &str) -> Result<WidgetSettings>;

    /// Replace the tenant's widget settings.
    async fn update_settings(&self, tenant: &str, settings: WidgetSettings) -> Result<()>;

    /// Change only the operator mode.
    async fn set_operator_mode(&self, tenant: &str, mode: OperatorMode) -> Result<()>;

    /// Change only the operator online flag.
    async fn set_online(&self, tenant: &str, online: bool) -> Result<()>;

    // ---- Sessions ----

    /// Resume the visitor's open session, or create one.
    async fn find_or_create_session(&self, tenant: &str, visitor: &VisitorId) -> Result<Session>;

    /// Transition a session's lifecycle state.
    async fn update_session_status(&self, session_id: Uuid, status: SessionStatus) -> Result<()>;

    // ---- Messages ----

    /// Persist a message. The message's id becomes the store id verbatim.
    async fn insert_message(&self, message: &Message) -> Result<()>;

    /// Mark a message read, stamping `read_at`.
    async fn mark_read(&self, message_id: Uuid) -> Result<()>;

    /// All messages of a session, ordered by `(created_at, id)`.
    async fn messages(&self, session_id: Uuid) -> Result<Vec<Message>>;

    // ---- Notifications ----

    /// Subscribe to the store's change-notification stream.
    fn subscribe(&self) -> EventReceiver;
}
