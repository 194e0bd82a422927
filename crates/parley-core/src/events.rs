use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Message, MessageStatus, RuleKind, SessionStatus, WidgetSettings};

/// Change notifications emitted by the chat store.
///
/// The store publishes one ordered stream per tenant; consumers (the
/// timeline synchronizer, operator dashboards) subscribe and filter by
/// session. Every mutation that a widget can observe in real time has a
/// corresponding event here.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ChatEvent {
    /// A message row was committed. Includes rows echoing the subscriber's
    /// own optimistic inserts; the message id is the deduplication key.
    MessageInserted { message: Message },

    /// A message's delivery status changed (`sent` -> `delivered` -> `read`).
    MessageStatusChanged {
        message_id: Uuid,
        session_id: Uuid,
        status: MessageStatus,
        read_at: Option<DateTime<Utc>>,
        timestamp: DateTime<Utc>,
    },

    /// A session transitioned lifecycle state (administrator close).
    SessionStatusChanged {
        session_id: Uuid,
        status: SessionStatus,
        timestamp: DateTime<Utc>,
    },

    /// Tenant settings changed; `operator_mode` and `is_online` take effect
    /// on the next routing decision.
    SettingsUpdated {
        tenant: String,
        settings: WidgetSettings,
        timestamp: DateTime<Utc>,
    },

    /// A rule table was edited by an administrator.
    RulesChanged {
        tenant: String,
        kind: RuleKind,
        timestamp: DateTime<Utc>,
    },
}

impl ChatEvent {
    /// Returns the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ChatEvent::MessageInserted { message } => message.created_at,
            ChatEvent::MessageStatusChanged { timestamp, .. }
            | ChatEvent::SessionStatusChanged { timestamp, .. }
            | ChatEvent::SettingsUpdated { timestamp, .. }
            | ChatEvent::RulesChanged { timestamp, .. } => *timestamp,
        }
    }

    /// Returns the session this event is scoped to, if any.
    ///
    /// Settings and rule edits are tenant-wide and return `None`.
    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            ChatEvent::MessageInserted { message } => Some(message.session_id),
            ChatEvent::MessageStatusChanged { session_id, .. }
            | ChatEvent::SessionStatusChanged { session_id, .. } => Some(*session_id),
            ChatEvent::SettingsUpdated { .. } | ChatEvent::RulesChanged { .. } => None,
        }
    }

    /// Returns a stable event name for logging.
    pub fn event_name(&self) -> &'static str {
        match self {
            ChatEvent::MessageInserted { .. } => "message_inserted",
            ChatEvent::MessageStatusChanged { .. } => "message_status_changed",
            ChatEvent::SessionStatusChanged { .. } => "session_status_changed",
            ChatEvent::SettingsUpdated { .. } => "settings_updated",
            ChatEvent::RulesChanged { .. } => "rules_changed",
        }
    }
}
