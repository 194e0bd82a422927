use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Enums
// =============================================================================

/// How a rule's keywords are compared against visitor input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    /// Any keyword equals the entire (trimmed, lowercased) message.
    Exact,
    /// Any keyword is a substring of the message.
    Fuzzy,
    /// Any keyword is a case-insensitive regex matching the raw message.
    Regex,
    /// Any keyword equals a whole whitespace-delimited token of the message.
    Synonym,
    /// Placeholder for unknown store values; never matches anything.
    Unmatched,
}

impl MatchType {
    /// Parse a match type as stored by the administrative layer.
    ///
    /// Unknown values map to [`MatchType::Unmatched`] and are logged as a
    /// data-integrity issue rather than failing the row.
    pub fn from_store(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "exact" => MatchType::Exact,
            "fuzzy" => MatchType::Fuzzy,
            "regex" => MatchType::Regex,
            "synonym" => MatchType::Synonym,
            other => {
                tracing::warn!(match_type = other, "Unknown match type in rule store");
                MatchType::Unmatched
            }
        }
    }

    /// Stable string form, matching the store's column values.
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Exact => "exact",
            MatchType::Fuzzy => "fuzzy",
            MatchType::Regex => "regex",
            MatchType::Synonym => "synonym",
            MatchType::Unmatched => "unmatched",
        }
    }
}

/// Which rule table a query reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Plain-text canned replies, evaluated after advanced rules.
    Auto,
    /// HTML-capable replies, evaluated first.
    Advanced,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::Auto => "auto",
            RuleKind::Advanced => "advanced",
        }
    }
}

/// The logical entity credited with a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    /// The visitor.
    User,
    /// Canned auto-rule or fallback replies.
    Bot,
    /// Advanced-rule or AI-generated replies.
    Ai,
    /// A live human operator.
    Agent,
    /// Engine-generated notices.
    System,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Bot => "bot",
            Sender::Ai => "ai",
            Sender::Agent => "agent",
            Sender::System => "system",
        }
    }
}

/// Session lifecycle state. `Closed` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Closed => "closed",
        }
    }
}

/// Tenant-wide responder family used when no rule matches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorMode {
    /// Canned rules and fallback only.
    #[default]
    Auto,
    /// AI stand-in answers unmatched messages.
    Ai,
    /// A human operator answers when online.
    Live,
}

impl OperatorMode {
    /// Parse an operator mode as stored by the administrative layer.
    pub fn from_store(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "auto" => Some(OperatorMode::Auto),
            "ai" => Some(OperatorMode::Ai),
            "live" => Some(OperatorMode::Live),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperatorMode::Auto => "auto",
            OperatorMode::Ai => "ai",
            OperatorMode::Live => "live",
        }
    }
}

/// Delivery status of a persisted message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

// =============================================================================
// Newtypes
// =============================================================================

/// Stable per-browser visitor identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VisitorId(pub String);

impl VisitorId {
    /// Generate a fresh random visitor identifier.
    pub fn generate() -> Self {
        VisitorId(format!("visitor-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VisitorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Rules
// =============================================================================

/// A keyword-triggered reply rule. Read-only to the engine; administrators
/// create and edit rules out-of-band through the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: Uuid,
    /// Keywords compared case-insensitively.
    pub keywords: Vec<String>,
    pub match_type: MatchType,
    pub response: String,
    /// Advanced rules may carry sanitized HTML; auto rules never do.
    pub is_html: bool,
}

impl Rule {
    /// Convenience constructor for a plain-text rule.
    pub fn new(keywords: Vec<String>, match_type: MatchType, response: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            keywords,
            match_type,
            response: response.into(),
            is_html: false,
        }
    }

    /// Convenience constructor for an HTML-capable advanced rule.
    pub fn new_html(
        keywords: Vec<String>,
        match_type: MatchType,
        response: impl Into<String>,
    ) -> Self {
        Self {
            is_html: true,
            ..Self::new(keywords, match_type, response)
        }
    }
}

// =============================================================================
// Messages
// =============================================================================

/// A single timeline entry.
///
/// Immutable once persisted except for `status`/`read_at` transitions.
/// `id` is globally unique and serves as the deduplication key; within a
/// session, messages are totally ordered by `(created_at, id)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub session_id: Uuid,
    pub content: String,
    pub sender: Sender,
    pub is_html: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Build a new message with a client-generated id.
    ///
    /// The id is reused verbatim as the store id, so the store's
    /// change-notification echo of this message dedups to a no-op.
    pub fn new(
        session_id: Uuid,
        content: impl Into<String>,
        sender: Sender,
        is_html: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            content: content.into(),
            sender,
            is_html,
            created_at: Utc::now(),
            status: Some(MessageStatus::Sent),
            read_at: None,
        }
    }

    /// Ordering key within a session: `created_at`, then `id` as tiebreak.
    pub fn sort_key(&self) -> (DateTime<Utc>, Uuid) {
        (self.created_at, self.id)
    }
}

// =============================================================================
// Sessions
// =============================================================================

/// One visitor's conversation lifecycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub visitor_id: VisitorId,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    /// Administrative metadata, set from the operator dashboard.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visitor_name: Option<String>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Session {
    /// Create a fresh active session for a visitor.
    pub fn new(visitor_id: VisitorId) -> Self {
        Self {
            id: Uuid::new_v4(),
            visitor_id,
            status: SessionStatus::Active,
            created_at: Utc::now(),
            visitor_name: None,
            pinned: false,
            notes: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.status == SessionStatus::Closed
    }
}

// =============================================================================
// Settings
// =============================================================================

/// A canned visitor prompt rendered as a button in the widget.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuickAction {
    pub id: String,
    pub label: String,
    /// Submitted as an ordinary visitor message when clicked.
    pub message: String,
}

/// Per-tenant widget settings. Mutable by administrators; `operator_mode`
/// and `is_online` affect routing decisions in real time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WidgetSettings {
    pub business_name: String,
    pub representative_name: String,
    pub primary_color: String,
    pub secondary_color: String,
    pub welcome_message: String,
    pub fallback_message: String,
    pub quick_actions: Vec<QuickAction>,
    pub ai_enabled: bool,
    pub ai_model: String,
    /// Free-form business context handed to the AI capability.
    pub ai_context: String,
    pub operator_mode: OperatorMode,
    pub is_online: bool,
}

impl Default for WidgetSettings {
    fn default() -> Self {
        Self {
            business_name: "My Business".to_string(),
            representative_name: "Support Agent".to_string(),
            primary_color: "#2563eb".to_string(),
            secondary_color: "#1d4ed8".to_string(),
            welcome_message: "\u{1f44b} Welcome! How can we help you today?".to_string(),
            fallback_message: "We've received your message and will get back to you soon!"
                .to_string(),
            quick_actions: vec![
                QuickAction {
                    id: "1".to_string(),
                    label: "Pricing".to_string(),
                    message: "I would like to know about your pricing.".to_string(),
                },
                QuickAction {
                    id: "2".to_string(),
                    label: "Support".to_string(),
                    message: "I need technical support.".to_string(),
                },
                QuickAction {
                    id: "3".to_string(),
                    label: "Features".to_string(),
                    message: "What features do you offer?".to_string(),
                },
            ],
            ai_enabled: false,
            ai_model: "canned-v1".to_string(),
            ai_context: String::new(),
            operator_mode: OperatorMode::Auto,
            is_online: false,
        }
    }
}

// =============================================================================
// Reply
// =============================================================================

/// A responder selection outcome. Selection always produces exactly one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub text: String,
    pub sender: Sender,
    pub is_html: bool,
}

impl Reply {
    /// Plain-text reply credited to the given sender.
    pub fn plain(text: impl Into<String>, sender: Sender) -> Self {
        Self {
            text: text.into(),
            sender,
            is_html: false,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
