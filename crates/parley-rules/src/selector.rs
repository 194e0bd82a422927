//! Responder selection: exactly one reply outcome per visitor message.
//!
//! Precedence is load-bearing and fixed: advanced rules, then auto rules,
//! then the AI capability, then a live-agent acknowledgement, then the
//! tenant's fallback message. Absence of a match is never an error.

use std::sync::Arc;

use tracing::{debug, warn};

use parley_core::types::{OperatorMode, Reply, Rule, Sender, WidgetSettings};

use crate::ai::AiResponder;
use crate::matcher::rule_matches;

/// Acknowledgement emitted when a live operator is online; the actual human
/// reply arrives later through the store's notification stream.
const LIVE_ACK: &str = "Thanks for reaching out! An agent will respond shortly.";

/// A per-invocation view of a tenant's rule tables, in stored order.
///
/// Read fresh from the store for every selection; nothing here is cached.
#[derive(Debug, Clone, Default)]
pub struct RuleSnapshot {
    pub auto: Vec<Rule>,
    pub advanced: Vec<Rule>,
}

impl RuleSnapshot {
    pub fn new(auto: Vec<Rule>, advanced: Vec<Rule>) -> Self {
        Self { auto, advanced }
    }

    pub fn is_empty(&self) -> bool {
        self.auto.is_empty() && self.advanced.is_empty()
    }
}

/// Picks the responder for each visitor message.
pub struct ResponderSelector {
    ai: Arc<dyn AiResponder>,
}

impl ResponderSelector {
    pub fn new(ai: Arc<dyn AiResponder>) -> Self {
        Self { ai }
    }

    /// Select exactly one reply for `content`.
    ///
    /// Pure selection: no persistence and no delay happen here; those are
    /// the session's responsibility.
    pub async fn select(
        &self,
        content: &str,
        rules: &RuleSnapshot,
        settings: &WidgetSettings,
    ) -> Reply {
        // 1. Advanced rules: the richer, administrator-curated path wins.
        if let Some(rule) = rules.advanced.iter().find(|r| rule_matches(content, r)) {
            debug!(rule_id = %rule.id, "Advanced rule matched");
            return Reply {
                text: rule.response.clone(),
                sender: Sender::Ai,
                is_html: rule.is_html,
            };
        }

        // 2. Auto rules: plain-text canned replies.
        if let Some(rule) = rules.auto.iter().find(|r| rule_matches(content, r)) {
            debug!(rule_id = %rule.id, "Auto rule matched");
            return Reply::plain(rule.response.clone(), Sender::Bot);
        }

        // 3. AI capability; failure falls through, never to the visitor.
        if settings.ai_enabled {
            match self.ai.complete(content, &settings.ai_context).await {
                Ok(text) => return Reply::plain(text, Sender::Ai),
                Err(e) => {
                    warn!(error = %e, "AI capability failed; falling through");
                }
            }
        }

        // 4. Live operator acknowledgement, only while actually online.
        if settings.operator_mode == OperatorMode::Live && settings.is_online {
            return Reply::plain(LIVE_ACK, Sender::Agent);
        }

        // 5. Fallback: selection is never "none".
        Reply::plain(settings.fallback_message.clone(), Sender::Bot)
    }
}

// =============================================================================
// Tests
// =============================================================================
