//! The external AI capability seam.
//!
//! Actual model invocation is out of scope; the engine only depends on this
//! trait and ships a deterministic stand-in.

use async_trait::async_trait;

use parley_core::error::Result;

/// A text-completion capability consulted when no rule matched and the
/// tenant has AI mode enabled.
///
/// Implementations are fallible; the responder selector catches every error
/// and falls through to the next responder in the chain.
#[async_trait]
pub trait AiResponder: Send + Sync {
    /// Produce a reply to `content`, given the tenant's business context.
    async fn complete(&self, content: &str, context: &str) -> Result<String>;
}

/// Deterministic AI stand-in used when no real model is wired up.
#[derive(Debug, Default, Clone)]
pub struct CannedAiResponder;

#[async_trait]
impl AiResponder for CannedAiResponder {
    async fn complete(&self, content: &str, context: &str) -> Result<String> {
        let _ = content;
        if context.trim().is_empty() {
            Ok("I understand your message and I'm here to help.".to_string())
        } else {
            Ok(format!(
                "I understand your message and I'm here to help. For reference: {}",
                context.trim()
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_canned_responder_without_context() {
        let ai = CannedAiResponder;
        let reply = ai.complete("what are your prices?", "").await.unwrap();
        assert!(reply.contains("here to help"));
    }

    #[tokio::test]
    async fn test_canned_responder_includes_context() {
        let ai = CannedAiResponder;
        let reply = ai
            .complete("when do you open?", "Open 9-5 on weekdays")
            .await
            .unwrap();
        assert!(reply.contains("Open 9-5 on weekdays"));
    }

    #[tokio::test]
    async fn test_canned_responder_is_deterministic() {
        let ai = CannedAiResponder;
        let a = ai.complete("hi", "ctx").await.unwrap();
        let b = ai.complete("hi", "ctx").await.unwrap();
        assert_eq!(a, b);
    }
}
