//! Error types for the conversation engine.

use parley_core::error::ParleyError;
use uuid::Uuid;

/// Errors from the conversation engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("session {0} is closed")]
    SessionClosed(Uuid),
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("storage error: {0}")]
    Storage(String),
    #[error("AI capability error: {0}")]
    Ai(String),
}

impl From<ParleyError> for EngineError {
    fn from(err: ParleyError) -> Self {
        match err {
            ParleyError::Config(msg) => EngineError::Config(msg),
            ParleyError::Ai(msg) => EngineError::Ai(msg),
            other => EngineError::Storage(other.to_string()),
        }
    }
}
