//! Shared domain model for the Parley chat widget engine.
//!
//! Defines the message/session/rule/settings types, the change-notification
//! event stream, the top-level error type, and TOML configuration.

pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::ParleyConfig;
pub use error::{ParleyError, Result};
pub use events::ChatEvent;
pub use types::*;
