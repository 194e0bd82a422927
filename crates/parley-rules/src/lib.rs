//! Rule matching and responder selection for Parley.
//!
//! Classifies visitor messages against ordered keyword rule sets and picks
//! exactly one responder per message: advanced rule, auto rule, the AI
//! capability, a live-agent acknowledgement, or the fallback message.

pub mod ai;
pub mod matcher;
pub mod selector;

pub use ai::{AiResponder, CannedAiResponder};
pub use matcher::rule_matches;
pub use selector::{ResponderSelector, RuleSnapshot};
