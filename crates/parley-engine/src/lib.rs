//! The Parley conversation engine.
//!
//! Owns one visitor's conversation: the session lifecycle, the optimistic
//! message timeline reconciled against the store's notification stream,
//! responder selection with simulated typing, and the transient typing /
//! unread / open signals the widget surface renders.

pub mod error;
pub mod session;
pub mod signals;
pub mod timeline;
pub mod widget;

pub use error::EngineError;
pub use session::ChatSession;
pub use signals::SessionSignals;
pub use timeline::{Timeline, TimelineSync};
pub use widget::WidgetRuntime;
