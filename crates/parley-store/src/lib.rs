//! The chat store: Parley's external keyed record store with change
//! notifications.
//!
//! The engine never owns durability. It reads and writes rules, settings,
//! sessions, and messages through the [`ChatStore`] trait, and observes
//! confirmed mutations through a broadcast event stream. Two
//! implementations ship here: an in-memory reference store and a
//! SQLite-backed store.

pub mod memory;
pub mod sqlite;
pub mod store;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{ChatStore, EventReceiver, EVENT_CHANNEL_CAPACITY};
