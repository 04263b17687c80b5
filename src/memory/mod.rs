//! Conversation memory
//!
//! The timeline of a chat session and the backends that keep it across restarts.

pub mod backend;
pub mod store;

pub use backend::{FileTimelineStore, InMemoryTimelineStore, PgTimelineStore, TimelineStore};
pub use store::{Author, Message, Timeline};
