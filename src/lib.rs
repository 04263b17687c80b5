//! Ledger Chat
//!
//! A conversational ledger that:
//! - Classifies each chat line as a transaction or a question
//! - Sends transactions to a parsing gateway and questions to a chat gateway
//! - Saves confident transactions straight to the ledger
//! - Asks the user to confirm ambiguous ones (category, then direction for loans)
//! - Keeps a durable, append-only timeline per session
//!
//! TURN LOOP:
//! TEXT → CLASSIFY → GATEWAY → RESOLVE → CONFIRM? → SAVE

pub mod api;
pub mod classifier;
pub mod config;
pub mod confirmation;
pub mod conversational;
pub mod error;
pub mod gateway;
pub mod inference;
pub mod ledger;
pub mod memory;
pub mod models;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use classifier::{Intent, IntentClassifier};
pub use confirmation::{Choice, ConversationState, Effect, Event, Stage};
pub use conversational::{Conversation, Services, Turn};
