//! Conversation timeline
//!
//! Ordered, append-only log of what was said in a session and what the
//! resolver asked back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::confirmation::{Choice, PendingConfirmation};
use crate::models::Candidate;

/// Who produced a message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Author {
    User,
    Assistant,
    Confirmation,
}

/// A single entry in the timeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub author: Author,
    pub text: String,
    /// Candidates shown with a confirmation prompt
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<Candidate>,
    /// Batch this prompt belongs to; choices must quote it back
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<Choice>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn new(author: Author, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            author,
            text: text.into(),
            candidates: Vec::new(),
            pending_id: None,
            choices: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Author::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Author::Assistant, text)
    }

    /// Prompt asking the user to settle a pending batch.
    pub fn confirmation(
        text: impl Into<String>,
        pending: &PendingConfirmation,
        choices: Vec<Choice>,
    ) -> Self {
        Self {
            candidates: pending.candidates.clone(),
            pending_id: Some(pending.id),
            choices,
            ..Self::new(Author::Confirmation, text)
        }
    }
}

/// Timeline for one session
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Timeline {
    messages: Vec<Message>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    /// Messages appended at or after `index`
    pub fn since(&self, index: usize) -> &[Message] {
        self.messages.get(index..).unwrap_or(&[])
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse stored content. Anything unreadable yields an empty timeline.
    pub fn from_json(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return Self::new();
        }

        match serde_json::from_str(raw) {
            Ok(timeline) => timeline,
            Err(error) => {
                warn!("Stored timeline is unreadable, starting empty: {}", error);
                Self::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirmation::{CategoryChoice, Stage};
    use crate::models::Category;
    use rust_decimal::Decimal;

    fn sample_timeline() -> Timeline {
        let pending = PendingConfirmation::new(vec![
            Candidate::new(Decimal::new(12550, 2), "momo", Category::Other, "momo with Hari"),
        ]);

        let mut timeline = Timeline::new();
        timeline.push(Message::user("momo 125.50"));
        timeline.push(Message::assistant("CONFIRM: Rs.125.50"));
        timeline.push(Message::confirmation(
            "I'm not sure where to save this. Please choose:",
            &pending,
            vec![Choice::Category { category: CategoryChoice::Loan }, Choice::Cancel],
        ));
        timeline.push(Message::assistant("Cancelled"));
        timeline
    }

    #[test]
    fn test_round_trip_preserves_order() {
        let timeline = sample_timeline();
        let json = timeline.to_json().unwrap();
        let restored = Timeline::from_json(&json);

        assert_eq!(restored, timeline);
        let authors: Vec<Author> = restored.messages().map(|m| m.author).collect();
        assert_eq!(
            authors,
            vec![Author::User, Author::Assistant, Author::Confirmation, Author::Assistant]
        );
    }

    #[test]
    fn test_corrupt_storage_is_empty() {
        assert!(Timeline::from_json("{not json").is_empty());
        assert!(Timeline::from_json(r#"{"messages": 3}"#).is_empty());
        assert!(Timeline::from_json("").is_empty());
    }

    #[test]
    fn test_confirmation_message_carries_batch() {
        let pending = PendingConfirmation::new(vec![Candidate::new(
            Decimal::from(500),
            "item",
            Category::Other,
            "",
        )]);
        assert_eq!(pending.stage(), Stage::AwaitingCategory);

        let message = Message::confirmation("choose", &pending, vec![Choice::Cancel]);
        assert_eq!(message.author, Author::Confirmation);
        assert_eq!(message.pending_id, Some(pending.id));
        assert_eq!(message.candidates.len(), 1);
    }

    #[test]
    fn test_since() {
        let timeline = sample_timeline();
        assert_eq!(timeline.since(2).len(), 2);
        assert!(timeline.since(10).is_empty());
    }
}
