//! Person and direction inference
//!
//! Pure heuristics used when the user says a transaction is a loan: find the
//! person on the other side, and look for hints about which way the money went.

use crate::models::{title_case, Candidate};

/// Words that are never a counterpart name.
const STOPWORDS: &[&str] = &[
    "i", "me", "my", "to", "from", "for", "on", "in", "at", "the", "a", "an",
    "send", "sent", "gave", "given", "lent", "borrowed", "took", "paid",
    "loan", "transaction", "transfer", "money", "cash", "online", "upi",
];

/// Extract the first plausible person name from free text.
///
/// Tokens are stripped to ASCII letters; anything of two letters or fewer,
/// or a stopword, is skipped. The survivor is title-cased.
pub fn infer_counterpart(text: &str) -> Option<String> {
    text.split_whitespace()
        .map(|token| {
            token
                .chars()
                .filter(char::is_ascii_alphabetic)
                .collect::<String>()
        })
        .find(|word| word.len() > 2 && !STOPWORDS.contains(&word.to_lowercase().as_str()))
        .map(|word| title_case(&word))
}

/// Keyword hints about the direction of a person-to-person transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectionHints {
    /// Money went from the user to the other person.
    pub toward_other: bool,
    /// Money came from the other person.
    pub from_other: bool,
}

impl DirectionHints {
    /// Hints found in either the item or the remarks of a candidate.
    pub fn for_candidate(candidate: &Candidate) -> Self {
        infer_direction_hints(&candidate.item).merge(infer_direction_hints(&candidate.remarks))
    }

    pub fn merge(self, other: DirectionHints) -> Self {
        Self {
            toward_other: self.toward_other || other.toward_other,
            from_other: self.from_other || other.from_other,
        }
    }
}

pub fn infer_direction_hints(text: &str) -> DirectionHints {
    let lowered = text.to_lowercase();

    DirectionHints {
        toward_other: lowered.contains("i gave") || lowered.contains("to person"),
        // " from " is covered by the bare substring
        from_other: lowered.contains("from"),
    }
}
