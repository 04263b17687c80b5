//! Intent Classifier
//!
//! Classifies user inputs as either:
//! - Expense: free text describing money that moved (e.g., "lunch 250", "gave Raj 500")
//! - Query: questions about the ledger (e.g., "how much did I spend on food?")

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Expense,
    Query,
}

/// Words that mark a question about the ledger.
const QUERY_KEYWORDS: &[&str] = &[
    "how much", "total", "spent", "what", "when", "who", "show", "list", "tell", "calculate",
];

lazy_static! {
    static ref QUERY_PATTERN: Regex = Regex::new(&format!(
        r"(?i)\b(?:{})\b",
        QUERY_KEYWORDS.join("|")
    ))
    .expect("query keyword pattern is valid");
}

/// Intent classifier
pub struct IntentClassifier;

impl IntentClassifier {
    /// Query keywords win over digits; otherwise a digit means an expense.
    pub fn classify(text: &str) -> Intent {
        if QUERY_PATTERN.is_match(text) {
            Intent::Query
        } else if text.chars().any(|c| c.is_ascii_digit()) {
            Intent::Expense
        } else {
            Intent::Query
        }
    }
}
