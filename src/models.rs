//! Core data models for the conversational ledger

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

//
// ================= Category =================
//

/// Closed set of ledger categories. Anything the parser sends that is not
/// recognised collapses to `Other`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(from = "String", into = "String")]
pub enum Category {
    Food,
    Transport,
    Groceries,
    Shopping,
    Utilities,
    Electronics,
    Medical,
    Entertainment,
    Accommodation,
    Rent,
    Loan,
    Income,
    Education,
    Travel,
    PersonalCare,
    Gifts,
    Finance,
    Maintenance,
    Fitness,
    Other,
}

impl Category {
    /// Category applied when the user confirms a generic expense.
    pub const DEFAULT_EXPENSE: Category = Category::Food;

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Food => "Food",
            Category::Transport => "Transport",
            Category::Groceries => "Groceries",
            Category::Shopping => "Shopping",
            Category::Utilities => "Utilities",
            Category::Electronics => "Electronics",
            Category::Medical => "Medical",
            Category::Entertainment => "Entertainment",
            Category::Accommodation => "Accommodation",
            Category::Rent => "Rent",
            Category::Loan => "Loan",
            Category::Income => "Income",
            Category::Education => "Education",
            Category::Travel => "Travel",
            Category::PersonalCare => "Personal Care",
            Category::Gifts => "Gifts",
            Category::Finance => "Finance",
            Category::Maintenance => "Maintenance",
            Category::Fitness => "Fitness",
            Category::Other => "Other",
        }
    }

    /// Case-insensitive lookup; unknown names map to `Other`.
    pub fn normalize(raw: &str) -> Category {
        let key: String = raw
            .trim()
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .collect::<String>()
            .to_lowercase();

        match key.as_str() {
            "food" => Category::Food,
            "transport" => Category::Transport,
            "groceries" | "grocery" => Category::Groceries,
            "shopping" => Category::Shopping,
            "utilities" => Category::Utilities,
            "electronics" => Category::Electronics,
            "medical" => Category::Medical,
            "entertainment" => Category::Entertainment,
            "accommodation" => Category::Accommodation,
            "rent" => Category::Rent,
            "loan" => Category::Loan,
            "income" => Category::Income,
            "education" => Category::Education,
            "travel" => Category::Travel,
            "personalcare" => Category::PersonalCare,
            "gifts" => Category::Gifts,
            "finance" => Category::Finance,
            "maintenance" => Category::Maintenance,
            "fitness" => Category::Fitness,
            _ => Category::Other,
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        *self == Category::Other
    }
}

impl From<String> for Category {
    fn from(raw: String) -> Self {
        Category::normalize(&raw)
    }
}

impl From<Category> for String {
    fn from(category: Category) -> Self {
        category.as_str().to_string()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

//
// ================= Candidate =================
//

/// A transaction proposed by the parser gateway.
///
/// Deserialization never fails on a missing or oddly typed field; each one
/// falls back to a safe default instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawCandidate")]
pub struct Candidate {
    pub amount: Decimal,
    pub item: String,
    pub category: Category,
    pub remarks: String,
    #[serde(rename = "paid_by", skip_serializing_if = "Option::is_none")]
    pub counterpart: Option<String>,
}

impl Candidate {
    pub fn new(amount: Decimal, item: &str, category: Category, remarks: &str) -> Self {
        Self {
            amount,
            item: item.to_string(),
            category,
            remarks: remarks.to_string(),
            counterpart: None,
        }
    }

    pub fn with_counterpart(mut self, counterpart: &str) -> Self {
        self.counterpart = Some(counterpart.to_string());
        self
    }

    /// Text used for counterpart inference: remarks first, item as fallback.
    pub fn description(&self) -> &str {
        if self.remarks.is_empty() {
            &self.item
        } else {
            &self.remarks
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawCandidate {
    #[serde(default)]
    amount: Value,
    #[serde(default)]
    item: Value,
    #[serde(default)]
    category: Value,
    #[serde(default)]
    remarks: Value,
    #[serde(default, alias = "counterpart")]
    paid_by: Value,
}

impl From<RawCandidate> for Candidate {
    fn from(raw: RawCandidate) -> Self {
        let category = lenient_string(&raw.category)
            .map(|c| Category::normalize(&c))
            .unwrap_or(Category::Other);

        Self {
            amount: lenient_decimal(&raw.amount),
            item: lenient_string(&raw.item).unwrap_or_else(|| "item".to_string()),
            category,
            remarks: lenient_string(&raw.remarks).unwrap_or_default(),
            counterpart: lenient_string(&raw.paid_by).map(|p| p.trim().to_string()),
        }
    }
}

/// Non-empty string view of a JSON value (numbers are stringified).
fn lenient_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn lenient_decimal(value: &Value) -> Decimal {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .unwrap_or(Decimal::ZERO),
        Value::String(s) => Decimal::from_str(s.trim()).unwrap_or(Decimal::ZERO),
        _ => Decimal::ZERO,
    }
}

/// Response of the parse endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParseResult {
    #[serde(default)]
    pub expenses: Vec<Candidate>,
    #[serde(default)]
    pub reply: String,
}

//
// ================= Finalized =================
//

/// A resolved transaction, ready for the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizedTransaction {
    pub amount: Decimal,
    pub item: String,
    pub category: Category,
    pub remarks: String,
    #[serde(rename = "paid_by", default, skip_serializing_if = "Option::is_none")]
    pub counterpart: Option<String>,
}

impl From<Candidate> for FinalizedTransaction {
    fn from(candidate: Candidate) -> Self {
        Self {
            amount: candidate.amount,
            item: candidate.item,
            category: candidate.category,
            remarks: candidate.remarks,
            counterpart: candidate.counterpart,
        }
    }
}

//
// ================= User Context =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupContext {
    pub id: Uuid,
    pub name: String,
}

/// Who is talking, and in which ledger scope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserContext {
    pub user_id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub group: Option<GroupContext>,
}

impl UserContext {
    pub fn anonymous() -> Self {
        Self {
            user_id: Uuid::nil(),
            email: None,
            name: None,
            group: None,
        }
    }

    /// Name stamped on ledger rows as `added_by`.
    pub fn display_name(&self) -> String {
        if let Some(name) = self.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            return name.to_string();
        }

        if let Some(local) = self.email_local_part() {
            let cleaned: String = local
                .chars()
                .map(|c| if c.is_ascii_alphabetic() || c == ' ' { c } else { ' ' })
                .collect();

            let words: Vec<String> = cleaned.split_whitespace().map(title_case).collect();
            if !words.is_empty() {
                return words.join(" ");
            }
        }

        "Unknown".to_string()
    }

    /// Name sent to the chat-query gateway.
    pub fn chat_name(&self) -> String {
        self.name
            .as_deref()
            .filter(|n| !n.is_empty())
            .or_else(|| self.email_local_part())
            .unwrap_or("User")
            .to_string()
    }

    fn email_local_part(&self) -> Option<&str> {
        self.email
            .as_deref()
            .and_then(|e| e.split('@').next())
            .filter(|local| !local.is_empty())
    }
}

/// First letter upper, rest lower.
pub fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}
