//! Ambiguity resolver
//!
//! Owns the single pending-confirmation slot of a conversation. Parser batches
//! with an `Other` candidate are held here until the user picks a category or,
//! for loans with a known person, a direction.
//!
//! ```text
//! Idle → AwaitingCategory → AwaitingDirection → Idle
//!          └──────── Cancel ──────┴──────────────→ Idle
//! ```
//!
//! All state lives in [`ConversationState`] and changes only through
//! [`ConversationState::update`]. Side effects (ledger writes) are returned as an
//! [`Effect`] for the caller to run; the caller reports the outcome back as an
//! [`Event`].

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::inference::{infer_counterpart, DirectionHints};
use crate::memory::{Message, Timeline};
use crate::models::{Candidate, Category, FinalizedTransaction, ParseResult};

pub const CATEGORY_PROMPT: &str = "I'm not sure where to save this. Please choose:";
pub const DIRECTION_PROMPT: &str = "What type of transaction?";
pub const SAVED: &str = "Saved";
pub const CANCELLED: &str = "Cancelled";
pub const SAVE_FAILED: &str = "Error saving transaction";
pub const GATEWAY_FAILED: &str = "Error: Unable to process request";

//
// ================= Choices =================
//

/// Category buttons offered for an ambiguous batch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CategoryChoice {
    Expense,
    Loan,
    Income,
}

impl CategoryChoice {
    pub fn category(&self) -> Category {
        match self {
            CategoryChoice::Expense => Category::DEFAULT_EXPENSE,
            CategoryChoice::Loan => Category::Loan,
            CategoryChoice::Income => Category::Income,
        }
    }
}

/// Which way money moved between the user and a counterpart
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    ReceivedFrom,
    LentTo,
    BorrowedFrom,
    PaidTo,
}

impl Direction {
    /// Stored as the ledger item
    pub fn label(&self) -> &'static str {
        match self {
            Direction::ReceivedFrom => "received from",
            Direction::LentTo => "lent to",
            Direction::BorrowedFrom => "borrowed from",
            Direction::PaidTo => "paid to",
        }
    }

    fn remark_prefix(&self) -> &'static str {
        match self {
            Direction::ReceivedFrom => "Received from",
            Direction::LentTo => "Lent to",
            Direction::BorrowedFrom => "Borrowed from",
            Direction::PaidTo => "Paid to",
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Direction::ReceivedFrom => "RECEIVED",
            Direction::LentTo => "LENT",
            Direction::BorrowedFrom => "BORROWED",
            Direction::PaidTo => "PAID",
        }
    }

    /// Outflows are positive, inflows negative.
    pub fn signed(&self, amount: Decimal) -> Decimal {
        match self {
            Direction::LentTo | Direction::PaidTo => amount.abs(),
            Direction::ReceivedFrom | Direction::BorrowedFrom => -amount.abs(),
        }
    }
}

/// A button the user can press on a confirmation prompt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Choice {
    Category { category: CategoryChoice },
    Direction { direction: Direction, category: Category },
    Cancel,
}

impl Choice {
    const fn direction(direction: Direction, category: Category) -> Self {
        Choice::Direction { direction, category }
    }

    /// Button caption
    pub fn label(&self, counterpart: Option<&str>) -> String {
        let who = counterpart.unwrap_or("them");

        match self {
            Choice::Category { category: CategoryChoice::Expense } => "Expense".to_string(),
            Choice::Category { category: CategoryChoice::Loan } => "Loan".to_string(),
            Choice::Category { category: CategoryChoice::Income } => "Income".to_string(),
            Choice::Direction { category: Category::Income, .. } => {
                format!("Income from {} → INCOME", who)
            }
            Choice::Direction { direction, .. } => match direction {
                Direction::ReceivedFrom => format!("{} paid back → RECEIVED", who),
                Direction::LentTo => format!("I lent to {} → LENT", who),
                Direction::BorrowedFrom => format!("I borrowed from {} → BORROWED", who),
                Direction::PaidTo => format!("I paid back {} → PAID", who),
            },
            Choice::Cancel => "Cancel".to_string(),
        }
    }
}

const CATEGORY_CHOICES: [Choice; 3] = [
    Choice::Category { category: CategoryChoice::Expense },
    Choice::Category { category: CategoryChoice::Loan },
    Choice::Category { category: CategoryChoice::Income },
];

/// Direction buttons for a set of hints.
pub fn direction_choices(hints: DirectionHints) -> Vec<Choice> {
    if hints.from_other {
        vec![
            Choice::direction(Direction::ReceivedFrom, Category::Loan),
            Choice::direction(Direction::BorrowedFrom, Category::Loan),
            Choice::direction(Direction::ReceivedFrom, Category::Income),
        ]
    } else if hints.toward_other {
        vec![
            Choice::direction(Direction::LentTo, Category::Loan),
            Choice::direction(Direction::PaidTo, Category::Loan),
            Choice::direction(Direction::ReceivedFrom, Category::Income),
        ]
    } else {
        vec![
            Choice::direction(Direction::ReceivedFrom, Category::Loan),
            Choice::direction(Direction::LentTo, Category::Loan),
            Choice::direction(Direction::BorrowedFrom, Category::Loan),
            Choice::direction(Direction::PaidTo, Category::Loan),
        ]
    }
}

//
// ================= Pending =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    AwaitingCategory,
    AwaitingDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Awaiting {
    Category,
    Direction,
}

/// An ambiguous batch waiting for the user
#[derive(Debug, Clone, PartialEq)]
pub struct PendingConfirmation {
    pub id: Uuid,
    pub candidates: Vec<Candidate>,
    awaiting: Awaiting,
}

impl PendingConfirmation {
    /// A batch whose first candidate already names a person skips straight to
    /// the direction question.
    pub fn new(candidates: Vec<Candidate>) -> Self {
        let awaiting = if candidates.first().and_then(|c| c.counterpart.as_ref()).is_some() {
            Awaiting::Direction
        } else {
            Awaiting::Category
        };

        Self {
            id: Uuid::new_v4(),
            candidates,
            awaiting,
        }
    }

    pub fn stage(&self) -> Stage {
        match self.awaiting {
            Awaiting::Category => Stage::AwaitingCategory,
            Awaiting::Direction => Stage::AwaitingDirection,
        }
    }

    pub fn counterpart(&self) -> Option<&str> {
        self.candidates.first().and_then(|c| c.counterpart.as_deref())
    }

    /// Choices valid right now, Cancel last.
    pub fn choices(&self) -> Vec<Choice> {
        let mut choices = match self.awaiting {
            Awaiting::Category => CATEGORY_CHOICES.to_vec(),
            Awaiting::Direction => self
                .candidates
                .first()
                .map(|first| direction_choices(DirectionHints::for_candidate(first)))
                .unwrap_or_default(),
        };
        choices.push(Choice::Cancel);
        choices
    }

    fn prompt(&self) -> Message {
        let text = match self.awaiting {
            Awaiting::Category => CATEGORY_PROMPT,
            Awaiting::Direction => DIRECTION_PROMPT,
        };
        Message::confirmation(text, self, self.choices())
    }
}

//
// ================= Reducer =================
//

/// Something that happened in the conversation
#[derive(Debug, Clone)]
pub enum Event {
    UserText(String),
    Parsed(ParseResult),
    QueryAnswered(String),
    GatewayFailed,
    Chose { pending_id: Uuid, choice: Choice },
    Saved(String),
    SaveFailed(String),
}

/// Ledger write requested by the reducer
#[derive(Debug, Clone, PartialEq)]
pub struct SaveRequest {
    pub records: Vec<FinalizedTransaction>,
    /// Appended once the write succeeds
    pub success_message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Done,
    /// The event did not apply to the current state
    Ignored,
    Persist(SaveRequest),
}

/// Everything a conversation remembers
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    pub timeline: Timeline,
    pub pending: Option<PendingConfirmation>,
}

impl ConversationState {
    pub fn new(timeline: Timeline) -> Self {
        Self {
            timeline,
            pending: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.pending
            .as_ref()
            .map(PendingConfirmation::stage)
            .unwrap_or(Stage::Idle)
    }

    pub fn update(&mut self, event: Event) -> Effect {
        match event {
            Event::UserText(text) => {
                self.timeline.push(Message::user(text));
                Effect::Done
            }
            Event::Parsed(result) => self.on_parsed(result),
            Event::QueryAnswered(reply) => {
                self.timeline.push(Message::assistant(reply));
                Effect::Done
            }
            Event::GatewayFailed => {
                self.timeline.push(Message::assistant(GATEWAY_FAILED));
                Effect::Done
            }
            Event::Chose { pending_id, choice } => self.on_choice(pending_id, choice),
            Event::Saved(message) => {
                self.timeline.push(Message::assistant(message));
                Effect::Done
            }
            Event::SaveFailed(reason) => {
                warn!("Ledger insert failed: {}", reason);
                self.timeline.push(Message::assistant(SAVE_FAILED));
                Effect::Done
            }
        }
    }

    fn on_parsed(&mut self, result: ParseResult) -> Effect {
        self.timeline.push(Message::assistant(result.reply));

        if result.expenses.is_empty() {
            return Effect::Done;
        }

        if !result.expenses.iter().any(|c| c.category.is_ambiguous()) {
            return Effect::Persist(SaveRequest {
                records: result.expenses.into_iter().map(FinalizedTransaction::from).collect(),
                success_message: SAVED.to_string(),
            });
        }

        let pending = PendingConfirmation::new(result.expenses);
        if let Some(previous) = self.pending.replace(pending.clone()) {
            warn!(
                replaced = %previous.id,
                candidates = previous.candidates.len(),
                "New ambiguous batch replaces an unresolved confirmation"
            );
        }

        info!(pending_id = %pending.id, stage = ?pending.stage(), "Awaiting confirmation");
        self.timeline.push(pending.prompt());
        Effect::Done
    }

    fn on_choice(&mut self, pending_id: Uuid, choice: Choice) -> Effect {
        let Some(pending) = self.pending.as_ref().filter(|p| p.id == pending_id) else {
            warn!(%pending_id, "Choice for a batch that is no longer pending");
            return Effect::Ignored;
        };

        if !pending.choices().contains(&choice) {
            warn!(%pending_id, ?choice, stage = ?pending.stage(), "Choice not offered at this stage");
            return Effect::Ignored;
        }

        match choice {
            Choice::Cancel => {
                self.pending = None;
                self.timeline.push(Message::assistant(CANCELLED));
                Effect::Done
            }
            Choice::Category { category: CategoryChoice::Loan } if pending.counterpart().is_none() => {
                self.ask_direction_or_save_loan()
            }
            Choice::Category { category } => self.save_with_category(category.category()),
            Choice::Direction { direction, category } => self.save_direction(direction, category),
        }
    }

    /// Loan picked with no known person: look for one in the first candidate.
    fn ask_direction_or_save_loan(&mut self) -> Effect {
        let Some(pending) = self.pending.as_mut() else {
            return Effect::Ignored;
        };

        let person = pending.candidates.first().and_then(|c| infer_counterpart(c.description()));
        let Some(person) = person else {
            debug!("No counterpart found, saving as plain loan");
            return self.save_with_category(Category::Loan);
        };

        for candidate in &mut pending.candidates {
            candidate.counterpart = Some(person.clone());
        }
        pending.awaiting = Awaiting::Direction;

        info!(pending_id = %pending.id, counterpart = %person, "Counterpart inferred");
        let prompt = pending.prompt();
        self.timeline.push(prompt);
        Effect::Done
    }

    fn save_with_category(&mut self, category: Category) -> Effect {
        let Some(pending) = self.pending.take() else {
            return Effect::Ignored;
        };

        let records = pending
            .candidates
            .into_iter()
            .map(|candidate| FinalizedTransaction {
                category,
                ..FinalizedTransaction::from(candidate)
            })
            .collect();

        Effect::Persist(SaveRequest {
            records,
            success_message: format!("Saved to {}", category),
        })
    }

    fn save_direction(&mut self, direction: Direction, category: Category) -> Effect {
        let Some(pending) = self.pending.take() else {
            return Effect::Ignored;
        };

        let Some(first) = pending.candidates.into_iter().next() else {
            return Effect::Ignored;
        };
        let counterpart = first.counterpart.clone().unwrap_or_default();

        let record = FinalizedTransaction {
            amount: direction.signed(first.amount),
            item: direction.label().to_string(),
            category,
            remarks: format!("{} {}", direction.remark_prefix(), counterpart),
            counterpart: first.counterpart,
        };

        Effect::Persist(SaveRequest {
            records: vec![record],
            success_message: format!("Saved as {} ({})", direction.tag(), counterpart),
        })
    }
}
