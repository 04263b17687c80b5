//! Ledger persistence layer
//!
//! Where finalized transactions end up, and where the chat-query path reads
//! recent rows from. In-memory for development; JSON lines or Postgres for
//! anything that must survive a restart.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{Category, FinalizedTransaction, UserContext};
use crate::Result;

pub mod jsonl;
pub mod postgres;

pub use jsonl::JsonlLedger;
pub use postgres::PgLedger;

/// Most rows handed to the chat-query gateway
pub const RECENT_LIMIT: usize = 1000;

/// A stored ledger row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: Uuid,
    pub amount: Decimal,
    pub item: String,
    pub category: Category,
    pub remarks: String,
    pub paid_by: Option<String>,
    pub date: NaiveDate,
    pub user_id: Uuid,
    pub added_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(record: &FinalizedTransaction, user: &UserContext) -> Self {
        let now = Utc::now();

        Self {
            entry_id: Uuid::new_v4(),
            amount: record.amount,
            item: record.item.clone(),
            category: record.category,
            remarks: record.remarks.clone(),
            paid_by: record.counterpart.clone(),
            date: now.date_naive(),
            user_id: user.user_id,
            added_by: user.display_name(),
            group_id: user.group.as_ref().map(|g| g.id),
            created_at: now,
        }
    }

    /// Group rows when a group is active, else the user's personal rows.
    pub fn visible_to(&self, user: &UserContext) -> bool {
        match &user.group {
            Some(group) => self.group_id == Some(group.id),
            None => self.user_id == user.user_id && self.group_id.is_none(),
        }
    }
}

/// Trait for ledger persistence
#[async_trait::async_trait]
pub trait Ledger: Send + Sync {
    async fn insert(&self, user: &UserContext, records: &[FinalizedTransaction]) -> Result<()>;
    /// Newest first
    async fn recent(&self, user: &UserContext, limit: usize) -> Result<Vec<LedgerEntry>>;
}

/// Newest-first slice of the rows visible to `user`.
fn select_recent<'a>(
    entries: impl Iterator<Item = &'a LedgerEntry>,
    user: &UserContext,
    limit: usize,
) -> Vec<LedgerEntry> {
    let mut visible: Vec<LedgerEntry> = entries.filter(|e| e.visible_to(user)).cloned().collect();
    // Entries arrive in insertion order; reversing first keeps ties newest-first
    visible.reverse();
    visible.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    visible.truncate(limit);
    visible
}

/// In-memory ledger for development
pub struct InMemoryLedger {
    entries: Arc<RwLock<Vec<LedgerEntry>>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn entries(&self) -> Vec<LedgerEntry> {
        self.entries.read().await.clone()
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Ledger for InMemoryLedger {
    async fn insert(&self, user: &UserContext, records: &[FinalizedTransaction]) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.extend(records.iter().map(|record| LedgerEntry::new(record, user)));
        Ok(())
    }

    async fn recent(&self, user: &UserContext, limit: usize) -> Result<Vec<LedgerEntry>> {
        let entries = self.entries.read().await;
        Ok(select_recent(entries.iter(), user, limit))
    }
}
