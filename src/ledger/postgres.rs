//! Postgres-backed ledger (`expenses` table)

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;

use super::{Ledger, LedgerEntry};
use crate::error::ChatError;
use crate::models::{Category, FinalizedTransaction, UserContext};
use crate::Result;

pub struct PgLedger {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        }
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS expenses (
                      id UUID PRIMARY KEY,
                      amount NUMERIC NOT NULL,
                      item TEXT NOT NULL,
                      category TEXT NOT NULL,
                      remarks TEXT NOT NULL DEFAULT '',
                      paid_by TEXT,
                      date DATE NOT NULL,
                      user_id UUID NOT NULL,
                      added_by TEXT NOT NULL,
                      group_id UUID,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_expenses_scope_time
                    ON expenses (user_id, group_id, created_at);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                ChatError::DatabaseError(format!("Failed to initialize ledger schema: {}", e))
            })?;

        Ok(())
    }

    fn entry_from_row(row: &PgRow) -> std::result::Result<LedgerEntry, sqlx::Error> {
        let category: String = row.try_get("category")?;

        Ok(LedgerEntry {
            entry_id: row.try_get("id")?,
            amount: row.try_get("amount")?,
            item: row.try_get("item")?,
            category: Category::normalize(&category),
            remarks: row.try_get("remarks")?,
            paid_by: row.try_get("paid_by")?,
            date: row.try_get("date")?,
            user_id: row.try_get("user_id")?,
            added_by: row.try_get("added_by")?,
            group_id: row.try_get("group_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl Ledger for PgLedger {
    async fn insert(&self, user: &UserContext, records: &[FinalizedTransaction]) -> Result<()> {
        self.ensure_schema().await?;

        let mut tx = self.pool.begin().await.map_err(|e| {
            ChatError::LedgerError(format!("Failed to begin ledger transaction: {}", e))
        })?;

        for record in records {
            let entry = LedgerEntry::new(record, user);

            sqlx::query(
                r#"
                INSERT INTO expenses
                  (id, amount, item, category, remarks, paid_by, date, user_id, added_by, group_id, created_at)
                VALUES
                  ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(entry.entry_id)
            .bind(entry.amount)
            .bind(&entry.item)
            .bind(entry.category.as_str())
            .bind(&entry.remarks)
            .bind(&entry.paid_by)
            .bind(entry.date)
            .bind(entry.user_id)
            .bind(&entry.added_by)
            .bind(entry.group_id)
            .bind(entry.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| ChatError::LedgerError(format!("Failed to insert ledger row: {}", e)))?;
        }

        tx.commit().await.map_err(|e| {
            ChatError::LedgerError(format!("Failed to commit ledger transaction: {}", e))
        })?;

        Ok(())
    }

    async fn recent(&self, user: &UserContext, limit: usize) -> Result<Vec<LedgerEntry>> {
        self.ensure_schema().await?;

        let query = match &user.group {
            Some(group) => sqlx::query(
                r#"
                SELECT * FROM expenses
                WHERE group_id = $1
                ORDER BY created_at DESC
                LIMIT $2
                "#,
            )
            .bind(group.id),
            None => sqlx::query(
                r#"
                SELECT * FROM expenses
                WHERE user_id = $1 AND group_id IS NULL
                ORDER BY created_at DESC
                LIMIT $2
                "#,
            )
            .bind(user.user_id),
        };

        let rows = query
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ChatError::DatabaseError(format!("Failed to load ledger rows: {}", e)))?;

        rows.iter()
            .map(|row| Self::entry_from_row(row).map_err(ChatError::from))
            .collect()
    }
}
