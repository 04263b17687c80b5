//! Append-only JSON lines ledger
//!
//! One `LedgerEntry` per line. Lines that fail to parse are skipped on read.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use super::{select_recent, Ledger, LedgerEntry};
use crate::error::ChatError;
use crate::models::{FinalizedTransaction, UserContext};
use crate::Result;

pub struct JsonlLedger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlLedger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    async fn read_all(&self) -> Result<Vec<LedgerEntry>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(ChatError::LedgerError(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        Ok(raw
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(number, line)| match serde_json::from_str(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(line = number + 1, "Skipping unreadable ledger line: {}", e);
                    None
                }
            })
            .collect())
    }
}

#[async_trait]
impl Ledger for JsonlLedger {
    async fn insert(&self, user: &UserContext, records: &[FinalizedTransaction]) -> Result<()> {
        let mut buffer = String::new();
        for record in records {
            buffer.push_str(&serde_json::to_string(&LedgerEntry::new(record, user))?);
            buffer.push('\n');
        }

        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| ChatError::LedgerError(format!("Failed to open ledger: {}", e)))?;

        file.write_all(buffer.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn recent(&self, user: &UserContext, limit: usize) -> Result<Vec<LedgerEntry>> {
        let entries = self.read_all().await?;
        Ok(select_recent(entries.iter(), user, limit))
    }
}
