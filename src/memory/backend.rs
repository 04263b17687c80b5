//! Timeline persistence backends
//!
//! Every backend stores the whole timeline as one JSON document per session
//! key. Unreadable documents load as an empty timeline.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::debug;

use crate::error::ChatError;
use crate::memory::Timeline;
use crate::Result;

/// Durable storage for session timelines
#[async_trait]
pub trait TimelineStore: Send + Sync {
    async fn load(&self, session: &str) -> Result<Timeline>;
    async fn save(&self, session: &str, timeline: &Timeline) -> Result<()>;
    async fn clear(&self, session: &str) -> Result<()>;
}

//
// ================= In-memory =================
//

/// Keeps serialized timelines in a map; used by tests and ephemeral runs
#[derive(Default)]
pub struct InMemoryTimelineStore {
    documents: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryTimelineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw content as-is, bypassing serialization.
    pub async fn put_raw(&self, session: &str, raw: &str) {
        self.documents
            .write()
            .await
            .insert(session.to_string(), raw.to_string());
    }
}

#[async_trait]
impl TimelineStore for InMemoryTimelineStore {
    async fn load(&self, session: &str) -> Result<Timeline> {
        let documents = self.documents.read().await;
        Ok(documents
            .get(session)
            .map(|raw| Timeline::from_json(raw))
            .unwrap_or_default())
    }

    async fn save(&self, session: &str, timeline: &Timeline) -> Result<()> {
        let raw = timeline.to_json()?;
        self.documents.write().await.insert(session.to_string(), raw);
        Ok(())
    }

    async fn clear(&self, session: &str) -> Result<()> {
        self.documents.write().await.remove(session);
        Ok(())
    }
}

//
// ================= File =================
//

/// One JSON file per session under a directory
pub struct FileTimelineStore {
    root: PathBuf,
}

impl FileTimelineStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Session keys are user-controlled, so the file name is their digest.
    fn path_for(&self, session: &str) -> PathBuf {
        let digest = Sha256::digest(session.as_bytes());
        self.root.join(format!("{}.json", hex::encode(digest)))
    }
}

#[async_trait]
impl TimelineStore for FileTimelineStore {
    async fn load(&self, session: &str) -> Result<Timeline> {
        match tokio::fs::read_to_string(self.path_for(session)).await {
            Ok(raw) => Ok(Timeline::from_json(&raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Timeline::new()),
            // Non-UTF-8 bytes are corruption too
            Err(e) if e.kind() == ErrorKind::InvalidData => Ok(Timeline::new()),
            Err(e) => Err(ChatError::StorageError(format!(
                "Failed to read timeline for {}: {}",
                session, e
            ))),
        }
    }

    async fn save(&self, session: &str, timeline: &Timeline) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;

        let path = self.path_for(session);
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, timeline.to_json()?).await?;
        tokio::fs::rename(&staging, &path).await?;

        debug!(path = %path.display(), messages = timeline.len(), "Timeline saved");
        Ok(())
    }

    async fn clear(&self, session: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(session)).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

//
// ================= Postgres =================
//

pub struct PgTimelineStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PgTimelineStore {
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
                    CREATE TABLE IF NOT EXISTS chat_timelines (
                      session_key TEXT PRIMARY KEY,
                      messages TEXT NOT NULL,
                      updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                ChatError::DatabaseError(format!("Failed to initialize timeline schema: {}", e))
            })?;

        Ok(())
    }
}

#[async_trait]
impl TimelineStore for PgTimelineStore {
    async fn load(&self, session: &str) -> Result<Timeline> {
        self.ensure_schema().await?;

        let row = sqlx::query("SELECT messages FROM chat_timelines WHERE session_key = $1")
            .bind(session)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ChatError::DatabaseError(format!("Failed to load timeline: {}", e)))?;

        Ok(row
            .and_then(|row| row.try_get::<String, _>("messages").ok())
            .map(|raw| Timeline::from_json(&raw))
            .unwrap_or_default())
    }

    async fn save(&self, session: &str, timeline: &Timeline) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            INSERT INTO chat_timelines (session_key, messages, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (session_key)
            DO UPDATE SET messages = EXCLUDED.messages, updated_at = NOW()
            "#,
        )
        .bind(session)
        .bind(timeline.to_json()?)
        .execute(&self.pool)
        .await
        .map_err(|e| ChatError::DatabaseError(format!("Failed to save timeline: {}", e)))?;

        Ok(())
    }

    async fn clear(&self, session: &str) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query("DELETE FROM chat_timelines WHERE session_key = $1")
            .bind(session)
            .execute(&self.pool)
            .await
            .map_err(|e| ChatError::DatabaseError(format!("Failed to clear timeline: {}", e)))?;

        Ok(())
    }
}
