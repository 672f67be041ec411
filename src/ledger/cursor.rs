//! Durable poll cursor kept as a small JSON document.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::model::PollCursor;

/// Owns the cursor file. Every read-modify-write runs under one async mutex.
#[derive(Debug)]
pub struct CursorStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl CursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// A corrupt file reads as absent so the next write replaces it.
    async fn read(&self) -> Result<Option<PollCursor>> {
        match fs::read_to_string(&self.path).await {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(cursor) => Ok(Some(cursor)),
                Err(err) => {
                    warn!(%err, path = %self.path.display(), "discarding unreadable poll cursor");
                    Ok(None)
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("failed to read {}", self.path.display())),
        }
    }

    async fn write(&self, cursor: &PollCursor) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.ok();
        }
        let body = serde_json::to_string_pretty(cursor)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }

    /// Stored cursor, if any. Never writes.
    pub async fn peek(&self) -> Result<Option<PollCursor>> {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    /// Current cursor; on first run one starting at `now` is created and persisted.
    pub async fn load_or_init(&self, now: DateTime<Utc>) -> Result<PollCursor> {
        let _guard = self.lock.lock().await;
        if let Some(cursor) = self.read().await? {
            return Ok(cursor);
        }
        let cursor = PollCursor::starting_at(now);
        self.write(&cursor).await?;
        info!(last_poll_at = %cursor.last_poll_at, "initialized poll cursor");
        Ok(cursor)
    }

    /// Atomically apply `update` to the stored cursor and persist the result.
    pub async fn update<F>(&self, now: DateTime<Utc>, update: F) -> Result<PollCursor>
    where
        F: FnOnce(&mut PollCursor) + Send,
    {
        let _guard = self.lock.lock().await;
        let mut cursor = self
            .read()
            .await?
            .unwrap_or_else(|| PollCursor::starting_at(now));
        update(&mut cursor);
        self.write(&cursor).await?;
        Ok(cursor)
    }
}
