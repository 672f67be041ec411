//! Append-only storage for serialized sync records.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Storage backend for the ledger. Entries are opaque single-line JSON documents.
#[async_trait]
pub trait RecordLog: Send + Sync {
    /// Add one entry. Concurrent appends never interleave within an entry.
    async fn append(&self, entry: &str) -> Result<()>;

    /// Every stored entry in storage order.
    async fn scan(&self) -> Result<Vec<String>>;

    /// Drop every entry for which `keep` returns false; returns how many were dropped.
    /// Runs atomically with respect to `append`: entries added meanwhile are never lost.
    async fn compact(&self, keep: &KeepFn) -> Result<usize>;
}

/// Predicate deciding which entries survive a compaction.
pub type KeepFn = dyn Fn(&str) -> bool + Send + Sync;

/// One JSON document per line in a flat file.
#[derive(Debug)]
pub struct JsonlLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordLog for JsonlLog {
    async fn append(&self, entry: &str) -> Result<()> {
        let mut line = entry.replace('\n', " ");
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.ok();
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        file.flush().await?;
        Ok(())
    }

    async fn scan(&self) -> Result<Vec<String>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", self.path.display()))
            }
        };
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn compact(&self, keep: &KeepFn) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let lines = self.scan().await?;
        let before = lines.len();
        let kept: Vec<String> = lines.into_iter().filter(|l| keep(l)).collect();
        let removed = before - kept.len();
        if removed == 0 {
            return Ok(0);
        }

        let mut content = kept.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }
        let tmp = self.path.with_extension("jsonl.tmp");
        fs::write(&tmp, content)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(removed)
    }
}
