//! Sync ledger: append-only history of sync attempts plus the poll cursor.
//!
//! The ledger owns decoding, ordering, pagination and aggregates; the storage
//! backend behind [`RecordLog`] only appends, scans and compacts opaque lines.
//! Storage faults are logged here and never propagated to callers.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::model::{SyncRecord, SyncStatus};

pub mod cursor;
pub mod log;
pub mod sqlite;

pub use cursor::CursorStore;
pub use log::{JsonlLog, KeepFn, RecordLog};
pub use sqlite::SqliteLog;

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct LedgerStats {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub last_synced_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordPage {
    pub records: Vec<SyncRecord>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
}

#[derive(Clone)]
pub struct Ledger {
    log: Arc<dyn RecordLog>,
    /// Post ids with a `success` record, loaded from storage on first use.
    synced: Arc<Mutex<Option<HashSet<String>>>>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger").finish_non_exhaustive()
    }
}

impl Ledger {
    pub fn new(log: Arc<dyn RecordLog>) -> Self {
        Self {
            log,
            synced: Arc::new(Mutex::new(None)),
        }
    }

    /// Whether `post_id` has already been published successfully.
    pub async fn already_synced(&self, post_id: &str) -> bool {
        let mut synced = self.synced.lock().await;
        if synced.is_none() {
            let lines = match self.log.scan().await {
                Ok(lines) => lines,
                Err(err) => {
                    error!(error = ?err, "failed to read sync records");
                    return false;
                }
            };
            let ids = lines
                .iter()
                .filter_map(|line| serde_json::from_str::<SyncRecord>(line).ok())
                .filter(|r| r.status == SyncStatus::Success)
                .map(|r| r.post_id)
                .collect();
            *synced = Some(ids);
        }
        synced.as_ref().is_some_and(|ids| ids.contains(post_id))
    }

    /// Persist one record. Failures are logged, never returned.
    pub async fn append(&self, record: &SyncRecord) {
        if record.status == SyncStatus::Success {
            if let Some(ids) = self.synced.lock().await.as_mut() {
                ids.insert(record.post_id.clone());
            }
        }
        let entry = match serde_json::to_string(record) {
            Ok(entry) => entry,
            Err(err) => {
                error!(%err, record_id = %record.id, "failed to encode sync record");
                return;
            }
        };
        if let Err(err) = self.log.append(&entry).await {
            error!(error = ?err, record_id = %record.id, post_id = %record.post_id, "failed to append sync record");
        }
    }

    /// All decodable records, newest first. Undecodable lines are skipped.
    async fn sorted_records(&self) -> Vec<SyncRecord> {
        let lines = match self.log.scan().await {
            Ok(lines) => lines,
            Err(err) => {
                error!(error = ?err, "failed to read sync records");
                return Vec::new();
            }
        };
        let mut records: Vec<SyncRecord> = lines
            .iter()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        records
    }

    /// Records sorted by timestamp descending, then paginated.
    pub async fn list(&self, limit: usize, offset: usize) -> Vec<SyncRecord> {
        self.sorted_records()
            .await
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect()
    }

    /// 1-based page query; `page_size` is capped at [`MAX_PAGE_SIZE`].
    pub async fn page(&self, page: usize, page_size: usize) -> RecordPage {
        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let records = self.sorted_records().await;
        let total = records.len();
        RecordPage {
            records: records
                .into_iter()
                .skip((page - 1) * page_size)
                .take(page_size)
                .collect(),
            total,
            page,
            page_size,
            total_pages: total.div_ceil(page_size),
        }
    }

    /// Aggregates computed from the stored records.
    pub async fn stats(&self) -> LedgerStats {
        let records = self.sorted_records().await;
        let mut stats = LedgerStats {
            total: records.len(),
            last_synced_at: records.first().map(|r| r.timestamp),
            ..Default::default()
        };
        for record in &records {
            match record.status {
                SyncStatus::Success => stats.success += 1,
                SyncStatus::Failed => stats.failed += 1,
                SyncStatus::Skipped => stats.skipped += 1,
            }
        }
        stats
    }

    /// Drop records older than `max_age_days`; returns how many were removed.
    /// Undecodable lines are dropped too.
    pub async fn prune(&self, max_age_days: u32, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::days(i64::from(max_age_days));
        let keep = move |line: &str| {
            serde_json::from_str::<SyncRecord>(line)
                .map(|r| r.timestamp > cutoff)
                .unwrap_or(false)
        };
        match self.log.compact(&keep).await {
            Ok(0) => 0,
            Ok(removed) => {
                info!(removed, max_age_days, "pruned sync records");
                removed
            }
            Err(err) => {
                warn!(error = ?err, "failed to compact sync records");
                0
            }
        }
    }
}
