//! Candidate processing: filter, publish, record.
//!
//! Each candidate moves `received → filtered → {skipped | eligible} →
//! {published | publish-failed}` and every terminal state appends exactly one
//! [`SyncRecord`]. Candidates of one batch are handled strictly in order.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::config::{Config, LedgerBackend};
use crate::filter::TagFilter;
use crate::google::{GbpClient, OAuthRefresher, TokenManager};
use crate::instagram::{InstagramClient, SourceService};
use crate::ledger::{CursorStore, JsonlLog, Ledger, RecordLog, SqliteLog};
use crate::model::{Candidate, PollCursor, SkipReason, SyncRecord, SyncSource, SyncStatus};
use crate::publisher::Publisher;
use crate::webhook::Notification;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EligiblePost {
    pub post_id: String,
    pub tags: Vec<String>,
}

/// Summary of one poll cycle.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct PollReport {
    pub fetched: usize,
    pub new: usize,
    pub eligible: Vec<EligiblePost>,
    pub synced: usize,
    pub skipped: usize,
    pub failed: usize,
    pub dry_run: bool,
}

pub struct SyncPipeline {
    source: Arc<dyn SourceService>,
    filter: TagFilter,
    publisher: Publisher,
    ledger: Ledger,
    cursor: Arc<CursorStore>,
    /// Serializes the duplicate check, publish and record of one candidate
    /// across the push and poll paths.
    publish_lock: Mutex<()>,
    /// Held for a whole poll cycle so overlapping cycles run one after another.
    poll_lock: Mutex<()>,
}

impl std::fmt::Debug for SyncPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncPipeline")
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

impl SyncPipeline {
    pub fn new(
        source: Arc<dyn SourceService>,
        filter: TagFilter,
        publisher: Publisher,
        ledger: Ledger,
        cursor: Arc<CursorStore>,
    ) -> Self {
        Self {
            source,
            filter,
            publisher,
            ledger,
            cursor,
            publish_lock: Mutex::new(()),
            poll_lock: Mutex::new(()),
        }
    }

    /// Wire the live clients and the configured ledger backend.
    pub async fn from_config(cfg: &Config) -> Result<Self> {
        let log: Arc<dyn RecordLog> = match cfg.ledger.backend {
            LedgerBackend::Jsonl => Arc::new(JsonlLog::new(cfg.records_path())),
            LedgerBackend::Sqlite => Arc::new(SqliteLog::connect(&cfg.database_url()).await?),
        };
        info!(backend = ?cfg.ledger.backend, "opened sync ledger");

        let tokens = Arc::new(TokenManager::new(Arc::new(OAuthRefresher::from_config(cfg))));
        let publisher = Publisher::new(
            tokens,
            Arc::new(GbpClient::from_config(cfg)),
            cfg.sync.language_code.clone(),
        );
        Ok(Self::new(
            Arc::new(InstagramClient::from_config(cfg)),
            TagFilter::new(&cfg.sync.target_tag),
            publisher,
            Ledger::new(log),
            Arc::new(CursorStore::new(cfg.cursor_path())),
        ))
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn cursor(&self) -> &CursorStore {
        &self.cursor
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    /// Drive one candidate to a terminal state and record it.
    #[instrument(skip_all, fields(post_id = %candidate.id))]
    pub async fn process_candidate(
        &self,
        candidate: &Candidate,
        origin: SyncSource,
        now: DateTime<Utc>,
    ) -> SyncRecord {
        let started = Instant::now();
        let verdict = self.filter.verdict(candidate, now);
        let _publishing = self.publish_lock.lock().await;

        let mut record = SyncRecord::new(&candidate.id, SyncStatus::Skipped, Utc::now())
            .with_candidate(candidate);
        record.source = Some(origin);
        record.tags = verdict.matched_tags.clone();

        if !verdict.eligible {
            let reason = verdict.reason.map(|r| r.to_string()).unwrap_or_default();
            info!(%reason, "skipped candidate");
            record.error = Some(reason);
        } else if self.ledger.already_synced(&candidate.id).await {
            info!("candidate already synced");
            record.error = Some(SkipReason::AlreadySynced.to_string());
        } else {
            match self.publisher.publish(candidate).await {
                Ok(listing_id) => {
                    info!(%listing_id, "synced candidate");
                    record.status = SyncStatus::Success;
                    record.listing_id = Some(listing_id);
                }
                Err(err) => {
                    warn!(%err, "failed to publish candidate");
                    record.status = SyncStatus::Failed;
                    record.error = Some(err.to_string());
                }
            }
        }

        record.timestamp = Utc::now();
        record.duration_ms = started.elapsed().as_millis() as u64;
        self.ledger.append(&record).await;
        record
    }

    /// Fetch recent posts, keep the ones newer than the cursor and process them in order.
    #[instrument(skip(self))]
    pub async fn run_poll(&self, limit: u32, dry_run: bool) -> Result<PollReport> {
        let _cycle = self.poll_lock.lock().await;
        let now = Utc::now();
        let cursor = if dry_run {
            self.cursor
                .peek()
                .await?
                .unwrap_or_else(|| PollCursor::starting_at(now))
        } else {
            self.cursor.load_or_init(now).await?
        };
        let fetched = self
            .source
            .recent_media(limit, Some(cursor.last_poll_at))
            .await?;

        let mut report = PollReport {
            fetched: fetched.len(),
            dry_run,
            ..Default::default()
        };
        let fresh: Vec<Candidate> = fetched
            .into_iter()
            .filter(|c| c.timestamp > cursor.last_poll_at)
            .collect();
        report.new = fresh.len();

        if fresh.is_empty() {
            info!(since = %cursor.last_poll_at, "no new posts since last poll");
            return Ok(report);
        }

        if dry_run {
            for candidate in &fresh {
                let verdict = self.filter.verdict(candidate, now);
                if verdict.eligible && !self.ledger.already_synced(&candidate.id).await {
                    report.eligible.push(EligiblePost {
                        post_id: candidate.id.clone(),
                        tags: verdict.matched_tags,
                    });
                } else {
                    report.skipped += 1;
                }
            }
            info!(new = report.new, eligible = report.eligible.len(), "dry run finished");
            return Ok(report);
        }

        for candidate in &fresh {
            let record = self.process_candidate(candidate, SyncSource::Poll, now).await;
            match record.status {
                SyncStatus::Success => {
                    report.synced += 1;
                    report.eligible.push(EligiblePost {
                        post_id: record.post_id,
                        tags: record.tags,
                    });
                }
                SyncStatus::Failed => {
                    report.failed += 1;
                    report.eligible.push(EligiblePost {
                        post_id: record.post_id,
                        tags: record.tags,
                    });
                }
                SyncStatus::Skipped => report.skipped += 1,
            }
        }

        let newest_id = fresh
            .iter()
            .max_by_key(|c| c.timestamp)
            .map(|c| c.id.clone());
        let processed = fresh.len() as u64;
        let synced = report.synced as u64;
        // Failed posts are not retried: the cursor moves past them. It moves to
        // the cycle start so posts created while the cycle ran are seen next time.
        let updated = self
            .cursor
            .update(now, move |c| {
                c.last_poll_at = c.last_poll_at.max(now);
                if newest_id.is_some() {
                    c.last_processed_id = newest_id;
                }
                c.total_processed += processed;
                c.total_synced += synced;
            })
            .await?;

        info!(
            new = report.new,
            synced = report.synced,
            skipped = report.skipped,
            failed = report.failed,
            total_processed = updated.total_processed,
            "poll cycle finished"
        );
        Ok(report)
    }

    /// Process every newly added media in a verified notification, in payload order.
    #[instrument(skip_all)]
    pub async fn handle_notification(&self, notification: &Notification) -> Vec<SyncRecord> {
        let media_ids = notification.new_media_ids();
        info!(count = media_ids.len(), "processing webhook notification");
        let mut records = Vec::with_capacity(media_ids.len());
        for media_id in media_ids {
            let record = match self.source.fetch_media(&media_id).await {
                Ok(candidate) => {
                    self.process_candidate(&candidate, SyncSource::Webhook, Utc::now())
                        .await
                }
                Err(err) => {
                    warn!(%err, %media_id, "failed to fetch media details");
                    let mut record = SyncRecord::new(&media_id, SyncStatus::Failed, Utc::now());
                    record.source = Some(SyncSource::Webhook);
                    record.error = Some(err.to_string());
                    self.ledger.append(&record).await;
                    record
                }
            };
            records.push(record);
        }
        records
    }

    /// Hand a notification to a background task; the caller never waits on it.
    pub fn spawn_notification(self: &Arc<Self>, notification: Notification) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);
        let task = tokio::spawn(async move {
            pipeline.handle_notification(&notification).await;
        });
        tokio::spawn(async move {
            if let Err(err) = task.await {
                error!(%err, "webhook processing task failed");
            }
        })
    }

    /// Poll every `interval` and prune the ledger once a day, forever.
    pub async fn run_scheduler(self: Arc<Self>, interval: Duration, limit: u32, retention_days: u32) {
        let mut poll_tick = tokio::time::interval(interval);
        let mut prune_tick = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
        loop {
            tokio::select! {
                _ = poll_tick.tick() => {
                    if let Err(err) = self.run_poll(limit, false).await {
                        error!(error = ?err, "poll cycle failed");
                    }
                }
                _ = prune_tick.tick() => {
                    self.ledger.prune(retention_days, Utc::now()).await;
                }
            }
        }
    }
}
