use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Mutex;

use ig_gbp_sync::filter::TagFilter;
use ig_gbp_sync::google::{
    Credential, ListingRequest, ListingService, PublishError, TokenError, TokenManager,
    TokenSource,
};
use ig_gbp_sync::instagram::{SourceError, SourceService};
use ig_gbp_sync::ledger::{CursorStore, JsonlLog, Ledger};
use ig_gbp_sync::model::{Candidate, MediaKind, SyncSource, SyncStatus};
use ig_gbp_sync::publisher::Publisher;
use ig_gbp_sync::sync::SyncPipeline;
use ig_gbp_sync::webhook::Notification;

#[derive(Default)]
struct FakeSource {
    recent: Mutex<Vec<Candidate>>,
    by_id: Mutex<HashMap<String, Candidate>>,
    /// Delay before answering `recent_media`, in milliseconds.
    recent_delay_ms: AtomicU64,
}

#[async_trait]
impl SourceService for FakeSource {
    async fn fetch_media(&self, media_id: &str) -> Result<Candidate, SourceError> {
        self.by_id
            .lock()
            .await
            .get(media_id)
            .cloned()
            .ok_or_else(|| SourceError::Api(format!("media {media_id} not found")))
    }

    async fn recent_media(
        &self,
        limit: u32,
        _since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Candidate>, SourceError> {
        let delay = self.recent_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }
        let recent = self.recent.lock().await;
        Ok(recent.iter().take(limit as usize).cloned().collect())
    }
}

#[derive(Default)]
struct RecordingListings {
    responses: Mutex<VecDeque<std::result::Result<String, String>>>,
    calls: Mutex<Vec<(String, ListingRequest)>>,
}

impl RecordingListings {
    fn with_responses(responses: Vec<std::result::Result<String, String>>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::from(responses)),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ListingService for RecordingListings {
    async fn create_local_post(
        &self,
        access_token: &str,
        request: &ListingRequest,
        _validate_only: bool,
    ) -> Result<String, PublishError> {
        self.calls
            .lock()
            .await
            .push((access_token.to_string(), request.clone()));
        match self.responses.lock().await.pop_front() {
            Some(Ok(id)) => Ok(id),
            Some(Err(message)) => Err(PublishError::Api(message)),
            None => Ok("accounts/1/locations/2/localPosts/default".into()),
        }
    }
}

struct StaticTokens {
    fail: bool,
}

#[async_trait]
impl TokenSource for StaticTokens {
    async fn refresh(&self) -> Result<Credential, TokenError> {
        if self.fail {
            return Err(TokenError::RefreshFailed("invalid_grant".into()));
        }
        Ok(Credential {
            access_token: "ya29.test".into(),
            expires_at: Utc::now() + Duration::hours(1),
        })
    }
}

struct Harness {
    pipeline: Arc<SyncPipeline>,
    source: Arc<FakeSource>,
    listings: Arc<RecordingListings>,
    dir: TempDir,
}

fn harness(listings: RecordingListings, tokens_fail: bool) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(FakeSource::default());
    let listings = Arc::new(listings);
    let tokens = Arc::new(TokenManager::new(Arc::new(StaticTokens { fail: tokens_fail })));
    let publisher = Publisher::new(tokens, listings.clone(), "ja");
    let ledger = Ledger::new(Arc::new(JsonlLog::new(dir.path().join("sync_records.jsonl"))));
    let cursor = Arc::new(CursorStore::new(dir.path().join("poll_state.json")));
    let pipeline = Arc::new(SyncPipeline::new(
        source.clone(),
        TagFilter::new("#MEO"),
        publisher,
        ledger,
        cursor,
    ));
    Harness {
        pipeline,
        source,
        listings,
        dir,
    }
}

fn candidate(id: &str, caption: &str, kind: MediaKind, age: Duration) -> Candidate {
    Candidate {
        id: id.into(),
        caption: Some(caption.into()),
        media_kind: kind,
        media_url: Some(format!("https://cdn.example/{id}.jpg")),
        permalink: format!("https://www.instagram.com/p/{id}/"),
        timestamp: Utc::now() - age,
        like_count: 0,
        comments_count: 0,
    }
}

async fn seed_cursor(h: &Harness, at: DateTime<Utc>) -> Result<()> {
    h.pipeline
        .cursor()
        .update(at, move |c| c.last_poll_at = at)
        .await?;
    Ok(())
}

#[tokio::test]
async fn tagged_image_is_published_and_recorded() {
    let h = harness(
        RecordingListings::with_responses(vec![Ok("accounts/1/locations/2/localPosts/99".into())]),
        false,
    );
    let post = candidate("1789", "New menu! #MEO #food", MediaKind::Image, Duration::hours(1));

    let record = h
        .pipeline
        .process_candidate(&post, SyncSource::Webhook, Utc::now())
        .await;

    assert_eq!(record.status, SyncStatus::Success);
    assert_eq!(record.listing_id.as_deref(), Some("accounts/1/locations/2/localPosts/99"));
    assert_eq!(record.tags, vec!["#MEO", "#food"]);
    assert_eq!(record.source, Some(SyncSource::Webhook));

    let calls = h.listings.calls.lock().await;
    assert_eq!(calls.len(), 1);
    let (token, request) = &calls[0];
    assert_eq!(token, "ya29.test");
    assert_eq!(request.summary, "New menu!");
    assert_eq!(request.media.len(), 1);
    assert_eq!(
        request.call_to_action.as_ref().unwrap().url,
        "https://www.instagram.com/p/1789/"
    );

    let stored = h.pipeline.ledger().list(10, 0).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, record.id);
}

#[tokio::test]
async fn video_is_skipped_without_publishing() {
    let h = harness(RecordingListings::default(), false);
    let post = candidate("v1", "Behind the scenes #MEO", MediaKind::Video, Duration::hours(1));

    let record = h
        .pipeline
        .process_candidate(&post, SyncSource::Poll, Utc::now())
        .await;

    assert_eq!(record.status, SyncStatus::Skipped);
    assert_eq!(record.error.as_deref(), Some("unsupported media kind: VIDEO"));
    assert!(h.listings.calls.lock().await.is_empty());
    assert_eq!(h.pipeline.ledger().stats().await.skipped, 1);
}

#[tokio::test]
async fn credential_failure_is_recorded_as_failed() {
    let h = harness(RecordingListings::default(), true);
    let post = candidate("c1", "Seasonal special today #MEO", MediaKind::Image, Duration::hours(1));

    let record = h
        .pipeline
        .process_candidate(&post, SyncSource::Poll, Utc::now())
        .await;

    assert_eq!(record.status, SyncStatus::Failed);
    assert_eq!(
        record.error.as_deref(),
        Some("credential refresh failed: invalid_grant")
    );
    assert!(h.listings.calls.lock().await.is_empty());
}

#[tokio::test]
async fn poll_cycle_processes_new_posts_and_advances_cursor() -> Result<()> {
    let h = harness(RecordingListings::default(), false);
    let before = Utc::now() - Duration::hours(2);
    seed_cursor(&h, before).await?;

    *h.source.recent.lock().await = vec![
        candidate("p3", "Weekend brunch is back #MEO", MediaKind::Image, Duration::minutes(10)),
        candidate("p2", "Just a cat picture", MediaKind::Image, Duration::minutes(30)),
        candidate("p1", "Old news from yesterday #MEO", MediaKind::Image, Duration::hours(5)),
    ];

    let report = h.pipeline.run_poll(25, false).await?;
    assert_eq!(report.fetched, 3);
    assert_eq!(report.new, 2);
    assert_eq!(report.synced, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.eligible.len(), 1);
    assert_eq!(report.eligible[0].post_id, "p3");

    let cursor = h.pipeline.cursor().load_or_init(Utc::now()).await?;
    assert!(cursor.last_poll_at > before);
    assert_eq!(cursor.last_processed_id.as_deref(), Some("p3"));
    assert_eq!(cursor.total_processed, 2);
    assert_eq!(cursor.total_synced, 1);
    assert_eq!(h.pipeline.ledger().stats().await.total, 2);

    // Nothing newer than the cursor now: the second cycle is a no-op.
    let again = h.pipeline.run_poll(25, false).await?;
    assert_eq!(again.new, 0);
    let unchanged = h.pipeline.cursor().load_or_init(Utc::now()).await?;
    assert_eq!(unchanged, cursor);
    Ok(())
}

#[tokio::test]
async fn publish_failure_does_not_stop_the_batch() -> Result<()> {
    let h = harness(
        RecordingListings::with_responses(vec![
            Err("Request contains an invalid argument.".into()),
            Ok("accounts/1/locations/2/localPosts/7".into()),
        ]),
        false,
    );
    seed_cursor(&h, Utc::now() - Duration::hours(1)).await?;
    *h.source.recent.lock().await = vec![
        candidate("a", "First tagged post here #MEO", MediaKind::Image, Duration::minutes(20)),
        candidate("b", "Second tagged post here #MEO", MediaKind::CarouselAlbum, Duration::minutes(5)),
    ];

    let report = h.pipeline.run_poll(25, false).await?;
    assert_eq!(report.failed, 1);
    assert_eq!(report.synced, 1);

    let records = h.pipeline.ledger().list(10, 0).await;
    let failed = records.iter().find(|r| r.post_id == "a").unwrap();
    assert_eq!(failed.status, SyncStatus::Failed);
    assert_eq!(
        failed.error.as_deref(),
        Some("Google Business Profile API error: Request contains an invalid argument.")
    );
    let synced = records.iter().find(|r| r.post_id == "b").unwrap();
    assert_eq!(synced.status, SyncStatus::Success);

    // At-most-once: the failed post is behind the cursor now.
    let cursor = h.pipeline.cursor().load_or_init(Utc::now()).await?;
    assert_eq!(cursor.total_processed, 2);
    assert_eq!(cursor.total_synced, 1);
    Ok(())
}

#[tokio::test]
async fn dry_run_reports_without_side_effects() -> Result<()> {
    let h = harness(RecordingListings::default(), false);
    let before = Utc::now() - Duration::hours(1);
    seed_cursor(&h, before).await?;
    *h.source.recent.lock().await = vec![
        candidate("d1", "Lunch set renewed #MEO #lunch", MediaKind::Image, Duration::minutes(5)),
        candidate("d2", "Reel #MEO", MediaKind::Video, Duration::minutes(6)),
    ];

    let report = h.pipeline.run_poll(25, true).await?;
    assert!(report.dry_run);
    assert_eq!(report.new, 2);
    assert_eq!(report.eligible.len(), 1);
    assert_eq!(report.eligible[0].tags, vec!["#MEO", "#lunch"]);
    assert_eq!(report.skipped, 1);

    assert!(h.listings.calls.lock().await.is_empty());
    assert_eq!(h.pipeline.ledger().stats().await.total, 0);
    let cursor = h.pipeline.cursor().load_or_init(Utc::now()).await?;
    assert_eq!(cursor.last_poll_at, before);
    assert_eq!(cursor.total_processed, 0);
    Ok(())
}

#[tokio::test]
async fn notification_processes_only_added_media() {
    let h = harness(RecordingListings::default(), false);
    h.source.by_id.lock().await.insert(
        "m1".into(),
        candidate("m1", "Fresh bread every morning #MEO", MediaKind::Image, Duration::minutes(1)),
    );

    let notification: Notification = serde_json::from_value(serde_json::json!({
        "object": "instagram",
        "entry": [{
            "id": "17841400000000000",
            "time": 1700000000,
            "changes": [
                { "field": "media", "value": { "media_id": "m1", "verb": "add" } },
                { "field": "comments", "value": { "media_id": "m1", "verb": "add" } },
                { "field": "media", "value": { "media_id": "m1", "verb": "remove" } },
                { "field": "media", "value": { "media_id": "missing", "verb": "add" } }
            ]
        }]
    }))
    .unwrap();

    let records = h.pipeline.handle_notification(&notification).await;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].post_id, "m1");
    assert_eq!(records[0].status, SyncStatus::Success);
    assert_eq!(records[1].post_id, "missing");
    assert_eq!(records[1].status, SyncStatus::Failed);
    assert_eq!(
        records[1].error.as_deref(),
        Some("Instagram API error: media missing not found")
    );
    assert!(records.iter().all(|r| r.source == Some(SyncSource::Webhook)));
    assert_eq!(h.listings.calls.lock().await.len(), 1);
    assert_eq!(h.pipeline.ledger().stats().await.total, 2);
}

#[tokio::test]
async fn post_seen_by_webhook_is_not_republished_by_poll() -> Result<()> {
    let h = harness(RecordingListings::default(), false);
    seed_cursor(&h, Utc::now() - Duration::hours(1)).await?;
    let post = candidate("m1", "Autumn tasting course #MEO", MediaKind::Image, Duration::minutes(5));
    h.source.by_id.lock().await.insert("m1".into(), post.clone());
    *h.source.recent.lock().await = vec![post];

    let notification: Notification = serde_json::from_value(serde_json::json!({
        "object": "instagram",
        "entry": [{ "changes": [{ "field": "media", "value": { "media_id": "m1", "verb": "add" } }] }]
    }))?;
    let pushed = h.pipeline.handle_notification(&notification).await;
    assert_eq!(pushed[0].status, SyncStatus::Success);

    let report = h.pipeline.run_poll(25, false).await?;
    assert_eq!(report.new, 1);
    assert_eq!(report.synced, 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(h.listings.calls.lock().await.len(), 1);

    let records = h.pipeline.ledger().list(10, 0).await;
    let polled = records
        .iter()
        .find(|r| r.source == Some(SyncSource::Poll))
        .unwrap();
    assert_eq!(polled.status, SyncStatus::Skipped);
    assert_eq!(polled.error.as_deref(), Some("already synced"));
    Ok(())
}

#[tokio::test]
async fn concurrent_webhook_deliveries_publish_once() {
    let h = harness(RecordingListings::default(), false);
    h.source.by_id.lock().await.insert(
        "dup".into(),
        candidate("dup", "Limited dessert menu #MEO", MediaKind::Image, Duration::minutes(1)),
    );
    let notification: Notification = serde_json::from_value(serde_json::json!({
        "entry": [{ "changes": [{ "field": "media", "value": { "media_id": "dup", "verb": "add" } }] }]
    }))
    .unwrap();

    let (a, b) = tokio::join!(
        h.pipeline.handle_notification(&notification),
        h.pipeline.handle_notification(&notification)
    );
    let mut statuses = vec![a[0].status, b[0].status];
    statuses.sort_by_key(|s| s.as_str());
    assert_eq!(statuses, vec![SyncStatus::Skipped, SyncStatus::Success]);
    assert_eq!(h.listings.calls.lock().await.len(), 1);
}

#[tokio::test]
async fn overlapping_polls_run_one_after_another() -> Result<()> {
    let h = harness(RecordingListings::default(), false);
    seed_cursor(&h, Utc::now() - Duration::hours(1)).await?;
    *h.source.recent.lock().await = vec![candidate(
        "p1",
        "Evening jazz night #MEO",
        MediaKind::Image,
        Duration::minutes(3),
    )];
    h.source.recent_delay_ms.store(100, Ordering::SeqCst);

    let slow = {
        let pipeline = Arc::clone(&h.pipeline);
        tokio::spawn(async move { pipeline.run_poll(25, false).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    h.source.recent_delay_ms.store(0, Ordering::SeqCst);
    let fast = h.pipeline.run_poll(25, false).await?;
    let slow = slow.await??;

    assert_eq!(slow.synced + fast.synced, 1);
    assert_eq!(h.listings.calls.lock().await.len(), 1);

    let cursor = h.pipeline.cursor().load_or_init(Utc::now()).await?;
    assert_eq!(cursor.total_processed, 1);
    assert_eq!(cursor.total_synced, 1);
    assert_eq!(cursor.last_processed_id.as_deref(), Some("p1"));
    Ok(())
}

#[tokio::test]
async fn cursor_never_moves_backwards() -> Result<()> {
    let h = harness(RecordingListings::default(), false);
    let future = Utc::now() + Duration::hours(1);
    seed_cursor(&h, future).await?;
    *h.source.recent.lock().await = vec![candidate(
        "late",
        "Clock skewed post #MEO",
        MediaKind::Image,
        Duration::hours(-2),
    )];

    let report = h.pipeline.run_poll(25, false).await?;
    assert_eq!(report.new, 1);
    let cursor = h.pipeline.cursor().load_or_init(Utc::now()).await?;
    assert_eq!(cursor.last_poll_at, future);
    Ok(())
}

#[tokio::test]
async fn dry_run_on_fresh_store_writes_nothing() -> Result<()> {
    let h = harness(RecordingListings::default(), false);
    let report = h.pipeline.run_poll(25, true).await?;
    assert!(report.dry_run);
    assert!(!h.dir.path().join("poll_state.json").exists());
    assert!(!h.dir.path().join("sync_records.jsonl").exists());
    Ok(())
}

#[tokio::test]
async fn corrupt_cursor_does_not_stop_polling() -> Result<()> {
    let h = harness(RecordingListings::default(), false);
    std::fs::write(h.dir.path().join("poll_state.json"), "not json at all")?;

    let report = h.pipeline.run_poll(25, false).await?;
    assert_eq!(report.new, 0);
    let cursor = h.pipeline.cursor().load_or_init(Utc::now()).await?;
    assert_eq!(cursor.total_processed, 0);
    Ok(())
}
