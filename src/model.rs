use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaKind {
    Image,
    Video,
    CarouselAlbum,
    #[serde(other)]
    Other,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "IMAGE",
            MediaKind::Video => "VIDEO",
            MediaKind::CarouselAlbum => "CAROUSEL_ALBUM",
            MediaKind::Other => "OTHER",
        }
    }

    pub fn parse_kind(s: &str) -> MediaKind {
        match s {
            "IMAGE" => MediaKind::Image,
            "VIDEO" => MediaKind::Video,
            "CAROUSEL_ALBUM" => MediaKind::CarouselAlbum,
            _ => MediaKind::Other,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A source post under consideration. Immutable once fetched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Candidate {
    pub id: String,
    pub caption: Option<String>,
    pub media_kind: MediaKind,
    pub media_url: Option<String>,
    pub permalink: String,
    pub timestamp: DateTime<Utc>,
    pub like_count: u64,
    pub comments_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    TargetTagAbsent,
    UnsupportedMediaKind(MediaKind),
    TooOld,
    EmptyCaption,
    ContentTooShort,
    TooManyTags(usize),
    /// A `success` record for the same post already exists.
    AlreadySynced,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::TargetTagAbsent => f.write_str("target tag absent"),
            SkipReason::UnsupportedMediaKind(kind) => write!(f, "unsupported media kind: {kind}"),
            SkipReason::TooOld => f.write_str("too old"),
            SkipReason::EmptyCaption => f.write_str("empty caption"),
            SkipReason::ContentTooShort => f.write_str("content too short"),
            SkipReason::TooManyTags(n) => write!(f, "too many tags: {n}"),
            SkipReason::AlreadySynced => f.write_str("already synced"),
        }
    }
}

/// Filter Engine output for one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterVerdict {
    pub eligible: bool,
    pub matched_tags: Vec<String>,
    pub reason: Option<SkipReason>,
}

impl FilterVerdict {
    pub fn eligible(matched_tags: Vec<String>) -> Self {
        Self {
            eligible: true,
            matched_tags,
            reason: None,
        }
    }

    pub fn skipped(matched_tags: Vec<String>, reason: SkipReason) -> Self {
        Self {
            eligible: false,
            matched_tags,
            reason: Some(reason),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Success,
    Failed,
    Skipped,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Success => "success",
            SyncStatus::Failed => "failed",
            SyncStatus::Skipped => "skipped",
        }
    }
}

/// Which ingestion path produced a candidate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncSource {
    Poll,
    Webhook,
}

/// Permanent outcome of one sync attempt. Never updated after it is written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub post_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_kind: Option<MediaKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing_id: Option<String>,
    pub status: SyncStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SyncSource>,
}

impl SyncRecord {
    /// Start a record for `post_id` with a fresh id; status and details are filled by the caller.
    pub fn new(post_id: impl Into<String>, status: SyncStatus, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp,
            post_id: post_id.into(),
            caption: None,
            media_url: None,
            media_kind: None,
            listing_id: None,
            status,
            error: None,
            tags: Vec::new(),
            duration_ms: 0,
            source: None,
        }
    }

    pub fn with_candidate(mut self, candidate: &Candidate) -> Self {
        self.caption = candidate.caption.clone();
        self.media_url = candidate.media_url.clone();
        self.media_kind = Some(candidate.media_kind);
        self
    }
}

/// Durable bookmark of poll progress.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollCursor {
    pub last_poll_at: DateTime<Utc>,
    #[serde(default)]
    pub last_processed_id: Option<String>,
    #[serde(default)]
    pub total_processed: u64,
    #[serde(default)]
    pub total_synced: u64,
}

impl PollCursor {
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            last_poll_at: now,
            last_processed_id: None,
            total_processed: 0,
            total_synced: 0,
        }
    }
}
