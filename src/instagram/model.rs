//! Wire types returned by the Instagram Graph API.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::model::{Candidate, MediaKind};

pub const MEDIA_FIELDS: &str =
    "id,caption,media_type,media_url,permalink,timestamp,like_count,comments_count";

#[derive(Debug, Clone, Deserialize)]
pub struct MediaResp {
    pub id: String,
    #[serde(default)]
    pub caption: Option<String>,
    pub media_type: String,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub permalink: Option<String>,
    pub timestamp: String,
    #[serde(default)]
    pub like_count: Option<u64>,
    #[serde(default)]
    pub comments_count: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaListResp {
    #[serde(default)]
    pub data: Vec<MediaResp>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphErrorResp {
    pub error: GraphError,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphError {
    pub message: String,
}

/// Graph timestamps look like `2024-05-01T09:30:00+0000`; RFC 3339 is accepted too.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z"))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

impl MediaResp {
    pub fn into_candidate(self) -> Result<Candidate, String> {
        let timestamp = parse_timestamp(&self.timestamp)
            .ok_or_else(|| format!("media {} has invalid timestamp {}", self.id, self.timestamp))?;
        let permalink = self
            .permalink
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| format!("https://www.instagram.com/p/{}/", self.id));
        Ok(Candidate {
            media_kind: MediaKind::parse_kind(&self.media_type),
            id: self.id,
            caption: self.caption.filter(|c| !c.is_empty()),
            media_url: self.media_url.filter(|u| !u.is_empty()),
            permalink,
            timestamp,
            like_count: self.like_count.unwrap_or(0),
            comments_count: self.comments_count.unwrap_or(0),
        })
    }
}
