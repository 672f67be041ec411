//! Turns eligible candidates into Google Business Profile local posts.

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::filter::{strip_tags, MIN_CONTENT_CHARS};
use crate::google::{
    CallToAction, ListingRequest, ListingService, MediaItem, PublishError, TokenManager,
};
use crate::model::{Candidate, MediaKind};

pub const MAX_SUMMARY_CHARS: usize = 1500;
pub const DEFAULT_CAPTION: &str = "New post on Instagram";
pub const FALLBACK_SUMMARY: &str = "We shared a new update on Instagram. Tap below to see it.";
const ELLIPSIS: &str = "...";

/// Summary text for a listing: tags stripped, bounded to [`MAX_SUMMARY_CHARS`].
///
/// The minimum-length check uses the same measure as the filter: tags removed
/// and whitespace runs collapsed, but ends not trimmed. Trimming happens after
/// the check, so an eligible caption such as "New menu! #MEO" (10 characters
/// once stripped) publishes as the 9-character "New menu!" rather than the
/// fallback sentence.
pub fn build_summary(caption: Option<&str>) -> String {
    let cleaned = strip_tags(caption.unwrap_or(DEFAULT_CAPTION));
    let bounded = if cleaned.chars().count() > MAX_SUMMARY_CHARS {
        let keep = MAX_SUMMARY_CHARS - ELLIPSIS.len();
        let mut truncated: String = cleaned.chars().take(keep).collect();
        truncated.push_str(ELLIPSIS);
        truncated
    } else {
        cleaned
    };

    if bounded.trim().is_empty() || bounded.chars().count() < MIN_CONTENT_CHARS {
        return FALLBACK_SUMMARY.to_string();
    }
    bounded.trim().to_string()
}

pub fn build_listing_request(candidate: &Candidate, language_code: &str) -> ListingRequest {
    let media = match (&candidate.media_kind, &candidate.media_url) {
        (MediaKind::Image, Some(url)) => vec![MediaItem {
            media_format: "PHOTO".into(),
            source_url: url.clone(),
        }],
        _ => Vec::new(),
    };
    ListingRequest {
        language_code: language_code.to_string(),
        summary: build_summary(candidate.caption.as_deref()),
        topic_type: "STANDARD".into(),
        call_to_action: Some(CallToAction {
            action_type: "LEARN_MORE".into(),
            url: candidate.permalink.clone(),
        }),
        media,
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Validation {
    pub ok: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

#[derive(Clone)]
pub struct Publisher {
    tokens: Arc<TokenManager>,
    listings: Arc<dyn ListingService>,
    language_code: String,
}

impl Publisher {
    pub fn new(
        tokens: Arc<TokenManager>,
        listings: Arc<dyn ListingService>,
        language_code: impl Into<String>,
    ) -> Self {
        Self {
            tokens,
            listings,
            language_code: language_code.into(),
        }
    }

    /// Create a local post for `candidate` and return its listing id.
    #[instrument(skip_all, fields(post_id = %candidate.id))]
    pub async fn publish(&self, candidate: &Candidate) -> Result<String, PublishError> {
        let token = self.tokens.valid_token().await?;
        let request = build_listing_request(candidate, &self.language_code);
        let listing_id = self
            .listings
            .create_local_post(&token, &request, false)
            .await?;
        info!(%listing_id, "created local post");
        Ok(listing_id)
    }

    /// Ask the destination to check the post without creating it.
    pub async fn validate(&self, candidate: &Candidate) -> Validation {
        let request = build_listing_request(candidate, &self.language_code);
        let outcome = match self.tokens.valid_token().await {
            Ok(token) => self
                .listings
                .create_local_post(&token, &request, true)
                .await
                .map(|_| ()),
            Err(err) => Err(PublishError::from(err)),
        };
        match outcome {
            Ok(()) => Validation {
                ok: true,
                errors: Vec::new(),
            },
            Err(err) => Validation {
                ok: false,
                errors: vec![err.to_string()],
            },
        }
    }
}
