//! Sync-eligibility rules for candidate posts.
//!
//! [`TagFilter::verdict`] is pure: the evaluation instant is passed in, so the
//! same candidate and `now` always produce the same verdict.

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{Candidate, FilterVerdict, MediaKind, SkipReason};

/// `#` followed by word characters; `\w` is Unicode-aware, so kana/kanji tags match.
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"#\w+").expect("valid tag regex"));
static SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid space regex"));

pub const MAX_AGE_HOURS: i64 = 24;
pub const MIN_CONTENT_CHARS: usize = 10;
pub const MAX_TAGS: usize = 20;

/// All tag tokens in `text`, in order of appearance (duplicates kept).
pub fn extract_tags(text: &str) -> Vec<String> {
    TAG_RE.find_iter(text).map(|m| m.as_str().to_string()).collect()
}

/// Remove tag tokens and collapse whitespace runs to a single space. Ends are not trimmed.
pub fn strip_tags(text: &str) -> String {
    let without_tags = TAG_RE.replace_all(text, "");
    SPACE_RE.replace_all(&without_tags, " ").into_owned()
}

fn dedup_preserving_order(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        if !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

#[derive(Debug, Clone)]
pub struct TagFilter {
    /// Lowercased, without the leading `#`.
    target: String,
}

impl TagFilter {
    pub fn new(target_tag: &str) -> Self {
        Self {
            target: target_tag.trim().trim_start_matches('#').to_lowercase(),
        }
    }

    pub fn target(&self) -> String {
        format!("#{}", self.target)
    }

    fn is_target(&self, tag: &str) -> bool {
        tag.trim_start_matches('#').to_lowercase() == self.target
    }

    /// Decide whether `candidate` should be synced. The first failing rule wins.
    pub fn verdict(&self, candidate: &Candidate, now: DateTime<Utc>) -> FilterVerdict {
        let caption = candidate.caption.as_deref().unwrap_or("");
        let all_tags = extract_tags(caption);
        let matched = dedup_preserving_order(all_tags.clone());

        if !matched.iter().any(|t| self.is_target(t)) {
            return FilterVerdict::skipped(matched, SkipReason::TargetTagAbsent);
        }

        if !matches!(candidate.media_kind, MediaKind::Image | MediaKind::CarouselAlbum) {
            return FilterVerdict::skipped(
                matched,
                SkipReason::UnsupportedMediaKind(candidate.media_kind),
            );
        }

        if now - candidate.timestamp > Duration::hours(MAX_AGE_HOURS) {
            return FilterVerdict::skipped(matched, SkipReason::TooOld);
        }

        if caption.trim().is_empty() {
            return FilterVerdict::skipped(matched, SkipReason::EmptyCaption);
        }
        if strip_tags(caption).chars().count() < MIN_CONTENT_CHARS {
            return FilterVerdict::skipped(matched, SkipReason::ContentTooShort);
        }
        if all_tags.len() > MAX_TAGS {
            return FilterVerdict::skipped(matched, SkipReason::TooManyTags(all_tags.len()));
        }

        FilterVerdict::eligible(matched)
    }
}
