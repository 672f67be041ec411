use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Url};
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::model::Candidate;
use crate::instagram::model::{GraphErrorResp, MediaListResp, MediaResp, MEDIA_FIELDS};

pub mod model;

const GRAPH_API_BASE: &str = "https://graph.facebook.com/";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Instagram API error: {0}")]
    Api(String),
    #[error("Instagram API error: transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Instagram API error: {0}")]
    Decode(String),
}

/// Read access to the source account's posts.
#[async_trait]
pub trait SourceService: Send + Sync {
    async fn fetch_media(&self, media_id: &str) -> Result<Candidate, SourceError>;

    /// Up to `limit` most recent posts, newest first.
    async fn recent_media(
        &self,
        limit: u32,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Candidate>, SourceError>;
}

#[derive(Clone)]
pub struct InstagramClient {
    http: Client,
    base_url: Url,
    api_version: String,
    user_id: String,
    access_token: String,
}

impl fmt::Debug for InstagramClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstagramClient")
            .field("base_url", &self.base_url)
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

impl InstagramClient {
    pub fn new(access_token: String, user_id: String, api_version: String) -> Self {
        let base_url = Url::parse(GRAPH_API_BASE).expect("valid default Graph API URL");
        Self::with_base_url(access_token, user_id, api_version, base_url)
    }

    pub fn with_base_url(
        access_token: String,
        user_id: String,
        api_version: String,
        base_url: Url,
    ) -> Self {
        Self {
            http: Client::builder()
                .user_agent("ig-gbp-sync/0.1")
                .build()
                .unwrap_or_default(),
            base_url,
            api_version,
            user_id,
            access_token,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            cfg.instagram.access_token.clone(),
            cfg.instagram.user_id.clone(),
            cfg.instagram.api_version.clone(),
        )
    }

    fn endpoint(&self, path: &str) -> Result<Url, SourceError> {
        self.base_url
            .join(&format!("{}/{}", self.api_version, path))
            .map_err(|e| SourceError::Api(format!("invalid Graph API URL: {e}")))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<T, SourceError> {
        debug!(url=%url, "sending instagram request");
        let res = self
            .http
            .get(url)
            .query(query)
            .query(&[("access_token", self.access_token.as_str())])
            .send()
            .await?;

        let status = res.status();
        let body = res.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<GraphErrorResp>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("{status}: {body}"));
            return Err(SourceError::Api(message));
        }
        serde_json::from_str(&body).map_err(|e| SourceError::Decode(e.to_string()))
    }
}

#[async_trait]
impl SourceService for InstagramClient {
    async fn fetch_media(&self, media_id: &str) -> Result<Candidate, SourceError> {
        let url = self.endpoint(media_id)?;
        let media: MediaResp = self
            .get_json(url, &[("fields", MEDIA_FIELDS.to_string())])
            .await?;
        media.into_candidate().map_err(SourceError::Decode)
    }

    async fn recent_media(
        &self,
        limit: u32,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Candidate>, SourceError> {
        let url = self.endpoint(&format!("{}/media", self.user_id))?;
        let mut query = vec![
            ("fields", MEDIA_FIELDS.to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(since) = since {
            query.push(("since", since.timestamp().to_string()));
        }
        let list: MediaListResp = self.get_json(url, &query).await?;
        // One malformed item must not hold back the rest of the page.
        Ok(list
            .data
            .into_iter()
            .filter_map(|m| match m.into_candidate() {
                Ok(candidate) => Some(candidate),
                Err(err) => {
                    warn!(%err, "skipping undecodable media item");
                    None
                }
            })
            .collect())
    }
}
