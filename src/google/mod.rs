use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use crate::config::Config;

pub mod token;

pub use token::{Credential, OAuthRefresher, TokenError, TokenManager, TokenSource};

const GBP_API_BASE: &str = "https://mybusiness.googleapis.com/";

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error(transparent)]
    Credential(#[from] TokenError),
    #[error("Google Business Profile API error: {0}")]
    Api(String),
    #[error("Google Business Profile API error: transport: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CallToAction {
    pub action_type: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    pub media_format: String,
    pub source_url: String,
}

/// Body of a local post creation request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ListingRequest {
    pub language_code: String,
    pub summary: String,
    pub topic_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_to_action: Option<CallToAction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<MediaItem>,
}

/// Write access to the destination location's posts.
#[async_trait]
pub trait ListingService: Send + Sync {
    /// Create (or, with `validate_only`, dry-check) a post; returns the listing id.
    async fn create_local_post(
        &self,
        access_token: &str,
        request: &ListingRequest,
        validate_only: bool,
    ) -> Result<String, PublishError>;
}

#[derive(Clone)]
pub struct GbpClient {
    http: Client,
    base_url: Url,
    account_id: String,
    location_id: String,
}

impl fmt::Debug for GbpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GbpClient")
            .field("base_url", &self.base_url)
            .field("account_id", &self.account_id)
            .field("location_id", &self.location_id)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct LocalPostResponse {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorBody,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: String,
}

impl GbpClient {
    pub fn new(account_id: String, location_id: String) -> Self {
        let base_url = Url::parse(GBP_API_BASE).expect("valid default GBP URL");
        Self::with_base_url(account_id, location_id, base_url)
    }

    pub fn with_base_url(account_id: String, location_id: String, base_url: Url) -> Self {
        Self {
            http: Client::builder()
                .user_agent("ig-gbp-sync/0.1")
                .build()
                .unwrap_or_default(),
            base_url,
            account_id,
            location_id,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.google.account_id.clone(), cfg.google.location_id.clone())
    }

    pub fn build_request(
        &self,
        access_token: &str,
        body: &ListingRequest,
        validate_only: bool,
    ) -> Result<reqwest::Request, PublishError> {
        let mut endpoint = self
            .base_url
            .join(&format!(
                "v4/accounts/{}/locations/{}/localPosts",
                self.account_id, self.location_id
            ))
            .map_err(|e| PublishError::Api(format!("invalid base URL: {e}")))?;
        if validate_only {
            endpoint.query_pairs_mut().append_pair("validateOnly", "true");
        }
        Ok(self
            .http
            .post(endpoint)
            .bearer_auth(access_token)
            .json(body)
            .build()?)
    }
}

#[async_trait]
impl ListingService for GbpClient {
    async fn create_local_post(
        &self,
        access_token: &str,
        request: &ListingRequest,
        validate_only: bool,
    ) -> Result<String, PublishError> {
        let http_request = self.build_request(access_token, request, validate_only)?;
        debug!(url=%http_request.url(), validate_only, "sending local post request");
        let res = self.http.execute(http_request).await?;

        let status = res.status();
        let body = res.text().await?;
        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!("rate limited by Google Business Profile");
        }
        if !status.is_success() {
            let message = serde_json::from_str::<ApiErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("{status}: {body}"));
            return Err(PublishError::Api(message));
        }

        if validate_only {
            return Ok(String::new());
        }
        let payload: LocalPostResponse = serde_json::from_str(&body)
            .map_err(|e| PublishError::Api(format!("invalid response: {e}")))?;
        payload
            .name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| PublishError::Api("response carried no post name".into()))
    }
}
