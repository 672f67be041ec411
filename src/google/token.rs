//! Access-token lifecycle for the Google Business Profile API.
//!
//! One [`TokenManager`] owns the live [`Credential`]. Callers ask for a token
//! with [`TokenManager::valid_token`]; when the held credential is missing or
//! inside the safety margin, exactly one refresh runs and every concurrent
//! caller awaits that same refresh.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::{Client, Url};
use serde::Deserialize;
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{info, warn};

const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
pub const SAFETY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("credential refresh failed: {0}")]
    RefreshFailed(String),
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl Credential {
    /// Usable at `now` with at least the safety margin left.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - Duration::seconds(SAFETY_MARGIN_SECS) > now
    }
}

/// Exchanges the long-lived refresh token for a new access token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn refresh(&self) -> Result<Credential, TokenError>;
}

#[derive(Clone)]
pub struct OAuthRefresher {
    http: Client,
    endpoint: Url,
    client_id: String,
    client_secret: String,
    refresh_token: String,
}

impl fmt::Debug for OAuthRefresher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthRefresher")
            .field("endpoint", &self.endpoint)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

impl OAuthRefresher {
    pub fn new(client_id: String, client_secret: String, refresh_token: String) -> Self {
        let endpoint = Url::parse(TOKEN_ENDPOINT).expect("valid default token URL");
        Self::with_endpoint(client_id, client_secret, refresh_token, endpoint)
    }

    pub fn from_config(cfg: &crate::config::Config) -> Self {
        Self::new(
            cfg.google.client_id.clone(),
            cfg.google.client_secret.clone(),
            cfg.google.refresh_token.clone(),
        )
    }

    pub fn with_endpoint(
        client_id: String,
        client_secret: String,
        refresh_token: String,
        endpoint: Url,
    ) -> Self {
        Self {
            http: Client::builder()
                .user_agent("ig-gbp-sync/0.1")
                .build()
                .unwrap_or_default(),
            endpoint,
            client_id,
            client_secret,
            refresh_token,
        }
    }
}

#[async_trait]
impl TokenSource for OAuthRefresher {
    async fn refresh(&self) -> Result<Credential, TokenError> {
        let form = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", self.refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];
        let res = self
            .http
            .post(self.endpoint.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| TokenError::RefreshFailed(e.to_string()))?;

        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|e| TokenError::RefreshFailed(e.to_string()))?;
        if !status.is_success() {
            let message = match serde_json::from_str::<TokenErrorResponse>(&body) {
                Ok(e) => match e.error_description {
                    Some(desc) => format!("{}: {}", e.error, desc),
                    None => e.error,
                },
                Err(_) => format!("{status}: {body}"),
            };
            return Err(TokenError::RefreshFailed(message));
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| TokenError::RefreshFailed(format!("invalid token response: {e}")))?;
        Ok(Credential {
            access_token: token.access_token,
            expires_at: expiry_after(Utc::now(), token.expires_in),
        })
    }
}

/// Longest lifetime accepted from a token reply.
const MAX_EXPIRES_IN_SECS: i64 = 24 * 60 * 60;

/// Expiry instant for an `expires_in` offset, clamped to `0..=MAX_EXPIRES_IN_SECS`.
fn expiry_after(now: DateTime<Utc>, expires_in: i64) -> DateTime<Utc> {
    now + Duration::seconds(expires_in.clamp(0, MAX_EXPIRES_IN_SECS))
}

type RefreshFuture = Shared<BoxFuture<'static, Result<Credential, TokenError>>>;

#[derive(Default)]
struct TokenState {
    credential: Option<Credential>,
    pending: Option<(u64, RefreshFuture)>,
    generation: u64,
}

pub struct TokenManager {
    source: Arc<dyn TokenSource>,
    state: Mutex<TokenState>,
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager").finish_non_exhaustive()
    }
}

impl TokenManager {
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self {
            source,
            state: Mutex::new(TokenState::default()),
        }
    }

    /// Seed the manager with an already-issued credential.
    pub fn with_credential(source: Arc<dyn TokenSource>, credential: Credential) -> Self {
        let manager = Self::new(source);
        manager.lock().credential = Some(credential);
        manager
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TokenState> {
        // The guarded data is only ever replaced whole, so a poisoned lock is still consistent.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn current(&self) -> Option<Credential> {
        self.lock().credential.clone()
    }

    /// Return an access token with at least [`SAFETY_MARGIN_SECS`] of validity,
    /// refreshing first when needed.
    pub async fn valid_token(&self) -> Result<String, TokenError> {
        let (generation, refresh) = {
            let mut guard = self.lock();
            let state = &mut *guard;
            if let Some(cred) = state.credential.as_ref().filter(|c| c.is_fresh(Utc::now())) {
                return Ok(cred.access_token.clone());
            }
            match &state.pending {
                Some((generation, refresh)) => (*generation, refresh.clone()),
                None => {
                    state.generation += 1;
                    let generation = state.generation;
                    let source = Arc::clone(&self.source);
                    let refresh = async move { source.refresh().await }.boxed().shared();
                    state.pending = Some((generation, refresh.clone()));
                    info!(generation, "refreshing destination credential");
                    (generation, refresh)
                }
            }
        };

        let outcome = refresh.await;

        let mut guard = self.lock();
        let state = &mut *guard;
        if matches!(&state.pending, Some((g, _)) if *g == generation) {
            state.pending = None;
            if let Ok(cred) = &outcome {
                state.credential = Some(cred.clone());
            }
        }
        match outcome {
            Ok(cred) => Ok(cred.access_token),
            Err(err) => {
                warn!(%err, "credential refresh failed");
                Err(err)
            }
        }
    }
}
