//! HTTP surface: webhook endpoint, record queries and manual sync.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::ledger::DEFAULT_PAGE_SIZE;
use crate::sync::SyncPipeline;
use crate::webhook::{self, Notification, VerifyError, SIGNATURE_HEADER};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<SyncPipeline>,
    pub app_secret: String,
    pub verify_token: String,
    pub default_poll_limit: u32,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhook", get(verify_subscription).post(receive_notification))
        .route("/api/records", get(list_records))
        .route("/api/stats", get(stats))
        .route("/api/sync", post(trigger_sync))
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct HandshakeParams {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

async fn verify_subscription(
    State(state): State<AppState>,
    Query(params): Query<HandshakeParams>,
) -> Response {
    match webhook::verify_handshake(
        params.mode.as_deref(),
        params.verify_token.as_deref(),
        params.challenge.as_deref(),
        &state.verify_token,
    ) {
        Some(challenge) => {
            info!("webhook subscription verified");
            (StatusCode::OK, challenge.to_string()).into_response()
        }
        None => {
            warn!(mode = ?params.mode, "webhook subscription rejected");
            (
                StatusCode::FORBIDDEN,
                Json(json!({ "error": "verification failed" })),
            )
                .into_response()
        }
    }
}

async fn receive_notification(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    if let Err(err) = webhook::verify_signature(&body, signature, &state.app_secret) {
        warn!(%err, "rejected webhook delivery");
        let status = match err {
            VerifyError::MissingSignature => StatusCode::BAD_REQUEST,
            VerifyError::InvalidSignature => StatusCode::FORBIDDEN,
        };
        return (status, Json(json!({ "error": err.to_string() }))).into_response();
    }

    let notification: Notification = match serde_json::from_slice(&body) {
        Ok(n) => n,
        Err(err) => {
            warn!(%err, "unparseable webhook payload");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "invalid payload" })),
            )
                .into_response();
        }
    };

    state.pipeline.spawn_notification(notification);
    (StatusCode::OK, "EVENT_RECEIVED").into_response()
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    page: Option<usize>,
    page_size: Option<usize>,
}

async fn list_records(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> impl IntoResponse {
    let page = state
        .pipeline
        .ledger()
        .page(
            params.page.unwrap_or(1),
            params.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        )
        .await;
    Json(page)
}

async fn stats(State(state): State<AppState>) -> Response {
    let ledger = state.pipeline.ledger().stats().await;
    match state.pipeline.cursor().peek().await {
        Ok(cursor) => Json(json!({ "records": ledger, "cursor": cursor })).into_response(),
        Err(err) => {
            error!(error = ?err, "failed to read poll cursor");
            Json(json!({ "records": ledger, "cursor": null })).into_response()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SyncParams {
    limit: Option<u32>,
    #[serde(default)]
    dry_run: bool,
}

async fn trigger_sync(
    State(state): State<AppState>,
    body: Option<Json<SyncParams>>,
) -> Response {
    let params = body.map(|Json(p)| p).unwrap_or_default();
    let limit = params
        .limit
        .unwrap_or(state.default_poll_limit)
        .clamp(1, 100);
    match state.pipeline.run_poll(limit, params.dry_run).await {
        Ok(report) => Json(report).into_response(),
        Err(err) => {
            error!(error = ?err, "manual sync failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": format!("{err:#}") })),
            )
                .into_response()
        }
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
