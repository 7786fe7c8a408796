//! Request handlers

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{debug, error};

use crate::app::coordinator::{ServeOutcome, TriggerOutcome};
use crate::constants::build;

use super::AppState;

/// GET /images/:name
pub async fn get_image(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    if name != state.file_name() {
        return (StatusCode::NOT_FOUND, "Not found").into_response();
    }

    match state.coordinator.serve().await {
        ServeOutcome::Hit(bytes) => {
            let etag = format!("\"{:x}\"", md5::compute(&bytes));
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, state.config.content_type.clone()),
                    (header::CACHE_CONTROL, state.config.cache_control.clone()),
                    (header::ETAG, etag),
                ],
                bytes,
            )
                .into_response()
        }
        ServeOutcome::TryLater(reason) => {
            debug!("Answering try later: {}", reason);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [(header::RETRY_AFTER, state.config.retry_after_secs.to_string())],
                reason.to_string(),
            )
                .into_response()
        }
        ServeOutcome::ReadFailed(e) => {
            error!("Failed to serve cached resource: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to read cached resource",
            )
                .into_response()
        }
    }
}

/// GET /
pub async fn index() -> impl IntoResponse {
    format!(
        "cache-relay {} (commit {}, tag {})\n",
        env!("CARGO_PKG_VERSION"),
        build::COMMIT_SHA,
        build::COMMIT_TAG
    )
}

/// GET /status
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.coordinator.status().await)
}

/// GET /healthz
pub async fn healthz() -> &'static str {
    "ok"
}

/// POST /refresh
pub async fn refresh(State(state): State<AppState>) -> impl IntoResponse {
    match state.coordinator.request_refresh().await {
        TriggerOutcome::Closed => (StatusCode::SERVICE_UNAVAILABLE, "Refresh loop not running"),
        TriggerOutcome::Queued | TriggerOutcome::Coalesced => {
            (StatusCode::ACCEPTED, "Refresh requested")
        }
    }
}
