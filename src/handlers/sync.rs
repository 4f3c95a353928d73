//! # Document Sync Handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;

use crate::auth::{CallerHeaders, RequestMeta, ensure_can_edit};
use crate::error::{ApiError, ServiceError};
use crate::models::doc_sync_status::SyncState;
use crate::server::AppState;
use crate::services::sync::{SyncCallback, SyncStatusView, SyncTriggerResponse};

/// Answer to a sync callback. Stale callbacks are acknowledged with
/// `accepted: false` so the scheduler does not retry them.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SyncCallbackResponse {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SyncState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Sync a document to its external target
#[utoipa::path(
    post,
    path = "/api/v1/documents/{id}/sync",
    security(("bearer_auth" = [])),
    params(("id" = i64, Path, description = "Document id"), CallerHeaders),
    responses(
        (status = 202, description = "Sync started or already pending", body = SyncTriggerResponse),
        (status = 400, description = "Missing or invalid sync_target", body = ApiError),
        (status = 404, description = "Document not found", body = ApiError),
        (status = 502, description = "Scheduler submission failed", body = ApiError)
    ),
    tag = "sync"
)]
pub async fn trigger_sync(
    State(state): State<AppState>,
    meta: RequestMeta,
    Path(document_id): Path<i64>,
) -> Result<(StatusCode, Json<SyncTriggerResponse>), ApiError> {
    ensure_can_edit(&meta)?;
    let response = state.sync.trigger_sync(&meta, document_id).await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// Latest sync attempt of a document
#[utoipa::path(
    get,
    path = "/api/v1/documents/{id}/sync",
    security(("bearer_auth" = [])),
    params(("id" = i64, Path, description = "Document id")),
    responses(
        (status = 200, description = "Sync status", body = SyncStatusView),
        (status = 404, description = "Document was never synced", body = ApiError)
    ),
    tag = "sync"
)]
pub async fn get_sync_status(
    State(state): State<AppState>,
    Path(document_id): Path<i64>,
) -> Result<Json<SyncStatusView>, ApiError> {
    Ok(Json(state.sync.get_sync_status(document_id).await?))
}

/// Callback from the sync flow
#[utoipa::path(
    post,
    path = "/api/v1/sync/callback",
    params(("X-Webhook-Secret" = Option<String>, Header, description = "Shared callback secret")),
    request_body = SyncCallback,
    responses(
        (status = 200, description = "Callback processed or acknowledged as stale", body = SyncCallbackResponse),
        (status = 400, description = "Invalid status", body = ApiError),
        (status = 401, description = "Invalid webhook secret", body = ApiError),
        (status = 404, description = "Document was never synced", body = ApiError)
    ),
    tag = "callbacks"
)]
pub async fn sync_callback(
    State(state): State<AppState>,
    Json(callback): Json<SyncCallback>,
) -> Result<Json<SyncCallbackResponse>, ApiError> {
    match state.sync.handle_sync_callback(callback).await {
        Ok(outcome) => Ok(Json(SyncCallbackResponse {
            accepted: outcome.accepted,
            status: Some(outcome.status),
            message: None,
        })),
        Err(ServiceError::StaleCallback(message)) => {
            warn!(%message, "Acknowledging stale sync callback");
            Ok(Json(SyncCallbackResponse {
                accepted: false,
                status: None,
                message: Some(message),
            }))
        }
        Err(err) => Err(err.into()),
    }
}
