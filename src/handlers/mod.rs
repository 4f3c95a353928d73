//! # API Handlers
//!
//! HTTP endpoint handlers for the YDMS API. Role checks happen here; services
//! only apply ownership filters.

use axum::{extract::State, http::StatusCode, response::Json};

use crate::db;
use crate::error::ApiError;
use crate::models::ServiceInfo;
use crate::server::AppState;

pub mod batches;
pub mod categories;
pub mod documents;
pub mod sync;
pub mod types;
pub mod workflows;

pub use types::{PageQuery, StatusResponse, TriggerRunBody};

/// Root handler that returns basic service information
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service information", body = ServiceInfo)
    ),
    tag = "root"
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}

/// Liveness probe
#[utoipa::path(
    get,
    path = "/healthz",
    responses(
        (status = 200, description = "Process is alive", body = StatusResponse)
    ),
    tag = "root"
)]
pub async fn healthz() -> Json<StatusResponse> {
    Json(StatusResponse::ok())
}

/// Readiness probe: the database must answer
#[utoipa::path(
    get,
    path = "/readyz",
    responses(
        (status = 200, description = "Ready to serve traffic", body = StatusResponse),
        (status = 503, description = "Database unavailable", body = ApiError)
    ),
    tag = "root"
)]
pub async fn readyz(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    db::health_check(&state.db).await.map_err(|err| {
        tracing::warn!(error = %err, "Readiness check failed");
        ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_UNAVAILABLE",
            "Database unavailable",
        )
    })?;
    Ok(Json(StatusResponse::ok()))
}

#[cfg(test)]
mod tests;
