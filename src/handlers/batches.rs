//! # Batch API Handlers
//!
//! Preview, execute and poll batch workflows and batch syncs over a category
//! subtree. Execution answers `202 Accepted` with the batch id; progress is
//! read back through the status endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use uuid::Uuid;

use crate::auth::{CallerHeaders, RequestMeta, ensure_can_edit};
use crate::error::ApiError;
use crate::handlers::PageQuery;
use crate::server::AppState;
use crate::services::batch_sync::{
    BatchSyncExecuteResponse, BatchSyncPreview, BatchSyncRequest, SyncBatchList, SyncBatchView,
};
use crate::services::batch_workflow::{
    BatchExecuteResponse, BatchWorkflowPreview, BatchWorkflowRequest, WorkflowBatchList,
    WorkflowBatchView,
};

/// Preview which nodes a batch workflow would run on
#[utoipa::path(
    post,
    path = "/api/v1/nodes/{id}/batch-workflows/preview",
    security(("bearer_auth" = [])),
    params(("id" = i64, Path, description = "Root node id"), CallerHeaders),
    request_body = BatchWorkflowRequest,
    responses(
        (status = 200, description = "Per-node preview", body = BatchWorkflowPreview),
        (status = 400, description = "Definition unusable or root deleted", body = ApiError),
        (status = 404, description = "Workflow or node not found", body = ApiError)
    ),
    tag = "batches"
)]
pub async fn preview_batch_workflow(
    State(state): State<AppState>,
    meta: RequestMeta,
    Path(root_node_id): Path<i64>,
    Json(request): Json<BatchWorkflowRequest>,
) -> Result<Json<BatchWorkflowPreview>, ApiError> {
    Ok(Json(
        state
            .batch_workflows
            .preview(&meta, root_node_id, request)
            .await?,
    ))
}

/// Start a batch workflow
#[utoipa::path(
    post,
    path = "/api/v1/nodes/{id}/batch-workflows/execute",
    security(("bearer_auth" = [])),
    params(("id" = i64, Path, description = "Root node id"), CallerHeaders),
    request_body = BatchWorkflowRequest,
    responses(
        (status = 202, description = "Batch accepted", body = BatchExecuteResponse),
        (status = 400, description = "Definition unusable or root deleted", body = ApiError),
        (status = 403, description = "Caller may not run workflows", body = ApiError),
        (status = 404, description = "Workflow or node not found", body = ApiError)
    ),
    tag = "batches"
)]
pub async fn execute_batch_workflow(
    State(state): State<AppState>,
    meta: RequestMeta,
    Path(root_node_id): Path<i64>,
    Json(request): Json<BatchWorkflowRequest>,
) -> Result<(StatusCode, Json<BatchExecuteResponse>), ApiError> {
    ensure_can_edit(&meta)?;
    let (response, _handle) = state
        .batch_workflows
        .execute(&meta, root_node_id, request)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// List batch workflows
#[utoipa::path(
    get,
    path = "/api/v1/batch-workflows",
    security(("bearer_auth" = [])),
    params(PageQuery, CallerHeaders),
    responses(
        (status = 200, description = "Batches visible to the caller", body = WorkflowBatchList)
    ),
    tag = "batches"
)]
pub async fn list_batch_workflows(
    State(state): State<AppState>,
    meta: RequestMeta,
    Query(query): Query<PageQuery>,
) -> Result<Json<WorkflowBatchList>, ApiError> {
    Ok(Json(
        state
            .batch_workflows
            .list_batches(&meta, query.page())
            .await?,
    ))
}

/// Batch workflow status and progress
#[utoipa::path(
    get,
    path = "/api/v1/batch-workflows/{batch_id}",
    security(("bearer_auth" = [])),
    params(("batch_id" = Uuid, Path, description = "Batch id"), CallerHeaders),
    responses(
        (status = 200, description = "Batch status", body = WorkflowBatchView),
        (status = 403, description = "Batch belongs to another user", body = ApiError),
        (status = 404, description = "Batch not found", body = ApiError)
    ),
    tag = "batches"
)]
pub async fn get_batch_workflow(
    State(state): State<AppState>,
    meta: RequestMeta,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<WorkflowBatchView>, ApiError> {
    Ok(Json(state.batch_workflows.get_batch(&meta, batch_id).await?))
}

/// Preview which documents a batch sync would push
#[utoipa::path(
    post,
    path = "/api/v1/nodes/{id}/batch-sync/preview",
    security(("bearer_auth" = [])),
    params(("id" = i64, Path, description = "Root node id"), CallerHeaders),
    request_body = BatchSyncRequest,
    responses(
        (status = 200, description = "Per-document preview", body = BatchSyncPreview),
        (status = 404, description = "Node not found", body = ApiError)
    ),
    tag = "batches"
)]
pub async fn preview_batch_sync(
    State(state): State<AppState>,
    meta: RequestMeta,
    Path(root_node_id): Path<i64>,
    Json(request): Json<BatchSyncRequest>,
) -> Result<Json<BatchSyncPreview>, ApiError> {
    Ok(Json(
        state
            .batch_syncs
            .preview(&meta, root_node_id, request)
            .await?,
    ))
}

/// Start a batch sync
#[utoipa::path(
    post,
    path = "/api/v1/nodes/{id}/batch-sync/execute",
    security(("bearer_auth" = [])),
    params(("id" = i64, Path, description = "Root node id"), CallerHeaders),
    request_body = BatchSyncRequest,
    responses(
        (status = 202, description = "Batch accepted", body = BatchSyncExecuteResponse),
        (status = 403, description = "Caller may not sync documents", body = ApiError),
        (status = 404, description = "Node not found", body = ApiError)
    ),
    tag = "batches"
)]
pub async fn execute_batch_sync(
    State(state): State<AppState>,
    meta: RequestMeta,
    Path(root_node_id): Path<i64>,
    Json(request): Json<BatchSyncRequest>,
) -> Result<(StatusCode, Json<BatchSyncExecuteResponse>), ApiError> {
    ensure_can_edit(&meta)?;
    let (response, _handle) = state
        .batch_syncs
        .execute(&meta, root_node_id, request)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// List batch syncs
#[utoipa::path(
    get,
    path = "/api/v1/batch-sync",
    security(("bearer_auth" = [])),
    params(PageQuery, CallerHeaders),
    responses(
        (status = 200, description = "Sync batches visible to the caller", body = SyncBatchList)
    ),
    tag = "batches"
)]
pub async fn list_batch_syncs(
    State(state): State<AppState>,
    meta: RequestMeta,
    Query(query): Query<PageQuery>,
) -> Result<Json<SyncBatchList>, ApiError> {
    Ok(Json(
        state.batch_syncs.list_batches(&meta, query.page()).await?,
    ))
}

/// Batch sync status and progress
#[utoipa::path(
    get,
    path = "/api/v1/batch-sync/{batch_id}",
    security(("bearer_auth" = [])),
    params(("batch_id" = Uuid, Path, description = "Batch id"), CallerHeaders),
    responses(
        (status = 200, description = "Sync batch status", body = SyncBatchView),
        (status = 403, description = "Batch belongs to another user", body = ApiError),
        (status = 404, description = "Batch not found", body = ApiError)
    ),
    tag = "batches"
)]
pub async fn get_batch_sync(
    State(state): State<AppState>,
    meta: RequestMeta,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<SyncBatchView>, ApiError> {
    Ok(Json(state.batch_syncs.get_batch(&meta, batch_id).await?))
}
