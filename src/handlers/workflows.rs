//! # Workflow API Handlers
//!
//! Triggering, listing and managing workflow runs and definitions, plus the
//! scheduler callback.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::auth::{CallerHeaders, RequestMeta, ensure_can_edit, ensure_super_admin};
use crate::error::{ApiError, validation_error};
use crate::handlers::{PageQuery, TriggerRunBody};
use crate::models::workflow_run::RunStatus;
use crate::repositories::RunFilter;
use crate::server::AppState;
use crate::services::deployment_sync::{DeploymentSyncReport, DeploymentSyncStatus};
use crate::services::workflow::{
    CallbackOutcome, CleanupReport, TriggerDocumentWorkflowRequest, TriggerWorkflowRequest,
    TriggerWorkflowResponse, WorkflowCallback, WorkflowDefinitionView, WorkflowRunList,
    WorkflowRunView,
};

/// Query parameters for listing workflow definitions
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListDefinitionsQuery {
    /// Include disabled definitions
    #[serde(default)]
    pub include_disabled: bool,
}

/// Query parameters for listing workflow runs
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListRunsQuery {
    pub workflow_key: Option<String>,
    pub node_id: Option<i64>,
    pub document_id: Option<i64>,
    /// One of pending, running, success, failed, cancelled
    pub status: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Trigger a workflow on a node
#[utoipa::path(
    post,
    path = "/api/v1/nodes/{id}/workflows/{key}/runs",
    security(("bearer_auth" = [])),
    params(
        ("id" = i64, Path, description = "Node id"),
        ("key" = String, Path, description = "Workflow key"),
        CallerHeaders
    ),
    request_body = TriggerRunBody,
    responses(
        (status = 201, description = "Run created", body = TriggerWorkflowResponse),
        (status = 400, description = "Definition stale, wrong type or invalid retry", body = ApiError),
        (status = 403, description = "Caller may not run workflows", body = ApiError),
        (status = 404, description = "Workflow or node not found", body = ApiError),
        (status = 502, description = "Scheduler submission failed", body = ApiError)
    ),
    tag = "workflows"
)]
pub async fn trigger_node_workflow(
    State(state): State<AppState>,
    meta: RequestMeta,
    Path((node_id, workflow_key)): Path<(i64, String)>,
    Json(body): Json<TriggerRunBody>,
) -> Result<(StatusCode, Json<TriggerWorkflowResponse>), ApiError> {
    ensure_can_edit(&meta)?;

    let response = state
        .workflows
        .trigger_workflow(
            &meta,
            TriggerWorkflowRequest {
                node_id,
                workflow_key,
                parameters: body.parameters,
                source_doc_ids: None,
                retry_of_id: body.retry_of_id,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(response)))
}

/// Trigger a workflow on a document
#[utoipa::path(
    post,
    path = "/api/v1/documents/{id}/workflows/{key}/runs",
    security(("bearer_auth" = [])),
    params(
        ("id" = i64, Path, description = "Document id"),
        ("key" = String, Path, description = "Workflow key"),
        CallerHeaders
    ),
    request_body = TriggerRunBody,
    responses(
        (status = 201, description = "Run created", body = TriggerWorkflowResponse),
        (status = 400, description = "Definition stale, wrong type or invalid retry", body = ApiError),
        (status = 403, description = "Caller may not run workflows", body = ApiError),
        (status = 404, description = "Workflow not found", body = ApiError),
        (status = 502, description = "Scheduler submission failed", body = ApiError)
    ),
    tag = "workflows"
)]
pub async fn trigger_document_workflow(
    State(state): State<AppState>,
    meta: RequestMeta,
    Path((document_id, workflow_key)): Path<(i64, String)>,
    Json(body): Json<TriggerRunBody>,
) -> Result<(StatusCode, Json<TriggerWorkflowResponse>), ApiError> {
    ensure_can_edit(&meta)?;

    let response = state
        .workflows
        .trigger_document_workflow(
            &meta,
            TriggerDocumentWorkflowRequest {
                document_id,
                workflow_key,
                parameters: body.parameters,
                retry_of_id: body.retry_of_id,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(response)))
}

/// List workflow definitions
#[utoipa::path(
    get,
    path = "/api/v1/workflows",
    security(("bearer_auth" = [])),
    params(ListDefinitionsQuery),
    responses(
        (status = 200, description = "Workflow definitions", body = [WorkflowDefinitionView])
    ),
    tag = "workflows"
)]
pub async fn list_definitions(
    State(state): State<AppState>,
    Query(query): Query<ListDefinitionsQuery>,
) -> Result<Json<Vec<WorkflowDefinitionView>>, ApiError> {
    Ok(Json(
        state
            .workflows
            .list_definitions(query.include_disabled)
            .await?,
    ))
}

/// Enable a workflow definition
#[utoipa::path(
    post,
    path = "/api/v1/workflows/{key}/enable",
    security(("bearer_auth" = [])),
    params(("key" = String, Path, description = "Workflow key"), CallerHeaders),
    responses(
        (status = 200, description = "Definition enabled", body = WorkflowDefinitionView),
        (status = 403, description = "Requires super_admin", body = ApiError),
        (status = 404, description = "Workflow not found", body = ApiError)
    ),
    tag = "workflows"
)]
pub async fn enable_definition(
    State(state): State<AppState>,
    meta: RequestMeta,
    Path(workflow_key): Path<String>,
) -> Result<Json<WorkflowDefinitionView>, ApiError> {
    ensure_super_admin(&meta)?;
    Ok(Json(
        state
            .workflows
            .set_definition_enabled(&workflow_key, true)
            .await?,
    ))
}

/// Disable a workflow definition
#[utoipa::path(
    post,
    path = "/api/v1/workflows/{key}/disable",
    security(("bearer_auth" = [])),
    params(("key" = String, Path, description = "Workflow key"), CallerHeaders),
    responses(
        (status = 200, description = "Definition disabled", body = WorkflowDefinitionView),
        (status = 403, description = "Requires super_admin", body = ApiError),
        (status = 404, description = "Workflow not found", body = ApiError)
    ),
    tag = "workflows"
)]
pub async fn disable_definition(
    State(state): State<AppState>,
    meta: RequestMeta,
    Path(workflow_key): Path<String>,
) -> Result<Json<WorkflowDefinitionView>, ApiError> {
    ensure_super_admin(&meta)?;
    Ok(Json(
        state
            .workflows
            .set_definition_enabled(&workflow_key, false)
            .await?,
    ))
}

/// Refresh workflow definitions from scheduler deployments
#[utoipa::path(
    post,
    path = "/api/v1/workflows/sync",
    security(("bearer_auth" = [])),
    params(CallerHeaders),
    responses(
        (status = 200, description = "Deployments synced", body = DeploymentSyncReport),
        (status = 400, description = "No scheduler configured or a sync is already running", body = ApiError),
        (status = 403, description = "Requires super_admin", body = ApiError),
        (status = 502, description = "Scheduler unavailable", body = ApiError)
    ),
    tag = "workflows"
)]
pub async fn sync_deployments(
    State(state): State<AppState>,
    meta: RequestMeta,
) -> Result<Json<DeploymentSyncReport>, ApiError> {
    ensure_super_admin(&meta)?;
    Ok(Json(state.deployment_sync.sync_deployments().await?))
}

/// Status of the last deployment sync
#[utoipa::path(
    get,
    path = "/api/v1/workflows/sync/status",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Deployment sync status", body = DeploymentSyncStatus)
    ),
    tag = "workflows"
)]
pub async fn deployment_sync_status(State(state): State<AppState>) -> Json<DeploymentSyncStatus> {
    Json(state.deployment_sync.status().await)
}

/// List workflow runs
#[utoipa::path(
    get,
    path = "/api/v1/workflows/runs",
    security(("bearer_auth" = [])),
    params(ListRunsQuery, CallerHeaders),
    responses(
        (status = 200, description = "Runs visible to the caller", body = WorkflowRunList),
        (status = 400, description = "Invalid status filter", body = ApiError)
    ),
    tag = "workflows"
)]
pub async fn list_runs(
    State(state): State<AppState>,
    meta: RequestMeta,
    Query(query): Query<ListRunsQuery>,
) -> Result<Json<WorkflowRunList>, ApiError> {
    let status = match query.status.as_deref() {
        Some(value) => Some(RunStatus::parse(value).ok_or_else(|| {
            validation_error(
                "Invalid status filter",
                serde_json::json!({
                    "status": "Must be one of pending, running, success, failed, cancelled"
                }),
            )
        })?),
        None => None,
    };

    let filter = RunFilter {
        workflow_key: query.workflow_key,
        node_id: query.node_id,
        document_id: query.document_id,
        status,
        created_by_id: None,
    };
    let page = PageQuery {
        limit: query.limit,
        offset: query.offset,
    }
    .page();

    Ok(Json(
        state.workflows.list_workflow_runs(&meta, filter, page).await?,
    ))
}

/// Get a workflow run
#[utoipa::path(
    get,
    path = "/api/v1/workflows/runs/{id}",
    security(("bearer_auth" = [])),
    params(("id" = i64, Path, description = "Run id"), CallerHeaders),
    responses(
        (status = 200, description = "Workflow run", body = WorkflowRunView),
        (status = 403, description = "Run belongs to another user", body = ApiError),
        (status = 404, description = "Run not found", body = ApiError)
    ),
    tag = "workflows"
)]
pub async fn get_run(
    State(state): State<AppState>,
    meta: RequestMeta,
    Path(run_id): Path<i64>,
) -> Result<Json<WorkflowRunView>, ApiError> {
    Ok(Json(state.workflows.get_workflow_run(&meta, run_id).await?))
}

/// Cancel a pending or running workflow run
#[utoipa::path(
    post,
    path = "/api/v1/workflows/runs/{id}/cancel",
    security(("bearer_auth" = [])),
    params(("id" = i64, Path, description = "Run id"), CallerHeaders),
    responses(
        (status = 200, description = "Run cancelled", body = WorkflowRunView),
        (status = 400, description = "Run already finished", body = ApiError),
        (status = 404, description = "Run not found", body = ApiError)
    ),
    tag = "workflows"
)]
pub async fn cancel_run(
    State(state): State<AppState>,
    meta: RequestMeta,
    Path(run_id): Path<i64>,
) -> Result<Json<WorkflowRunView>, ApiError> {
    ensure_can_edit(&meta)?;
    Ok(Json(state.workflows.cancel_workflow_run(&meta, run_id).await?))
}

/// Force a zombie run to failed
#[utoipa::path(
    post,
    path = "/api/v1/workflows/runs/{id}/terminate",
    security(("bearer_auth" = [])),
    params(("id" = i64, Path, description = "Run id"), CallerHeaders),
    responses(
        (status = 200, description = "Run terminated", body = WorkflowRunView),
        (status = 400, description = "Run is not a zombie", body = ApiError),
        (status = 404, description = "Run not found", body = ApiError)
    ),
    tag = "workflows"
)]
pub async fn terminate_run(
    State(state): State<AppState>,
    meta: RequestMeta,
    Path(run_id): Path<i64>,
) -> Result<Json<WorkflowRunView>, ApiError> {
    ensure_can_edit(&meta)?;
    Ok(Json(
        state
            .workflows
            .force_terminate_workflow_run(&meta, run_id)
            .await?,
    ))
}

/// Terminate every zombie run
#[utoipa::path(
    post,
    path = "/api/v1/workflows/runs/cleanup",
    security(("bearer_auth" = [])),
    params(CallerHeaders),
    responses(
        (status = 200, description = "Zombie runs terminated", body = CleanupReport),
        (status = 403, description = "Requires super_admin", body = ApiError)
    ),
    tag = "workflows"
)]
pub async fn cleanup_zombies(
    State(state): State<AppState>,
    meta: RequestMeta,
) -> Result<Json<CleanupReport>, ApiError> {
    ensure_super_admin(&meta)?;
    Ok(Json(state.workflows.cleanup_zombie_runs().await?))
}

/// Scheduler callback for a workflow run
#[utoipa::path(
    post,
    path = "/api/v1/workflows/callback/{run_id}",
    params(
        ("run_id" = i64, Path, description = "Run id"),
        ("X-Webhook-Secret" = Option<String>, Header, description = "Shared callback secret")
    ),
    request_body = WorkflowCallback,
    responses(
        (status = 200, description = "Callback processed", body = CallbackOutcome),
        (status = 400, description = "Invalid status", body = ApiError),
        (status = 401, description = "Invalid webhook secret", body = ApiError),
        (status = 404, description = "Run not found", body = ApiError)
    ),
    tag = "callbacks"
)]
pub async fn workflow_callback(
    State(state): State<AppState>,
    Path(run_id): Path<i64>,
    Json(callback): Json<WorkflowCallback>,
) -> Result<Json<CallbackOutcome>, ApiError> {
    Ok(Json(state.workflows.handle_callback(run_id, callback).await?))
}
