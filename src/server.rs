//! # Server Configuration
//!
//! Application state, router assembly and the OpenAPI document for the YDMS API.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::{auth_middleware, webhook_secret_middleware};
use crate::clients::{HttpNdrClient, HttpPrefectClient, NdrClient, SchedulerClient};
use crate::config::AppConfig;
use crate::handlers::{self, batches, categories, documents, sync, workflows};
use crate::repositories::{
    DocSyncStatusRepository, SyncBatchRepository, WorkflowBatchRepository,
    WorkflowDefinitionRepository, WorkflowRunRepository,
};
use crate::services::{
    BatchQueue, BatchSyncService, BatchWorkflowService, CategoryService, DeploymentSyncService,
    DeploymentSyncState, DocumentService, SyncService, WorkflowService,
};
use crate::telemetry::trace_context_middleware;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub workflows: Arc<WorkflowService>,
    pub sync: Arc<SyncService>,
    pub batch_workflows: BatchWorkflowService,
    pub batch_syncs: BatchSyncService,
    pub deployment_sync: Arc<DeploymentSyncService>,
    pub categories: Arc<CategoryService>,
    pub documents: Arc<DocumentService>,
    pub batch_queue: BatchQueue,
}

impl AppState {
    /// Wire services over the given store and scheduler clients.
    pub fn new(
        config: Arc<AppConfig>,
        db: DatabaseConnection,
        ndr: Arc<dyn NdrClient>,
        scheduler: Option<Arc<dyn SchedulerClient>>,
    ) -> Self {
        let batch_queue = BatchQueue::new();

        let workflows = Arc::new(WorkflowService::new(
            WorkflowDefinitionRepository::new(db.clone()),
            WorkflowRunRepository::new(db.clone()),
            Arc::clone(&ndr),
            scheduler.clone(),
            config.workflow.clone(),
        ));
        let sync = Arc::new(SyncService::new(
            Arc::clone(&ndr),
            DocSyncStatusRepository::new(db.clone()),
            Arc::clone(&workflows),
        ));
        let batch_workflows = BatchWorkflowService::new(
            Arc::clone(&workflows),
            Arc::clone(&ndr),
            WorkflowBatchRepository::new(db.clone()),
            batch_queue.clone(),
            config.batch.clone(),
        );
        let batch_syncs = BatchSyncService::new(
            Arc::clone(&sync),
            Arc::clone(&ndr),
            SyncBatchRepository::new(db.clone()),
            batch_queue.clone(),
            config.batch.clone(),
        );
        let deployment_sync = Arc::new(DeploymentSyncService::new(
            WorkflowDefinitionRepository::new(db.clone()),
            scheduler,
            Arc::new(DeploymentSyncState::new()),
            config.workflow.default_deployment.clone(),
        ));

        Self {
            categories: Arc::new(CategoryService::new(Arc::clone(&ndr))),
            documents: Arc::new(DocumentService::new(ndr)),
            config,
            db,
            workflows,
            sync,
            batch_workflows,
            batch_syncs,
            deployment_sync,
            batch_queue,
        }
    }

    /// Build state with HTTP clients derived from configuration.
    pub fn from_config(config: Arc<AppConfig>, db: DatabaseConnection) -> anyhow::Result<Self> {
        let ndr = HttpNdrClient::new(
            &config.ndr.base_url,
            config.ndr.api_key.clone(),
            Duration::from_secs(config.ndr.timeout_seconds),
        )
        .context("failed to build NDR client")?;

        let scheduler: Option<Arc<dyn SchedulerClient>> = match &config.prefect.base_url {
            Some(base_url) => Some(Arc::new(
                HttpPrefectClient::new(
                    base_url,
                    Duration::from_secs(config.prefect.timeout_seconds),
                )
                .context("failed to build Prefect client")?,
            )),
            None => {
                info!("No Prefect URL configured; workflow runs stay local");
                None
            }
        };

        Ok(Self::new(config, db, Arc::new(ndr), scheduler))
    }
}

fn api_routes() -> Router<AppState> {
    Router::new()
        // Workflows
        .route("/workflows", get(workflows::list_definitions))
        .route("/workflows/sync", post(workflows::sync_deployments))
        .route(
            "/workflows/sync/status",
            get(workflows::deployment_sync_status),
        )
        .route("/workflows/runs", get(workflows::list_runs))
        .route("/workflows/runs/cleanup", post(workflows::cleanup_zombies))
        .route("/workflows/runs/{id}", get(workflows::get_run))
        .route("/workflows/runs/{id}/cancel", post(workflows::cancel_run))
        .route(
            "/workflows/runs/{id}/terminate",
            post(workflows::terminate_run),
        )
        .route("/workflows/{key}/enable", post(workflows::enable_definition))
        .route(
            "/workflows/{key}/disable",
            post(workflows::disable_definition),
        )
        .route(
            "/nodes/{id}/workflows/{key}/runs",
            post(workflows::trigger_node_workflow),
        )
        .route(
            "/documents/{id}/workflows/{key}/runs",
            post(workflows::trigger_document_workflow),
        )
        // Batches
        .route(
            "/nodes/{id}/batch-workflows/preview",
            post(batches::preview_batch_workflow),
        )
        .route(
            "/nodes/{id}/batch-workflows/execute",
            post(batches::execute_batch_workflow),
        )
        .route("/batch-workflows", get(batches::list_batch_workflows))
        .route(
            "/batch-workflows/{batch_id}",
            get(batches::get_batch_workflow),
        )
        .route(
            "/nodes/{id}/batch-sync/preview",
            post(batches::preview_batch_sync),
        )
        .route(
            "/nodes/{id}/batch-sync/execute",
            post(batches::execute_batch_sync),
        )
        .route("/batch-sync", get(batches::list_batch_syncs))
        .route("/batch-sync/{batch_id}", get(batches::get_batch_sync))
        // Sync
        .route(
            "/documents/{id}/sync",
            post(sync::trigger_sync).get(sync::get_sync_status),
        )
        // Categories
        .route("/categories", post(categories::create_category))
        .route("/categories/tree", get(categories::category_tree))
        .route("/categories/trash", get(categories::category_trash))
        .route("/categories/{id}", delete(categories::delete_category))
        .route(
            "/categories/{id}/restore",
            post(categories::restore_category),
        )
        // Documents
        .route("/documents/{id}/versions", get(documents::list_versions))
        .route(
            "/documents/{id}/versions/{version}",
            get(documents::get_version),
        )
        .route(
            "/documents/{id}/references",
            post(documents::add_reference),
        )
        .route(
            "/documents/{id}/references/{ref_id}",
            delete(documents::remove_reference),
        )
}

fn callback_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/workflows/callback/{run_id}",
            post(workflows::workflow_callback),
        )
        .route("/api/v1/sync/callback", post(sync::sync_callback))
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let api = api_routes().layer(middleware::from_fn_with_state(
        state.clone(),
        auth_middleware,
    ));
    let callbacks = callback_routes().layer(middleware::from_fn_with_state(
        state.clone(),
        webhook_secret_middleware,
    ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .nest("/api/v1", api)
        .merge(callbacks)
        .layer(middleware::from_fn(trace_context_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
}

/// Starts the server and serves until `shutdown` fires, then drains running batches.
pub async fn run_server(
    config: Arc<AppConfig>,
    db: DatabaseConnection,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let state = AppState::from_config(Arc::clone(&config), db)?;
    let batch_queue = state.batch_queue.clone();
    let app = create_app(state);

    let addr = config
        .bind_addr()
        .with_context(|| format!("invalid server address {}", config.api_bind_addr))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, profile = %config.profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!(
        in_flight = batch_queue.in_flight(),
        "HTTP server stopped; draining batch queue"
    );
    batch_queue.shutdown().await;
    info!("Shutdown complete");

    Ok(())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::readyz,
        crate::handlers::workflows::trigger_node_workflow,
        crate::handlers::workflows::trigger_document_workflow,
        crate::handlers::workflows::list_definitions,
        crate::handlers::workflows::enable_definition,
        crate::handlers::workflows::disable_definition,
        crate::handlers::workflows::sync_deployments,
        crate::handlers::workflows::deployment_sync_status,
        crate::handlers::workflows::list_runs,
        crate::handlers::workflows::get_run,
        crate::handlers::workflows::cancel_run,
        crate::handlers::workflows::terminate_run,
        crate::handlers::workflows::cleanup_zombies,
        crate::handlers::workflows::workflow_callback,
        crate::handlers::batches::preview_batch_workflow,
        crate::handlers::batches::execute_batch_workflow,
        crate::handlers::batches::list_batch_workflows,
        crate::handlers::batches::get_batch_workflow,
        crate::handlers::batches::preview_batch_sync,
        crate::handlers::batches::execute_batch_sync,
        crate::handlers::batches::list_batch_syncs,
        crate::handlers::batches::get_batch_sync,
        crate::handlers::sync::trigger_sync,
        crate::handlers::sync::get_sync_status,
        crate::handlers::sync::sync_callback,
        crate::handlers::categories::category_tree,
        crate::handlers::categories::create_category,
        crate::handlers::categories::delete_category,
        crate::handlers::categories::category_trash,
        crate::handlers::categories::restore_category,
        crate::handlers::documents::list_versions,
        crate::handlers::documents::get_version,
        crate::handlers::documents::add_reference,
        crate::handlers::documents::remove_reference,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::error::ApiError,
            crate::handlers::StatusResponse,
            crate::handlers::TriggerRunBody,
            crate::handlers::sync::SyncCallbackResponse,
            crate::auth::UserRole,
            crate::models::workflow_run::RunStatus,
            crate::models::workflow_batch::BatchStatus,
            crate::models::doc_sync_status::SyncState,
            crate::clients::ndr::Node,
            crate::clients::ndr::Document,
            crate::clients::ndr::DocumentVersion,
            crate::services::task_queue::ItemStatus,
            crate::services::node_tree::SkipPolicy,
            crate::services::workflow::TriggerWorkflowResponse,
            crate::services::workflow::WorkflowCallback,
            crate::services::workflow::CallbackOutcome,
            crate::services::workflow::WorkflowRunView,
            crate::services::workflow::WorkflowRunList,
            crate::services::workflow::CleanupReport,
            crate::services::workflow::WorkflowDefinitionView,
            crate::services::deployment_sync::DeploymentSyncReport,
            crate::services::deployment_sync::DeploymentSyncStatus,
            crate::services::batch_workflow::BatchWorkflowRequest,
            crate::services::batch_workflow::BatchWorkflowPreview,
            crate::services::batch_workflow::NodePreview,
            crate::services::batch_workflow::BatchExecuteResponse,
            crate::services::batch_workflow::NodeResult,
            crate::services::batch_workflow::WorkflowBatchView,
            crate::services::batch_workflow::WorkflowBatchList,
            crate::services::batch_sync::BatchSyncRequest,
            crate::services::batch_sync::BatchSyncPreview,
            crate::services::batch_sync::DocumentPreview,
            crate::services::batch_sync::BatchSyncExecuteResponse,
            crate::services::batch_sync::DocumentResult,
            crate::services::batch_sync::SyncBatchView,
            crate::services::batch_sync::SyncBatchList,
            crate::services::sync::SyncTriggerResponse,
            crate::services::sync::SyncCallback,
            crate::services::sync::SyncStatusView,
            crate::services::categories::CategoryTreeNode,
            crate::services::categories::CreateCategoryRequest,
            crate::services::documents::DocumentReference,
            crate::services::documents::AddReferenceRequest,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "root", description = "Service info and probes"),
        (name = "workflows", description = "Workflow definitions and runs"),
        (name = "batches", description = "Batch workflows and batch syncs"),
        (name = "sync", description = "Document sync to external targets"),
        (name = "categories", description = "Category tree"),
        (name = "documents", description = "Document versions and references"),
        (name = "callbacks", description = "Scheduler callbacks"),
    ),
    info(
        title = "YDMS API",
        description = "Workflow and sync orchestration over the NDR document store",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
