//! Workflow triggering and run lifecycle.
//!
//! A run is inserted `pending`, submitted to Prefect, and moved to `running`
//! once Prefect returns a flow run id. Callbacks, cancellation and zombie
//! termination finalize it.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue, json};
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;

use super::node_tree;
use super::to_utc;
use crate::auth::RequestMeta;
use crate::clients::prefect::FlowRun;
use crate::clients::{NdrClient, SchedulerClient};
use crate::config::WorkflowConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::models::workflow_definition::{self, WORKFLOW_TYPE_DOCUMENT, WORKFLOW_TYPE_NODE};
use crate::models::workflow_run::{self, RunStatus};
use crate::repositories::workflow_run::{CallbackUpdate, NewWorkflowRun};
use crate::repositories::{Page, RunFilter, WorkflowDefinitionRepository, WorkflowRunRepository};

/// Runs still active this long after starting are considered zombies.
pub const ZOMBIE_TIMEOUT_MINUTES: i64 = 30;

/// Workflow keys with this prefix regenerate the node's output documents.
pub const GENERATE_NODE_DOCUMENTS_PREFIX: &str = "generate_node_documents";

/// Parameters the service always sets for node workflows.
const NODE_RESERVED_KEYS: [&str; 7] = [
    "run_id",
    "node_id",
    "workflow_key",
    "source_doc_ids",
    "callback_url",
    "pdms_base_url",
    "target_docs",
];

/// Parameters the service always sets for document workflows.
const DOCUMENT_RESERVED_KEYS: [&str; 5] = [
    "run_id",
    "document_id",
    "workflow_key",
    "callback_url",
    "pdms_base_url",
];

pub fn zombie_timeout() -> Duration {
    Duration::minutes(ZOMBIE_TIMEOUT_MINUTES)
}

/// Whether an active run has outlived the zombie timeout at `now`.
pub fn is_zombie(run: &workflow_run::Model, now: DateTime<Utc>) -> bool {
    run.status.is_active() && now - to_utc(run.activity_anchor()) > zombie_timeout()
}

/// Merge user parameters with the reserved system parameters. User values for
/// reserved keys are dropped.
pub fn build_flow_parameters(
    user: Map<String, JsonValue>,
    reserved_keys: &[&str],
    system: Map<String, JsonValue>,
) -> Map<String, JsonValue> {
    let mut parameters: Map<String, JsonValue> = user
        .into_iter()
        .filter(|(key, _)| {
            let reserved = reserved_keys.contains(&key.as_str());
            if reserved {
                debug!(key, "Dropping user parameter that shadows a reserved key");
            }
            !reserved
        })
        .collect();
    parameters.extend(system);
    parameters
}

/// Trigger a node workflow
#[derive(Debug, Clone, Default)]
pub struct TriggerWorkflowRequest {
    pub node_id: i64,
    pub workflow_key: String,
    pub parameters: Map<String, JsonValue>,
    /// Precomputed source documents; loaded from NDR when absent
    pub source_doc_ids: Option<Vec<i64>>,
    pub retry_of_id: Option<i64>,
}

/// Trigger a document workflow
#[derive(Debug, Clone, Default)]
pub struct TriggerDocumentWorkflowRequest {
    pub document_id: i64,
    pub workflow_key: String,
    pub parameters: Map<String, JsonValue>,
    pub retry_of_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TriggerWorkflowResponse {
    pub run_id: i64,
    pub status: RunStatus,
    pub prefect_flow_run_id: Option<String>,
}

/// Callback body sent by a flow
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct WorkflowCallback {
    pub status: String,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub result: Option<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CallbackOutcome {
    pub run_id: i64,
    pub status: RunStatus,
    /// `false` when the run was cancelled and the callback was absorbed
    pub applied: bool,
}

/// A run as exposed by the API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WorkflowRunView {
    pub id: i64,
    pub workflow_key: String,
    pub node_id: Option<i64>,
    pub document_id: Option<i64>,
    #[schema(value_type = Option<Object>)]
    pub parameters: Option<JsonValue>,
    pub status: RunStatus,
    pub prefect_flow_run_id: Option<String>,
    pub created_by_id: Option<i64>,
    pub retry_of_id: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub result: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Active and silent for longer than the zombie timeout
    pub is_zombie: bool,
}

impl WorkflowRunView {
    pub fn from_model(run: workflow_run::Model, now: DateTime<Utc>) -> Self {
        let is_zombie = is_zombie(&run, now);
        Self {
            id: run.id,
            workflow_key: run.workflow_key,
            node_id: run.node_id,
            document_id: run.document_id,
            parameters: run.parameters,
            status: run.status,
            prefect_flow_run_id: run.prefect_flow_run_id,
            created_by_id: run.created_by_id,
            retry_of_id: run.retry_of_id,
            started_at: run.started_at.map(to_utc),
            finished_at: run.finished_at.map(to_utc),
            error_message: run.error_message,
            result: run.result,
            created_at: to_utc(run.created_at),
            updated_at: to_utc(run.updated_at),
            is_zombie,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WorkflowRunList {
    pub items: Vec<WorkflowRunView>,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CleanupReport {
    /// Ids of runs forced to `failed`
    pub terminated: Vec<i64>,
    pub count: usize,
}

/// A workflow definition as exposed by the API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WorkflowDefinitionView {
    pub workflow_key: String,
    pub name: String,
    pub description: Option<String>,
    pub workflow_type: String,
    pub sync_status: String,
    pub enabled: bool,
    #[schema(value_type = Option<Object>)]
    pub parameter_schema: Option<JsonValue>,
    pub prefect_deployment_name: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl From<workflow_definition::Model> for WorkflowDefinitionView {
    fn from(model: workflow_definition::Model) -> Self {
        Self {
            workflow_key: model.workflow_key,
            name: model.name,
            description: model.description,
            workflow_type: model.workflow_type,
            sync_status: model.sync_status,
            enabled: model.enabled,
            parameter_schema: model.parameter_schema,
            prefect_deployment_name: model.prefect_deployment_name,
            last_synced_at: model.last_synced_at.map(to_utc),
        }
    }
}

/// How a flow run submission ended
#[derive(Debug, Clone)]
pub(crate) enum Dispatch {
    /// No scheduler configured; the run stays `pending`
    LocalOnly,
    Submitted(FlowRun),
}

/// Run target used when validating retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunTarget {
    Node(i64),
    Document(i64),
}

pub struct WorkflowService {
    definitions: WorkflowDefinitionRepository,
    runs: WorkflowRunRepository,
    ndr: Arc<dyn NdrClient>,
    scheduler: Option<Arc<dyn SchedulerClient>>,
    config: WorkflowConfig,
}

impl WorkflowService {
    pub fn new(
        definitions: WorkflowDefinitionRepository,
        runs: WorkflowRunRepository,
        ndr: Arc<dyn NdrClient>,
        scheduler: Option<Arc<dyn SchedulerClient>>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            definitions,
            runs,
            ndr,
            scheduler,
            config,
        }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub(crate) fn runs(&self) -> &WorkflowRunRepository {
        &self.runs
    }

    /// Load an enabled, active definition accepting `workflow_type` targets.
    pub async fn load_definition(
        &self,
        workflow_key: &str,
        workflow_type: &str,
    ) -> ServiceResult<workflow_definition::Model> {
        let definition = self
            .definitions
            .find_by_key(workflow_key)
            .await?
            .filter(|definition| definition.enabled)
            .ok_or_else(|| {
                ServiceError::not_found(format!("workflow {} not found or disabled", workflow_key))
            })?;

        if definition.is_stale() {
            return Err(ServiceError::validation(format!(
                "workflow {} is {} in the scheduler; run a deployment sync",
                workflow_key, definition.sync_status
            )));
        }

        if !definition.accepts_target(workflow_type) {
            return Err(ServiceError::validation(format!(
                "workflow {} is a {} workflow and cannot run on a {}",
                workflow_key, definition.workflow_type, workflow_type
            )));
        }

        Ok(definition)
    }

    async fn validate_retry(
        &self,
        retry_of_id: i64,
        workflow_key: &str,
        target: RunTarget,
    ) -> ServiceResult<()> {
        let original = self.runs.find_by_id(retry_of_id).await?.ok_or_else(|| {
            ServiceError::validation(format!("retry_of_id {} does not exist", retry_of_id))
        })?;

        if original.workflow_key != workflow_key {
            return Err(ServiceError::validation(format!(
                "run {} belongs to workflow {}, not {}",
                retry_of_id, original.workflow_key, workflow_key
            )));
        }

        let same_target = match target {
            RunTarget::Node(node_id) => original.node_id == Some(node_id),
            RunTarget::Document(document_id) => original.document_id == Some(document_id),
        };
        if !same_target {
            return Err(ServiceError::validation(format!(
                "run {} targets a different {}",
                retry_of_id,
                match target {
                    RunTarget::Node(_) => "node",
                    RunTarget::Document(_) => "document",
                }
            )));
        }

        Ok(())
    }

    /// Callback url handed to flows for a run.
    pub fn callback_url(&self, run_id: i64) -> String {
        format!(
            "{}/api/v1/workflows/callback/{}",
            self.config.callback_base_url.trim_end_matches('/'),
            run_id
        )
    }

    /// Trigger a workflow on a single node.
    #[instrument(
        skip(self, meta, request),
        fields(node_id = request.node_id, workflow_key = %request.workflow_key)
    )]
    pub async fn trigger_workflow(
        &self,
        meta: &RequestMeta,
        request: TriggerWorkflowRequest,
    ) -> ServiceResult<TriggerWorkflowResponse> {
        let definition = self
            .load_definition(&request.workflow_key, WORKFLOW_TYPE_NODE)
            .await?;

        if let Some(retry_of_id) = request.retry_of_id {
            self.validate_retry(
                retry_of_id,
                &request.workflow_key,
                RunTarget::Node(request.node_id),
            )
            .await?;
        }

        let source_doc_ids = match request.source_doc_ids {
            Some(ids) => ids,
            None => self
                .ndr
                .list_source_documents(meta, request.node_id)
                .await
                .map_err(ServiceError::ndr)?
                .into_iter()
                .map(|doc| doc.document_id)
                .collect(),
        };

        let target_docs = if request
            .workflow_key
            .starts_with(GENERATE_NODE_DOCUMENTS_PREFIX)
        {
            let outputs = node_tree::output_documents(
                self.ndr.as_ref(),
                meta,
                request.node_id,
                &source_doc_ids,
            )
            .await?;
            Some(
                outputs
                    .into_iter()
                    .map(|doc| json!({ "id": doc.id, "title": doc.title, "type": doc.doc_type }))
                    .collect::<Vec<_>>(),
            )
        } else {
            None
        };

        let run = self
            .runs
            .create(NewWorkflowRun {
                workflow_key: request.workflow_key.clone(),
                node_id: Some(request.node_id),
                document_id: None,
                parameters: Some(JsonValue::Object(request.parameters.clone())),
                created_by_id: meta.user_id,
                retry_of_id: request.retry_of_id,
            })
            .await?;
        counter!("workflow_runs_triggered_total", "workflow_key" => request.workflow_key.clone())
            .increment(1);

        let mut system = Map::new();
        system.insert("run_id".into(), json!(run.id));
        system.insert("node_id".into(), json!(request.node_id));
        system.insert("workflow_key".into(), json!(request.workflow_key));
        system.insert("source_doc_ids".into(), json!(source_doc_ids));
        system.insert("callback_url".into(), json!(self.callback_url(run.id)));
        system.insert("pdms_base_url".into(), json!(self.config.pdms_base_url));
        if let Some(target_docs) = target_docs {
            system.insert("target_docs".into(), JsonValue::Array(target_docs));
        }
        let parameters = build_flow_parameters(request.parameters, &NODE_RESERVED_KEYS, system);

        self.submit_run(run, &definition, parameters).await
    }

    /// Trigger a workflow on a single document.
    #[instrument(
        skip(self, meta, request),
        fields(document_id = request.document_id, workflow_key = %request.workflow_key)
    )]
    pub async fn trigger_document_workflow(
        &self,
        meta: &RequestMeta,
        request: TriggerDocumentWorkflowRequest,
    ) -> ServiceResult<TriggerWorkflowResponse> {
        let definition = self
            .load_definition(&request.workflow_key, WORKFLOW_TYPE_DOCUMENT)
            .await?;

        if let Some(retry_of_id) = request.retry_of_id {
            self.validate_retry(
                retry_of_id,
                &request.workflow_key,
                RunTarget::Document(request.document_id),
            )
            .await?;
        }

        let run = self
            .runs
            .create(NewWorkflowRun {
                workflow_key: request.workflow_key.clone(),
                node_id: None,
                document_id: Some(request.document_id),
                parameters: Some(JsonValue::Object(request.parameters.clone())),
                created_by_id: meta.user_id,
                retry_of_id: request.retry_of_id,
            })
            .await?;
        counter!("workflow_runs_triggered_total", "workflow_key" => request.workflow_key.clone())
            .increment(1);

        let mut system = Map::new();
        system.insert("run_id".into(), json!(run.id));
        system.insert("document_id".into(), json!(request.document_id));
        system.insert("workflow_key".into(), json!(request.workflow_key));
        system.insert("callback_url".into(), json!(self.callback_url(run.id)));
        system.insert("pdms_base_url".into(), json!(self.config.pdms_base_url));
        let parameters =
            build_flow_parameters(request.parameters, &DOCUMENT_RESERVED_KEYS, system);

        self.submit_run(run, &definition, parameters).await
    }

    /// Submit a freshly inserted run and record the outcome on it.
    async fn submit_run(
        &self,
        run: workflow_run::Model,
        definition: &workflow_definition::Model,
        parameters: Map<String, JsonValue>,
    ) -> ServiceResult<TriggerWorkflowResponse> {
        let deployment_name = self.deployment_name_for(Some(definition));

        match self
            .dispatch(&run.workflow_key, &deployment_name, parameters)
            .await
        {
            Ok(Dispatch::LocalOnly) => Ok(TriggerWorkflowResponse {
                run_id: run.id,
                status: RunStatus::Pending,
                prefect_flow_run_id: None,
            }),
            Ok(Dispatch::Submitted(flow_run)) => {
                let status = if self.runs.mark_running(run.id, &flow_run.id).await? {
                    RunStatus::Running
                } else {
                    // A callback got there first
                    self.runs
                        .find_by_id(run.id)
                        .await?
                        .map(|current| current.status)
                        .unwrap_or(RunStatus::Running)
                };
                info!(run_id = run.id, flow_run_id = %flow_run.id, "Workflow run submitted");
                Ok(TriggerWorkflowResponse {
                    run_id: run.id,
                    status,
                    prefect_flow_run_id: Some(flow_run.id),
                })
            }
            Err(err) => {
                self.runs.mark_failed(run.id, &err.to_string()).await?;
                counter!("workflow_submissions_failed_total").increment(1);
                Err(err)
            }
        }
    }

    /// Deployment used for a workflow: the definition's own, else the default.
    pub(crate) fn deployment_name_for(
        &self,
        definition: Option<&workflow_definition::Model>,
    ) -> String {
        definition
            .and_then(|definition| definition.prefect_deployment_name.clone())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.config.default_deployment.clone())
    }

    /// Resolve the deployment and create a flow run. Errors are already
    /// wrapped; the caller records them on its own rows.
    pub(crate) async fn dispatch(
        &self,
        workflow_key: &str,
        deployment_name: &str,
        parameters: Map<String, JsonValue>,
    ) -> ServiceResult<Dispatch> {
        let Some(scheduler) = &self.scheduler else {
            debug!(workflow_key, "No scheduler configured; leaving run pending");
            return Ok(Dispatch::LocalOnly);
        };

        let deployment = scheduler
            .get_deployment_by_name(workflow_key, deployment_name)
            .await
            .map_err(ServiceError::scheduler)?;

        let flow_run = scheduler
            .create_flow_run(&deployment.id, parameters)
            .await
            .map_err(ServiceError::scheduler)?;

        Ok(Dispatch::Submitted(flow_run))
    }

    /// Apply a flow callback to a run.
    #[instrument(skip(self, callback), fields(status = %callback.status))]
    pub async fn handle_callback(
        &self,
        run_id: i64,
        callback: WorkflowCallback,
    ) -> ServiceResult<CallbackOutcome> {
        let status = RunStatus::parse(&callback.status).ok_or_else(|| {
            ServiceError::validation(format!("invalid callback status {}", callback.status))
        })?;

        let run = self
            .runs
            .find_by_id(run_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("workflow run {} not found", run_id)))?;

        if run.status == RunStatus::Cancelled {
            info!(run_id, "Ignoring callback for cancelled run");
            return Ok(CallbackOutcome {
                run_id,
                status: RunStatus::Cancelled,
                applied: false,
            });
        }

        let strict = self.config.strict_callbacks;
        if strict && run.status.is_terminal() {
            return Err(ServiceError::validation(format!(
                "workflow run {} is already {}",
                run_id, run.status
            )));
        }

        let applied = self
            .runs
            .apply_callback(
                run_id,
                CallbackUpdate {
                    status,
                    error_message: callback.error_message,
                    result: callback.result,
                },
                strict,
            )
            .await?;

        if !applied {
            let current = self.runs.find_by_id(run_id).await?.ok_or_else(|| {
                ServiceError::not_found(format!("workflow run {} not found", run_id))
            })?;
            if current.status == RunStatus::Cancelled {
                return Ok(CallbackOutcome {
                    run_id,
                    status: RunStatus::Cancelled,
                    applied: false,
                });
            }
            return Err(ServiceError::validation(format!(
                "workflow run {} is already {}",
                run_id, current.status
            )));
        }

        if run.status.is_terminal() && run.status != status {
            warn!(
                run_id,
                previous = %run.status,
                new = %status,
                "Callback overrode a terminal run status"
            );
        }
        counter!("workflow_callbacks_total", "status" => status.as_str()).increment(1);

        Ok(CallbackOutcome {
            run_id,
            status,
            applied: true,
        })
    }

    /// Cancel a pending or running run and ask Prefect to stop it.
    #[instrument(skip(self, meta))]
    pub async fn cancel_workflow_run(
        &self,
        meta: &RequestMeta,
        run_id: i64,
    ) -> ServiceResult<WorkflowRunView> {
        self.get_owned_model(meta, run_id).await?;

        if !self.runs.cancel(run_id).await? {
            let current = self.runs.find_by_id(run_id).await?.ok_or_else(|| {
                ServiceError::not_found(format!("workflow run {} not found", run_id))
            })?;
            return Err(ServiceError::validation(format!(
                "cannot cancel workflow run in status {}",
                current.status
            )));
        }

        let run = self.get_model(run_id).await?;
        self.cancel_remote(&run).await;
        info!(run_id, "Workflow run cancelled");

        Ok(WorkflowRunView::from_model(run, Utc::now()))
    }

    /// Force a zombie run to `failed`.
    #[instrument(skip(self, meta))]
    pub async fn force_terminate_workflow_run(
        &self,
        meta: &RequestMeta,
        run_id: i64,
    ) -> ServiceResult<WorkflowRunView> {
        let run = self.get_owned_model(meta, run_id).await?;

        if !run.status.is_active() {
            return Err(ServiceError::validation(format!(
                "cannot terminate workflow run in status {}",
                run.status
            )));
        }

        let now = Utc::now();
        if !is_zombie(&run, now) {
            let elapsed = (now - to_utc(run.activity_anchor())).num_minutes();
            return Err(ServiceError::validation(format!(
                "workflow run {} has been active for {} minutes; termination is allowed after {} minutes",
                run_id, elapsed, ZOMBIE_TIMEOUT_MINUTES
            )));
        }

        if !self.runs.mark_failed(run_id, &zombie_message()).await? {
            let current = self.get_model(run_id).await?;
            return Err(ServiceError::validation(format!(
                "cannot terminate workflow run in status {}",
                current.status
            )));
        }

        self.cancel_remote(&run).await;
        counter!("workflow_runs_terminated_total").increment(1);
        warn!(run_id, "Zombie workflow run terminated");

        let run = self.get_model(run_id).await?;
        Ok(WorkflowRunView::from_model(run, Utc::now()))
    }

    /// Terminate every zombie run.
    #[instrument(skip(self))]
    pub async fn cleanup_zombie_runs(&self) -> ServiceResult<CleanupReport> {
        let now = Utc::now();
        let message = zombie_message();
        let mut terminated = Vec::new();

        for run in self.runs.list_active().await? {
            if !is_zombie(&run, now) {
                continue;
            }
            if self.runs.mark_failed(run.id, &message).await? {
                self.cancel_remote(&run).await;
                terminated.push(run.id);
            }
        }

        if !terminated.is_empty() {
            counter!("workflow_runs_terminated_total").increment(terminated.len() as u64);
            info!(count = terminated.len(), "Cleaned up zombie workflow runs");
        }

        Ok(CleanupReport {
            count: terminated.len(),
            terminated,
        })
    }

    async fn cancel_remote(&self, run: &workflow_run::Model) {
        let (Some(scheduler), Some(flow_run_id)) = (&self.scheduler, &run.prefect_flow_run_id)
        else {
            return;
        };
        if let Err(err) = scheduler.cancel_flow_run(flow_run_id).await {
            warn!(run_id = run.id, flow_run_id, error = %err, "Failed to cancel Prefect flow run");
        }
    }

    async fn get_model(&self, run_id: i64) -> ServiceResult<workflow_run::Model> {
        self.runs
            .find_by_id(run_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("workflow run {} not found", run_id)))
    }

    /// Runs are visible to their creator and to super admins.
    async fn get_owned_model(
        &self,
        meta: &RequestMeta,
        run_id: i64,
    ) -> ServiceResult<workflow_run::Model> {
        let run = self.get_model(run_id).await?;
        if !meta.can_view_owned_by(run.created_by_id) {
            return Err(ServiceError::Forbidden(format!(
                "workflow run {} belongs to another user",
                run_id
            )));
        }
        Ok(run)
    }

    pub async fn get_workflow_run(
        &self,
        meta: &RequestMeta,
        run_id: i64,
    ) -> ServiceResult<WorkflowRunView> {
        let run = self.get_owned_model(meta, run_id).await?;
        Ok(WorkflowRunView::from_model(run, Utc::now()))
    }

    /// List runs. Callers other than super admins only see their own runs.
    pub async fn list_workflow_runs(
        &self,
        meta: &RequestMeta,
        mut filter: RunFilter,
        page: Page,
    ) -> ServiceResult<WorkflowRunList> {
        if !meta.is_super_admin() {
            filter.created_by_id = meta.user_id.or(Some(-1));
        }

        let (runs, total) = self.runs.list(&filter, page).await?;
        let now = Utc::now();
        Ok(WorkflowRunList {
            items: runs
                .into_iter()
                .map(|run| WorkflowRunView::from_model(run, now))
                .collect(),
            total,
        })
    }

    pub async fn list_definitions(
        &self,
        include_disabled: bool,
    ) -> ServiceResult<Vec<WorkflowDefinitionView>> {
        Ok(self
            .definitions
            .list(include_disabled)
            .await?
            .into_iter()
            .map(WorkflowDefinitionView::from)
            .collect())
    }

    pub async fn set_definition_enabled(
        &self,
        workflow_key: &str,
        enabled: bool,
    ) -> ServiceResult<WorkflowDefinitionView> {
        let definition = self
            .definitions
            .set_enabled(workflow_key, enabled)
            .await?
            .ok_or_else(|| {
                ServiceError::not_found(format!("workflow {} not found", workflow_key))
            })?;
        info!(workflow_key, enabled, "Workflow definition toggled");
        Ok(definition.into())
    }

    /// Definition lookup that tolerates a missing row.
    pub(crate) async fn find_definition(
        &self,
        workflow_key: &str,
    ) -> ServiceResult<Option<workflow_definition::Model>> {
        Ok(self.definitions.find_by_key(workflow_key).await?)
    }
}

fn zombie_message() -> String {
    format!(
        "terminated: no callback received within {} minutes",
        ZOMBIE_TIMEOUT_MINUTES
    )
}
