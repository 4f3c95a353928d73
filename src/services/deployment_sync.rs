//! Workflow definition sync from Prefect deployments.
//!
//! Only one sync runs at a time; a second request while one is in flight is
//! rejected rather than queued.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use crate::clients::SchedulerClient;
use crate::clients::prefect::{Deployment, workflow_key_for};
use crate::error::{ServiceError, ServiceResult};
use crate::models::workflow_definition::{WORKFLOW_TYPE_DOCUMENT, WORKFLOW_TYPE_NODE};
use crate::repositories::WorkflowDefinitionRepository;
use crate::repositories::workflow_definition::{DefinitionUpsert, UpsertOutcome};

/// Result of one deployment sync
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DeploymentSyncReport {
    pub created: usize,
    pub updated: usize,
    /// Previously synced definitions no longer backed by a deployment
    pub missing: u64,
    pub workflow_keys: Vec<String>,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DeploymentSyncStatus {
    pub in_progress: bool,
    pub last_report: Option<DeploymentSyncReport>,
    pub last_error: Option<String>,
}

/// Owned sync state: the in-progress flag and the outcome of the last sync
#[derive(Debug, Default)]
pub struct DeploymentSyncState {
    running: AtomicBool,
    last: RwLock<(Option<DeploymentSyncReport>, Option<String>)>,
}

/// Clears the in-progress flag when dropped.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl DeploymentSyncState {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_begin(&self) -> Option<RunningGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunningGuard(&self.running))
    }

    pub fn in_progress(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub async fn snapshot(&self) -> DeploymentSyncStatus {
        let last = self.last.read().await;
        DeploymentSyncStatus {
            in_progress: self.in_progress(),
            last_report: last.0.clone(),
            last_error: last.1.clone(),
        }
    }

    async fn record(&self, outcome: &ServiceResult<DeploymentSyncReport>) {
        let mut last = self.last.write().await;
        match outcome {
            Ok(report) => *last = (Some(report.clone()), None),
            Err(err) => last.1 = Some(err.to_string()),
        }
    }
}

/// Workflow type declared by deployment tags (`type:node`, `node`, ...).
pub fn workflow_type_from_tags(tags: &[String]) -> String {
    for tag in tags {
        let value = tag.strip_prefix("type:").unwrap_or(tag);
        if value == WORKFLOW_TYPE_NODE || value == WORKFLOW_TYPE_DOCUMENT {
            return value.to_string();
        }
    }
    String::new()
}

pub struct DeploymentSyncService {
    definitions: WorkflowDefinitionRepository,
    scheduler: Option<Arc<dyn SchedulerClient>>,
    state: Arc<DeploymentSyncState>,
    default_deployment: String,
}

impl DeploymentSyncService {
    pub fn new(
        definitions: WorkflowDefinitionRepository,
        scheduler: Option<Arc<dyn SchedulerClient>>,
        state: Arc<DeploymentSyncState>,
        default_deployment: String,
    ) -> Self {
        Self {
            definitions,
            scheduler,
            state,
            default_deployment,
        }
    }

    /// Pick one deployment per workflow key, preferring the default deployment name.
    fn select_deployments(&self, deployments: Vec<Deployment>) -> BTreeMap<String, Deployment> {
        let mut selected: BTreeMap<String, Deployment> = BTreeMap::new();
        for deployment in deployments {
            if deployment.flow_name.is_empty() {
                warn!(deployment = %deployment.name, "Skipping deployment without a flow");
                continue;
            }
            let key = workflow_key_for(&deployment.flow_name);
            let replace = match selected.get(&key) {
                None => true,
                Some(current) => {
                    current.name != self.default_deployment
                        && deployment.name == self.default_deployment
                }
            };
            if replace {
                selected.insert(key, deployment);
            }
        }
        selected
    }

    /// Refresh definitions from the scheduler's deployments.
    #[instrument(skip(self))]
    pub async fn sync_deployments(&self) -> ServiceResult<DeploymentSyncReport> {
        let scheduler = self
            .scheduler
            .as_ref()
            .ok_or_else(|| ServiceError::validation("no scheduler configured"))?;

        let Some(_guard) = self.state.try_begin() else {
            return Err(ServiceError::validation("deployment sync already in progress"));
        };

        let outcome = self.run(scheduler.as_ref()).await;
        self.state.record(&outcome).await;
        if outcome.is_ok() {
            counter!("deployment_syncs_total").increment(1);
        }
        outcome
    }

    async fn run(&self, scheduler: &dyn SchedulerClient) -> ServiceResult<DeploymentSyncReport> {
        let deployments = scheduler
            .list_deployments()
            .await
            .map_err(ServiceError::scheduler)?;

        let mut created = 0;
        let mut updated = 0;
        let selected = self.select_deployments(deployments);
        for (workflow_key, deployment) in &selected {
            let upsert = DefinitionUpsert {
                workflow_key: workflow_key.clone(),
                name: deployment.flow_name.clone(),
                description: deployment.description.clone().filter(|d| !d.is_empty()),
                workflow_type: workflow_type_from_tags(&deployment.tags),
                parameter_schema: deployment.parameter_openapi_schema.clone(),
                prefect_deployment_name: Some(deployment.name.clone()),
                prefect_deployment_id: Some(deployment.id.clone()),
            };
            match self.definitions.upsert_synced(upsert).await? {
                UpsertOutcome::Created => created += 1,
                UpsertOutcome::Updated => updated += 1,
            }
        }

        let workflow_keys: Vec<String> = selected.into_keys().collect();
        let missing = self.definitions.mark_missing_except(&workflow_keys).await?;

        info!(created, updated, missing, "Workflow deployments synced");
        Ok(DeploymentSyncReport {
            created,
            updated,
            missing,
            workflow_keys,
            synced_at: Utc::now(),
        })
    }

    pub async fn status(&self) -> DeploymentSyncStatus {
        self.state.snapshot().await
    }
}
