//! Batch workflow execution over a category subtree.
//!
//! `execute` records the batch synchronously and hands the fan-out to the
//! [`BatchQueue`]. The worker triggers one workflow per node through
//! [`task_queue::fan_out`], which writes progress as items complete.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue, json};
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use super::node_tree::{self, CollectedNode, SkipPolicy};
use super::task_queue::{
    self, BatchHandle, BatchItem, BatchOutcome, BatchQueue, ItemStatus, resolve_concurrency,
};
use super::to_utc;
use super::workflow::{TriggerWorkflowRequest, WorkflowService};
use crate::auth::RequestMeta;
use crate::clients::NdrClient;
use crate::clients::ndr::Node;
use crate::config::BatchConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::models::workflow_batch::{self, BatchStatus};
use crate::models::workflow_definition::WORKFLOW_TYPE_NODE;
use crate::repositories::workflow_batch::progress_percent;
use crate::repositories::{BatchCounts, Page, WorkflowBatchRepository};

fn default_true() -> bool {
    true
}

/// Batch workflow over a root node and (optionally) its descendants
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct BatchWorkflowRequest {
    pub workflow_key: String,
    #[serde(default = "default_true")]
    pub include_descendants: bool,
    /// Passed to every triggered run
    #[serde(default)]
    #[schema(value_type = Object)]
    pub parameters: Map<String, JsonValue>,
    #[serde(flatten)]
    pub skip: SkipPolicy,
    /// Parallel triggers; defaults depend on the workflow
    #[serde(default)]
    pub concurrency: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct NodePreview {
    pub node_id: i64,
    pub node_name: String,
    pub depth: u32,
    pub can_execute: bool,
    pub skip_reason: Option<String>,
    pub source_doc_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BatchWorkflowPreview {
    pub root_node_id: i64,
    pub workflow_key: String,
    pub total_nodes: usize,
    pub executable_nodes: usize,
    pub skipped_nodes: usize,
    pub nodes: Vec<NodePreview>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BatchExecuteResponse {
    pub batch_id: Uuid,
    pub status: BatchStatus,
    pub total_nodes: i32,
}

/// Per-node entry of a batch's `details`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct NodeResult {
    pub node_id: i64,
    pub node_name: String,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl BatchItem for NodeResult {
    fn status(&self) -> ItemStatus {
        self.status
    }
}

impl NodeResult {
    fn new(node: &Node, status: ItemStatus) -> Self {
        Self {
            node_id: node.id,
            node_name: node.name.clone(),
            status,
            run_id: None,
            error: None,
            reason: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WorkflowBatchView {
    pub batch_id: Uuid,
    pub workflow_key: String,
    pub root_node_id: i64,
    pub status: BatchStatus,
    pub total_nodes: i32,
    pub success_count: i32,
    pub failed_count: i32,
    pub skipped_count: i32,
    /// Percentage of processed nodes
    pub progress: f64,
    #[schema(value_type = Option<Object>)]
    pub details: Option<JsonValue>,
    pub created_by_id: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<workflow_batch::Model> for WorkflowBatchView {
    fn from(batch: workflow_batch::Model) -> Self {
        let counts = BatchCounts {
            success: batch.success_count,
            failed: batch.failed_count,
            skipped: batch.skipped_count,
        };
        Self {
            progress: progress_percent(counts.processed(), batch.total_nodes),
            batch_id: batch.batch_id,
            workflow_key: batch.workflow_key,
            root_node_id: batch.root_node_id,
            status: batch.status,
            total_nodes: batch.total_nodes,
            success_count: batch.success_count,
            failed_count: batch.failed_count,
            skipped_count: batch.skipped_count,
            details: batch.details,
            created_by_id: batch.created_by_id,
            started_at: batch.started_at.map(to_utc),
            finished_at: batch.finished_at.map(to_utc),
            created_at: to_utc(batch.created_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WorkflowBatchList {
    pub items: Vec<WorkflowBatchView>,
    pub total: u64,
}

#[derive(Clone)]
pub struct BatchWorkflowService {
    workflow: Arc<WorkflowService>,
    ndr: Arc<dyn NdrClient>,
    batches: WorkflowBatchRepository,
    queue: BatchQueue,
    config: BatchConfig,
}

impl BatchWorkflowService {
    pub fn new(
        workflow: Arc<WorkflowService>,
        ndr: Arc<dyn NdrClient>,
        batches: WorkflowBatchRepository,
        queue: BatchQueue,
        config: BatchConfig,
    ) -> Self {
        Self {
            workflow,
            ndr,
            batches,
            queue,
            config,
        }
    }

    fn concurrency_for(&self, request: &BatchWorkflowRequest) -> usize {
        let default = if request.workflow_key == self.workflow.config().sync_workflow_key {
            self.config.sync_default_concurrency
        } else {
            self.config.default_concurrency
        };
        resolve_concurrency(request.concurrency, default, self.config.max_concurrency)
    }

    async fn collect(
        &self,
        meta: &RequestMeta,
        root_node_id: i64,
        request: &BatchWorkflowRequest,
    ) -> ServiceResult<Vec<CollectedNode>> {
        self.workflow
            .load_definition(&request.workflow_key, WORKFLOW_TYPE_NODE)
            .await?;
        node_tree::collect_nodes(
            self.ndr.as_ref(),
            meta,
            root_node_id,
            request.include_descendants,
        )
        .await
    }

    /// Show which nodes a batch would run on.
    #[instrument(skip(self, meta, request), fields(workflow_key = %request.workflow_key))]
    pub async fn preview(
        &self,
        meta: &RequestMeta,
        root_node_id: i64,
        request: BatchWorkflowRequest,
    ) -> ServiceResult<BatchWorkflowPreview> {
        let nodes = self.collect(meta, root_node_id, &request).await?;

        let mut previews = Vec::with_capacity(nodes.len());
        for collected in nodes {
            let evaluation = request
                .skip
                .evaluate(self.ndr.as_ref(), meta, &collected.node)
                .await?;
            previews.push(NodePreview {
                node_id: collected.node.id,
                node_name: collected.node.name,
                depth: collected.depth,
                can_execute: evaluation.skip_reason.is_none(),
                skip_reason: evaluation.skip_reason,
                source_doc_count: evaluation.sources.len(),
            });
        }

        let executable_nodes = previews.iter().filter(|node| node.can_execute).count();
        Ok(BatchWorkflowPreview {
            root_node_id,
            workflow_key: request.workflow_key,
            total_nodes: previews.len(),
            executable_nodes,
            skipped_nodes: previews.len() - executable_nodes,
            nodes: previews,
        })
    }

    /// Record a batch and start it in the background.
    #[instrument(skip(self, meta, request), fields(workflow_key = %request.workflow_key))]
    pub async fn execute(
        &self,
        meta: &RequestMeta,
        root_node_id: i64,
        request: BatchWorkflowRequest,
    ) -> ServiceResult<(BatchExecuteResponse, BatchHandle)> {
        let nodes = self.collect(meta, root_node_id, &request).await?;
        let total_nodes = i32::try_from(nodes.len())
            .map_err(|_| ServiceError::validation("subtree has too many nodes"))?;
        let concurrency = self.concurrency_for(&request);

        let options = serde_json::to_value(&request).unwrap_or_else(|_| json!({}));
        let batch = self
            .batches
            .create(
                &request.workflow_key,
                root_node_id,
                total_nodes,
                options,
                meta.user_id,
            )
            .await?;
        let batch_id = batch.batch_id;

        info!(%batch_id, root_node_id, total_nodes, concurrency, "Batch workflow accepted");

        let worker = self.clone();
        let meta = meta.clone();
        let handle = self.queue.submit(batch_id, async move {
            worker
                .run_batch(meta, batch_id, nodes, request, concurrency)
                .await
        })?;

        Ok((
            BatchExecuteResponse {
                batch_id,
                status: batch.status,
                total_nodes,
            },
            handle,
        ))
    }

    async fn run_batch(
        self,
        meta: RequestMeta,
        batch_id: Uuid,
        nodes: Vec<CollectedNode>,
        request: BatchWorkflowRequest,
        concurrency: usize,
    ) -> BatchOutcome {
        let ledger = self.batches.clone();
        let nodes: Vec<Node> = nodes.into_iter().map(|collected| collected.node).collect();
        let worker = Arc::new(self);
        let meta = Arc::new(meta);
        let request = Arc::new(request);

        task_queue::fan_out(
            "workflow",
            batch_id,
            ledger,
            nodes,
            concurrency,
            move |node: Node| {
                let worker = worker.clone();
                let meta = meta.clone();
                let request = request.clone();
                async move { worker.process_node(&meta, &node, &request).await }
            },
        )
        .await
    }

    async fn process_node(
        &self,
        meta: &RequestMeta,
        node: &Node,
        request: &BatchWorkflowRequest,
    ) -> NodeResult {
        let evaluation = match request.skip.evaluate(self.ndr.as_ref(), meta, node).await {
            Ok(evaluation) => evaluation,
            Err(err) => {
                return NodeResult {
                    error: Some(err.to_string()),
                    ..NodeResult::new(node, ItemStatus::Failed)
                };
            }
        };

        if let Some(reason) = evaluation.skip_reason.clone() {
            return NodeResult {
                reason: Some(reason),
                ..NodeResult::new(node, ItemStatus::Skipped)
            };
        }

        let trigger = TriggerWorkflowRequest {
            node_id: node.id,
            workflow_key: request.workflow_key.clone(),
            parameters: request.parameters.clone(),
            source_doc_ids: Some(evaluation.source_ids()),
            retry_of_id: None,
        };
        match self.workflow.trigger_workflow(meta, trigger).await {
            Ok(response) => NodeResult {
                run_id: Some(response.run_id),
                ..NodeResult::new(node, ItemStatus::Success)
            },
            Err(err) => NodeResult {
                error: Some(err.to_string()),
                ..NodeResult::new(node, ItemStatus::Failed)
            },
        }
    }

    /// Batch status with progress. Only the creator or a super admin may read it.
    pub async fn get_batch(
        &self,
        meta: &RequestMeta,
        batch_id: Uuid,
    ) -> ServiceResult<WorkflowBatchView> {
        let batch = self
            .batches
            .find(batch_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("batch {} not found", batch_id)))?;

        if !meta.can_view_owned_by(batch.created_by_id) {
            return Err(ServiceError::Forbidden(format!(
                "batch {} belongs to another user",
                batch_id
            )));
        }

        Ok(batch.into())
    }

    /// Batches newest first; the caller's own unless they are a super admin.
    pub async fn list_batches(
        &self,
        meta: &RequestMeta,
        page: Page,
    ) -> ServiceResult<WorkflowBatchList> {
        let owner = if meta.is_super_admin() {
            None
        } else {
            Some(meta.user_id.unwrap_or(-1))
        };
        let (batches, total) = self.batches.list(owner, page).await?;
        Ok(WorkflowBatchList {
            items: batches.into_iter().map(WorkflowBatchView::from).collect(),
            total,
        })
    }
}
