//! Batch sync of every output document under a category subtree.
//!
//! Candidates are the documents bound directly to each collected node minus
//! that node's own source documents, de-duplicated across the subtree.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use tracing::{debug, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use super::node_tree;
use super::sync::{SyncService, parse_sync_target};
use super::task_queue::{
    self, BatchHandle, BatchItem, BatchOutcome, BatchQueue, ItemStatus, resolve_concurrency,
};
use super::to_utc;
use crate::auth::RequestMeta;
use crate::clients::NdrClient;
use crate::clients::ndr::Document;
use crate::config::BatchConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::models::sync_batch::{self, BatchStatus};
use crate::repositories::workflow_batch::progress_percent;
use crate::repositories::{BatchCounts, Page, SyncBatchRepository};

/// Reason recorded when a trigger joined an attempt already in flight
pub const ALREADY_PENDING_REASON: &str = "sync already pending";

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct BatchSyncRequest {
    #[serde(default = "default_true")]
    pub include_descendants: bool,
    #[serde(default)]
    pub concurrency: Option<usize>,
}

/// A document selected for syncing, with the node it was found under
#[derive(Debug, Clone)]
pub struct SyncCandidate {
    pub node_id: i64,
    pub document: Document,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DocumentPreview {
    pub document_id: i64,
    pub title: String,
    pub node_id: i64,
    pub can_sync: bool,
    pub skip_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BatchSyncPreview {
    pub root_node_id: i64,
    pub total_documents: usize,
    pub syncable_documents: usize,
    pub skipped_documents: usize,
    pub documents: Vec<DocumentPreview>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BatchSyncExecuteResponse {
    pub batch_id: Uuid,
    pub status: BatchStatus,
    pub total_documents: i32,
}

/// Per-document entry of a sync batch's `details`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DocumentResult {
    pub document_id: i64,
    pub node_id: i64,
    pub title: String,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl BatchItem for DocumentResult {
    fn status(&self) -> ItemStatus {
        self.status
    }
}

impl DocumentResult {
    fn new(candidate: &SyncCandidate, status: ItemStatus) -> Self {
        Self {
            document_id: candidate.document.id,
            node_id: candidate.node_id,
            title: candidate.document.title.clone(),
            status,
            event_id: None,
            error: None,
            reason: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SyncBatchView {
    pub batch_id: Uuid,
    pub root_node_id: i64,
    pub status: BatchStatus,
    pub total_documents: i32,
    pub success_count: i32,
    pub failed_count: i32,
    pub skipped_count: i32,
    pub progress: f64,
    #[schema(value_type = Option<Object>)]
    pub details: Option<JsonValue>,
    pub created_by_id: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<sync_batch::Model> for SyncBatchView {
    fn from(batch: sync_batch::Model) -> Self {
        let counts = BatchCounts {
            success: batch.success_count,
            failed: batch.failed_count,
            skipped: batch.skipped_count,
        };
        Self {
            progress: progress_percent(counts.processed(), batch.total_documents),
            batch_id: batch.batch_id,
            root_node_id: batch.root_node_id,
            status: batch.status,
            total_documents: batch.total_documents,
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
pub struct SyncBatchList {
    pub items: Vec<SyncBatchView>,
    pub total: u64,
}

#[derive(Clone)]
pub struct BatchSyncService {
    sync: Arc<SyncService>,
    ndr: Arc<dyn NdrClient>,
    batches: SyncBatchRepository,
    queue: BatchQueue,
    config: BatchConfig,
}

impl BatchSyncService {
    pub fn new(
        sync: Arc<SyncService>,
        ndr: Arc<dyn NdrClient>,
        batches: SyncBatchRepository,
        queue: BatchQueue,
        config: BatchConfig,
    ) -> Self {
        Self {
            sync,
            ndr,
            batches,
            queue,
            config,
        }
    }

    /// Output documents of every node in the subtree, first occurrence wins.
    pub async fn collect_candidates(
        &self,
        meta: &RequestMeta,
        root_node_id: i64,
        include_descendants: bool,
    ) -> ServiceResult<Vec<SyncCandidate>> {
        let nodes =
            node_tree::collect_nodes(self.ndr.as_ref(), meta, root_node_id, include_descendants)
                .await?;

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for collected in nodes {
            let node_id = collected.node.id;
            let sources: Vec<i64> = self
                .ndr
                .list_source_documents(meta, node_id)
                .await
                .map_err(ServiceError::ndr)?
                .into_iter()
                .map(|doc| doc.document_id)
                .collect();

            let outputs =
                node_tree::output_documents(self.ndr.as_ref(), meta, node_id, &sources).await?;
            for document in outputs {
                if seen.insert(document.id) {
                    candidates.push(SyncCandidate { node_id, document });
                }
            }
        }

        debug!(root_node_id, count = candidates.len(), "Collected sync candidates");
        Ok(candidates)
    }

    #[instrument(skip(self, meta, request))]
    pub async fn preview(
        &self,
        meta: &RequestMeta,
        root_node_id: i64,
        request: BatchSyncRequest,
    ) -> ServiceResult<BatchSyncPreview> {
        let candidates = self
            .collect_candidates(meta, root_node_id, request.include_descendants)
            .await?;

        let documents: Vec<DocumentPreview> = candidates
            .into_iter()
            .map(|candidate| {
                let skip_reason = parse_sync_target(&candidate.document.metadata)
                    .err()
                    .map(|err| err.to_string());
                DocumentPreview {
                    document_id: candidate.document.id,
                    title: candidate.document.title,
                    node_id: candidate.node_id,
                    can_sync: skip_reason.is_none(),
                    skip_reason,
                }
            })
            .collect();

        let syncable_documents = documents.iter().filter(|doc| doc.can_sync).count();
        Ok(BatchSyncPreview {
            root_node_id,
            total_documents: documents.len(),
            syncable_documents,
            skipped_documents: documents.len() - syncable_documents,
            documents,
        })
    }

    #[instrument(skip(self, meta, request))]
    pub async fn execute(
        &self,
        meta: &RequestMeta,
        root_node_id: i64,
        request: BatchSyncRequest,
    ) -> ServiceResult<(BatchSyncExecuteResponse, BatchHandle)> {
        let candidates = self
            .collect_candidates(meta, root_node_id, request.include_descendants)
            .await?;
        let total_documents = i32::try_from(candidates.len())
            .map_err(|_| ServiceError::validation("subtree has too many documents"))?;
        let concurrency = resolve_concurrency(
            request.concurrency,
            self.config.sync_default_concurrency,
            self.config.max_concurrency,
        );

        let options = serde_json::to_value(&request).unwrap_or_else(|_| json!({}));
        let batch = self
            .batches
            .create(root_node_id, total_documents, options, meta.user_id)
            .await?;
        let batch_id = batch.batch_id;

        info!(%batch_id, root_node_id, total_documents, concurrency, "Batch sync accepted");

        let worker = self.clone();
        let meta = meta.clone();
        let handle = self.queue.submit(batch_id, async move {
            worker.run_batch(meta, batch_id, candidates, concurrency).await
        })?;

        Ok((
            BatchSyncExecuteResponse {
                batch_id,
                status: batch.status,
                total_documents,
            },
            handle,
        ))
    }

    async fn run_batch(
        self,
        meta: RequestMeta,
        batch_id: Uuid,
        candidates: Vec<SyncCandidate>,
        concurrency: usize,
    ) -> BatchOutcome {
        let ledger = self.batches.clone();
        let worker = Arc::new(self);
        let meta = Arc::new(meta);

        task_queue::fan_out(
            "sync",
            batch_id,
            ledger,
            candidates,
            concurrency,
            move |candidate: SyncCandidate| {
                let worker = worker.clone();
                let meta = meta.clone();
                async move { worker.process_document(&meta, &candidate).await }
            },
        )
        .await
    }

    async fn process_document(
        &self,
        meta: &RequestMeta,
        candidate: &SyncCandidate,
    ) -> DocumentResult {
        if let Err(err) = parse_sync_target(&candidate.document.metadata) {
            return DocumentResult {
                reason: Some(err.to_string()),
                ..DocumentResult::new(candidate, ItemStatus::Skipped)
            };
        }

        match self.sync.trigger_sync(meta, candidate.document.id).await {
            Ok(response) if response.deduplicated => DocumentResult {
                event_id: Some(response.event_id),
                reason: Some(ALREADY_PENDING_REASON.to_string()),
                ..DocumentResult::new(candidate, ItemStatus::Skipped)
            },
            Ok(response) => DocumentResult {
                event_id: Some(response.event_id),
                ..DocumentResult::new(candidate, ItemStatus::Success)
            },
            Err(err) => DocumentResult {
                error: Some(err.to_string()),
                ..DocumentResult::new(candidate, ItemStatus::Failed)
            },
        }
    }

    pub async fn get_batch(
        &self,
        meta: &RequestMeta,
        batch_id: Uuid,
    ) -> ServiceResult<SyncBatchView> {
        let batch = self
            .batches
            .find(batch_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("sync batch {} not found", batch_id)))?;

        if !meta.can_view_owned_by(batch.created_by_id) {
            return Err(ServiceError::Forbidden(format!(
                "sync batch {} belongs to another user",
                batch_id
            )));
        }

        Ok(batch.into())
    }

    pub async fn list_batches(
        &self,
        meta: &RequestMeta,
        page: Page,
    ) -> ServiceResult<SyncBatchList> {
        let owner = if meta.is_super_admin() {
            None
        } else {
            Some(meta.user_id.unwrap_or(-1))
        };
        let (batches, total) = self.batches.list(owner, page).await?;
        Ok(SyncBatchList {
            items: batches.into_iter().map(SyncBatchView::from).collect(),
            total,
        })
    }
}
