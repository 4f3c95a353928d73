//! # Repository Layer
//!
//! Repositories wrap the SeaORM queries for the locally owned tables. State
//! transitions that race with callbacks are written as conditional
//! `UPDATE ... WHERE` statements and report whether they applied.

pub mod doc_sync_status;
pub mod sync_batch;
pub mod workflow_batch;
pub mod workflow_definition;
pub mod workflow_run;

pub use doc_sync_status::DocSyncStatusRepository;
pub use sync_batch::SyncBatchRepository;
pub use workflow_batch::{BatchCounts, WorkflowBatchRepository};
pub use workflow_definition::WorkflowDefinitionRepository;
pub use workflow_run::{RunFilter, WorkflowRunRepository};

use async_trait::async_trait;
use sea_orm::DbErr;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::workflow_batch::BatchStatus;

/// Lifecycle writes a running batch makes against its table
#[async_trait]
pub trait BatchLedger: Clone + Send + Sync + 'static {
    async fn mark_running(&self, batch_id: Uuid) -> Result<(), DbErr>;

    async fn record_progress(&self, batch_id: Uuid, counts: BatchCounts) -> Result<(), DbErr>;

    async fn finish(
        &self,
        batch_id: Uuid,
        status: BatchStatus,
        counts: BatchCounts,
        details: JsonValue,
    ) -> Result<(), DbErr>;
}

/// Pagination window shared by list queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u64,
    pub offset: u64,
}

impl Page {
    pub const MAX_LIMIT: u64 = 200;

    pub fn new(limit: Option<u64>, offset: Option<u64>) -> Self {
        Self {
            limit: limit.unwrap_or(50).clamp(1, Self::MAX_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}
