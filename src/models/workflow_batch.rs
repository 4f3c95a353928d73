//! WorkflowBatch entity model
//!
//! One row per batch workflow execution over a category subtree. The row is
//! inserted synchronously when the batch is requested and is afterwards
//! written only by the batch executor.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;
use uuid::Uuid;

/// Aggregate state of a batch (shared by workflow and sync batches)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "running")]
    Running,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }

    /// Final status of a batch: `failed` only when nothing succeeded and at
    /// least one item failed.
    pub fn from_counts(success: i32, failed: i32) -> Self {
        if success == 0 && failed > 0 {
            BatchStatus::Failed
        } else {
            BatchStatus::Completed
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "workflow_batches")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub batch_id: Uuid,

    pub workflow_key: String,

    pub root_node_id: i64,

    pub status: BatchStatus,

    pub total_nodes: i32,

    pub success_count: i32,

    pub failed_count: i32,

    pub skipped_count: i32,

    /// Per-node results in completion order
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub details: Option<JsonValue>,

    /// The request options the batch was started with
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub options: Option<JsonValue>,

    pub created_by_id: Option<i64>,

    pub started_at: Option<DateTimeWithTimeZone>,

    pub finished_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
