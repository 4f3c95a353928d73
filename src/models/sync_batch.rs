//! SyncBatch entity model
//!
//! Batch sync-to-external-db executions over the documents of a subtree.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

pub use super::workflow_batch::BatchStatus;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_batches")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub batch_id: Uuid,

    pub root_node_id: i64,

    pub status: BatchStatus,

    pub total_documents: i32,

    pub success_count: i32,

    pub failed_count: i32,

    pub skipped_count: i32,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub details: Option<JsonValue>,

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
