//! DocSyncStatus entity model
//!
//! Latest sync attempt per document. Every write after the scheduler
//! submission is guarded on `(document_id, last_event_id, last_status)` so a
//! late callback is never clobbered by a slow error path.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "success")]
    Success,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Pending => "pending",
            SyncState::Success => "success",
            SyncState::Failed => "failed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "doc_sync_status")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub document_id: i64,

    /// Event id of the latest attempt; callbacks must echo it
    pub last_event_id: String,

    pub last_version: i64,

    pub last_status: SyncState,

    /// Prefect flow run id of the latest attempt
    pub last_run_id: Option<String>,

    /// Audit row in `workflow_runs`
    pub last_workflow_run_id: Option<i64>,

    pub idempotency_key: String,

    pub last_error: Option<String>,

    pub last_synced_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
