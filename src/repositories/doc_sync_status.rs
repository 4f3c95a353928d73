//! # DocSyncStatus Repository
//!
//! After a sync attempt is recorded, every write is guarded on
//! `(document_id, last_event_id, last_status = 'pending')`.

use chrono::Utc;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set, UpdateMany};

use crate::models::doc_sync_status::{ActiveModel, Column, Entity, Model, SyncState};

/// A fresh sync attempt for one document
#[derive(Debug, Clone)]
pub struct PendingAttempt {
    pub document_id: i64,
    pub event_id: String,
    pub version: i64,
    pub idempotency_key: String,
    pub workflow_run_id: i64,
}

#[derive(Clone)]
pub struct DocSyncStatusRepository {
    db: DatabaseConnection,
}

impl DocSyncStatusRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find(&self, document_id: i64) -> Result<Option<Model>, DbErr> {
        Entity::find_by_id(document_id).one(&self.db).await
    }

    /// Insert or replace the document's row with a new `pending` attempt.
    pub async fn upsert_pending(&self, attempt: PendingAttempt) -> Result<Model, DbErr> {
        let now = Utc::now().fixed_offset();
        let row = ActiveModel {
            document_id: Set(attempt.document_id),
            last_event_id: Set(attempt.event_id),
            last_version: Set(attempt.version),
            last_status: Set(SyncState::Pending),
            last_run_id: Set(None),
            last_workflow_run_id: Set(Some(attempt.workflow_run_id)),
            idempotency_key: Set(attempt.idempotency_key),
            last_error: Set(None),
            last_synced_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        // last_synced_at is kept: it records the last successful sync
        Entity::insert(row)
            .on_conflict(
                OnConflict::column(Column::DocumentId)
                    .update_columns([
                        Column::LastEventId,
                        Column::LastVersion,
                        Column::LastStatus,
                        Column::LastRunId,
                        Column::LastWorkflowRunId,
                        Column::IdempotencyKey,
                        Column::LastError,
                        Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;

        self.find(attempt.document_id)
            .await?
            .ok_or_else(|| {
                DbErr::RecordNotFound(format!("doc_sync_status {}", attempt.document_id))
            })
    }

    fn guarded(document_id: i64, event_id: &str) -> UpdateMany<Entity> {
        Entity::update_many()
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::DocumentId.eq(document_id))
            .filter(Column::LastEventId.eq(event_id))
            .filter(Column::LastStatus.eq(SyncState::Pending))
    }

    /// Record the scheduler flow run id of a pending attempt.
    pub async fn set_run_id(
        &self,
        document_id: i64,
        event_id: &str,
        run_id: &str,
    ) -> Result<bool, DbErr> {
        let result = Self::guarded(document_id, event_id)
            .col_expr(Column::LastRunId, Expr::value(run_id))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Fail a pending attempt.
    pub async fn mark_failed(
        &self,
        document_id: i64,
        event_id: &str,
        error: &str,
    ) -> Result<bool, DbErr> {
        let result = Self::guarded(document_id, event_id)
            .col_expr(Column::LastStatus, Expr::value(SyncState::Failed))
            .col_expr(Column::LastError, Expr::value(error))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Finalize a pending attempt from a callback.
    pub async fn complete(
        &self,
        document_id: i64,
        event_id: &str,
        state: SyncState,
        error: Option<&str>,
        run_id: Option<&str>,
    ) -> Result<bool, DbErr> {
        let now = Utc::now().fixed_offset();
        let mut update = Self::guarded(document_id, event_id)
            .col_expr(Column::LastStatus, Expr::value(state))
            .col_expr(Column::LastError, Expr::value(error.map(str::to_string)));

        if state == SyncState::Success {
            update = update.col_expr(Column::LastSyncedAt, Expr::value(now));
        }
        if let Some(run_id) = run_id {
            update = update.col_expr(Column::LastRunId, Expr::value(run_id));
        }

        Ok(update.exec(&self.db).await?.rows_affected > 0)
    }
}
