//! # SyncBatch Repository

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::{BatchCounts, BatchLedger, Page};
use crate::models::sync_batch::{ActiveModel, BatchStatus, Column, Entity, Model};

#[derive(Clone)]
pub struct SyncBatchRepository {
    db: DatabaseConnection,
}

impl SyncBatchRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        root_node_id: i64,
        total_documents: i32,
        options: JsonValue,
        created_by_id: Option<i64>,
    ) -> Result<Model, DbErr> {
        let now = Utc::now().fixed_offset();
        ActiveModel {
            batch_id: Set(Uuid::new_v4()),
            root_node_id: Set(root_node_id),
            status: Set(BatchStatus::Pending),
            total_documents: Set(total_documents),
            success_count: Set(0),
            failed_count: Set(0),
            skipped_count: Set(0),
            details: Set(Some(JsonValue::Array(Vec::new()))),
            options: Set(Some(options)),
            created_by_id: Set(created_by_id),
            started_at: Set(None),
            finished_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&self.db)
        .await
    }

    pub async fn find(&self, batch_id: Uuid) -> Result<Option<Model>, DbErr> {
        Entity::find_by_id(batch_id).one(&self.db).await
    }

    pub async fn mark_running(&self, batch_id: Uuid) -> Result<(), DbErr> {
        let now = Utc::now().fixed_offset();
        Entity::update_many()
            .col_expr(Column::Status, Expr::value(BatchStatus::Running))
            .col_expr(Column::StartedAt, Expr::value(now))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::BatchId.eq(batch_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn record_progress(&self, batch_id: Uuid, counts: BatchCounts) -> Result<(), DbErr> {
        Entity::update_many()
            .col_expr(Column::SuccessCount, Expr::value(counts.success))
            .col_expr(Column::FailedCount, Expr::value(counts.failed))
            .col_expr(Column::SkippedCount, Expr::value(counts.skipped))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::BatchId.eq(batch_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn finish(
        &self,
        batch_id: Uuid,
        status: BatchStatus,
        counts: BatchCounts,
        details: JsonValue,
    ) -> Result<(), DbErr> {
        let now = Utc::now().fixed_offset();
        Entity::update_many()
            .col_expr(Column::Status, Expr::value(status))
            .col_expr(Column::SuccessCount, Expr::value(counts.success))
            .col_expr(Column::FailedCount, Expr::value(counts.failed))
            .col_expr(Column::SkippedCount, Expr::value(counts.skipped))
            .col_expr(Column::Details, Expr::value(details))
            .col_expr(Column::FinishedAt, Expr::value(now))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::BatchId.eq(batch_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn list(
        &self,
        created_by_id: Option<i64>,
        page: Page,
    ) -> Result<(Vec<Model>, u64), DbErr> {
        let mut query = Entity::find();
        if let Some(user_id) = created_by_id {
            query = query.filter(Column::CreatedById.eq(user_id));
        }

        let total = query.clone().count(&self.db).await?;
        let batches = query
            .order_by_desc(Column::CreatedAt)
            .offset(page.offset)
            .limit(page.limit)
            .all(&self.db)
            .await?;

        Ok((batches, total))
    }
}

#[async_trait]
impl BatchLedger for SyncBatchRepository {
    async fn mark_running(&self, batch_id: Uuid) -> Result<(), DbErr> {
        SyncBatchRepository::mark_running(self, batch_id).await
    }

    async fn record_progress(&self, batch_id: Uuid, counts: BatchCounts) -> Result<(), DbErr> {
        SyncBatchRepository::record_progress(self, batch_id, counts).await
    }

    async fn finish(
        &self,
        batch_id: Uuid,
        status: BatchStatus,
        counts: BatchCounts,
        details: JsonValue,
    ) -> Result<(), DbErr> {
        SyncBatchRepository::finish(self, batch_id, status, counts, details).await
    }
}
