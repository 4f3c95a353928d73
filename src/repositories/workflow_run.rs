//! # WorkflowRun Repository
//!
//! Every status write after insertion is conditional on the current status so
//! that a late scheduler callback, an explicit cancel and a slow submission
//! error path can never overwrite each other.

use chrono::Utc;
use sea_orm::sea_query::{Expr, Func};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde_json::Value as JsonValue;

use super::Page;
use crate::models::workflow_run::{ActiveModel, Column, Entity, Model, RunStatus};

const ACTIVE_STATUSES: [RunStatus; 2] = [RunStatus::Pending, RunStatus::Running];

/// Insert payload for a new run
#[derive(Debug, Clone, Default)]
pub struct NewWorkflowRun {
    pub workflow_key: String,
    pub node_id: Option<i64>,
    pub document_id: Option<i64>,
    pub parameters: Option<JsonValue>,
    pub created_by_id: Option<i64>,
    pub retry_of_id: Option<i64>,
}

/// Filters for [`WorkflowRunRepository::list`]
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub workflow_key: Option<String>,
    pub node_id: Option<i64>,
    pub document_id: Option<i64>,
    pub status: Option<RunStatus>,
    /// Restrict to runs created by this user
    pub created_by_id: Option<i64>,
}

/// Terminal or intermediate state reported by a callback
#[derive(Debug, Clone)]
pub struct CallbackUpdate {
    pub status: RunStatus,
    pub error_message: Option<String>,
    pub result: Option<JsonValue>,
}

#[derive(Clone)]
pub struct WorkflowRunRepository {
    db: DatabaseConnection,
}

impl WorkflowRunRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Insert a run in `pending` state.
    pub async fn create(&self, run: NewWorkflowRun) -> Result<Model, DbErr> {
        let now = Utc::now().fixed_offset();
        ActiveModel {
            workflow_key: Set(run.workflow_key),
            node_id: Set(run.node_id),
            document_id: Set(run.document_id),
            parameters: Set(run.parameters),
            status: Set(RunStatus::Pending),
            prefect_flow_run_id: Set(None),
            created_by_id: Set(run.created_by_id),
            retry_of_id: Set(run.retry_of_id),
            started_at: Set(None),
            finished_at: Set(None),
            error_message: Set(None),
            result: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&self.db)
        .await
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<Model>, DbErr> {
        Entity::find_by_id(id).one(&self.db).await
    }

    /// `pending` → `running` once the scheduler accepted the flow run.
    pub async fn mark_running(&self, id: i64, flow_run_id: &str) -> Result<bool, DbErr> {
        let now = Utc::now().fixed_offset();
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(RunStatus::Running))
            .col_expr(Column::PrefectFlowRunId, Expr::value(flow_run_id))
            .col_expr(Column::StartedAt, Expr::value(now))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(RunStatus::Pending))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Mark an active run `failed` with the given message.
    pub async fn mark_failed(&self, id: i64, message: &str) -> Result<bool, DbErr> {
        let now = Utc::now().fixed_offset();
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(RunStatus::Failed))
            .col_expr(Column::ErrorMessage, Expr::value(message))
            .col_expr(Column::FinishedAt, Expr::value(now))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.is_in(ACTIVE_STATUSES))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// `pending|running` → `cancelled`.
    pub async fn cancel(&self, id: i64) -> Result<bool, DbErr> {
        let now = Utc::now().fixed_offset();
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(RunStatus::Cancelled))
            .col_expr(Column::FinishedAt, Expr::value(now))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.is_in(ACTIVE_STATUSES))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Apply a callback. Cancelled runs never match; with `only_active` runs
    /// that already reached a terminal state do not match either.
    pub async fn apply_callback(
        &self,
        id: i64,
        update: CallbackUpdate,
        only_active: bool,
    ) -> Result<bool, DbErr> {
        let now = Utc::now().fixed_offset();
        let mut query = Entity::update_many()
            .col_expr(Column::Status, Expr::value(update.status))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(id));

        if matches!(update.status, RunStatus::Success | RunStatus::Failed) {
            query = query.col_expr(Column::FinishedAt, Expr::value(now));
        }
        if update.status == RunStatus::Running {
            query = query.col_expr(
                Column::StartedAt,
                Func::coalesce([Expr::col(Column::StartedAt).into(), Expr::value(now)]).into(),
            );
        }
        if let Some(message) = update.error_message {
            query = query.col_expr(Column::ErrorMessage, Expr::value(message));
        }
        if let Some(result) = update.result {
            query = query.col_expr(Column::Result, Expr::value(result));
        }

        query = if only_active {
            query.filter(Column::Status.is_in(ACTIVE_STATUSES))
        } else {
            query.filter(Column::Status.ne(RunStatus::Cancelled))
        };

        Ok(query.exec(&self.db).await?.rows_affected > 0)
    }

    /// Runs matching the filter, newest first, with the total match count.
    pub async fn list(&self, filter: &RunFilter, page: Page) -> Result<(Vec<Model>, u64), DbErr> {
        let mut condition = Condition::all();
        if let Some(key) = &filter.workflow_key {
            condition = condition.add(Column::WorkflowKey.eq(key.clone()));
        }
        if let Some(node_id) = filter.node_id {
            condition = condition.add(Column::NodeId.eq(node_id));
        }
        if let Some(document_id) = filter.document_id {
            condition = condition.add(Column::DocumentId.eq(document_id));
        }
        if let Some(status) = filter.status {
            condition = condition.add(Column::Status.eq(status));
        }
        if let Some(user_id) = filter.created_by_id {
            condition = condition.add(Column::CreatedById.eq(user_id));
        }

        let total = Entity::find()
            .filter(condition.clone())
            .count(&self.db)
            .await?;

        let runs = Entity::find()
            .filter(condition)
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id)
            .offset(page.offset)
            .limit(page.limit)
            .all(&self.db)
            .await?;

        Ok((runs, total))
    }

    /// Every `pending` or `running` run, oldest first.
    pub async fn list_active(&self) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::Status.is_in(ACTIVE_STATUSES))
            .order_by_asc(Column::Id)
            .all(&self.db)
            .await
    }
}
