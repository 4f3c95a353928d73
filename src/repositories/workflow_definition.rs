//! # WorkflowDefinition Repository

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, IntoActiveModel,
    QueryFilter, QueryOrder, Set,
};
use serde_json::Value as JsonValue;

use crate::models::workflow_definition::{
    ActiveModel, Column, Entity, Model, SYNC_STATUS_ACTIVE, SYNC_STATUS_MISSING,
};

/// Fields of a definition as supplied by a seed or a deployment sync
#[derive(Debug, Clone, Default)]
pub struct DefinitionUpsert {
    pub workflow_key: String,
    pub name: String,
    pub description: Option<String>,
    pub workflow_type: String,
    pub parameter_schema: Option<JsonValue>,
    pub prefect_deployment_name: Option<String>,
    pub prefect_deployment_id: Option<String>,
}

/// Outcome of [`WorkflowDefinitionRepository::upsert_synced`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

#[derive(Clone)]
pub struct WorkflowDefinitionRepository {
    db: DatabaseConnection,
}

impl WorkflowDefinitionRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find_by_key(&self, workflow_key: &str) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(Column::WorkflowKey.eq(workflow_key))
            .one(&self.db)
            .await
    }

    /// All definitions ordered by key, optionally including disabled ones.
    pub async fn list(&self, include_disabled: bool) -> Result<Vec<Model>, DbErr> {
        let mut query = Entity::find().order_by_asc(Column::WorkflowKey);
        if !include_disabled {
            query = query.filter(Column::Enabled.eq(true));
        }
        query.all(&self.db).await
    }

    /// Insert a manually seeded definition (empty sync status).
    pub async fn create(&self, definition: DefinitionUpsert) -> Result<Model, DbErr> {
        let now = Utc::now().fixed_offset();
        ActiveModel {
            workflow_key: Set(definition.workflow_key),
            name: Set(definition.name),
            description: Set(definition.description),
            workflow_type: Set(definition.workflow_type),
            sync_status: Set(String::new()),
            enabled: Set(true),
            parameter_schema: Set(definition.parameter_schema),
            prefect_deployment_name: Set(definition.prefect_deployment_name),
            prefect_deployment_id: Set(definition.prefect_deployment_id),
            last_synced_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&self.db)
        .await
    }

    /// Toggle a definition; returns `None` when the key is unknown.
    pub async fn set_enabled(
        &self,
        workflow_key: &str,
        enabled: bool,
    ) -> Result<Option<Model>, DbErr> {
        let Some(existing) = self.find_by_key(workflow_key).await? else {
            return Ok(None);
        };

        let mut active = existing.into_active_model();
        active.enabled = Set(enabled);
        active.updated_at = Set(Utc::now().fixed_offset());
        active.update(&self.db).await.map(Some)
    }

    /// Create or refresh a definition from a scheduler deployment and mark it
    /// `active`. The `enabled` flag of existing rows is preserved.
    pub async fn upsert_synced(
        &self,
        definition: DefinitionUpsert,
    ) -> Result<UpsertOutcome, DbErr> {
        let now = Utc::now().fixed_offset();

        match self.find_by_key(&definition.workflow_key).await? {
            Some(existing) => {
                let mut active = existing.into_active_model();
                active.name = Set(definition.name);
                if definition.description.is_some() {
                    active.description = Set(definition.description);
                }
                if !definition.workflow_type.is_empty() {
                    active.workflow_type = Set(definition.workflow_type);
                }
                if definition.parameter_schema.is_some() {
                    active.parameter_schema = Set(definition.parameter_schema);
                }
                active.prefect_deployment_name = Set(definition.prefect_deployment_name);
                active.prefect_deployment_id = Set(definition.prefect_deployment_id);
                active.sync_status = Set(SYNC_STATUS_ACTIVE.to_string());
                active.last_synced_at = Set(Some(now));
                active.updated_at = Set(now);
                active.update(&self.db).await?;
                Ok(UpsertOutcome::Updated)
            }
            None => {
                ActiveModel {
                    workflow_key: Set(definition.workflow_key),
                    name: Set(definition.name),
                    description: Set(definition.description),
                    workflow_type: Set(definition.workflow_type),
                    sync_status: Set(SYNC_STATUS_ACTIVE.to_string()),
                    enabled: Set(true),
                    parameter_schema: Set(definition.parameter_schema),
                    prefect_deployment_name: Set(definition.prefect_deployment_name),
                    prefect_deployment_id: Set(definition.prefect_deployment_id),
                    last_synced_at: Set(Some(now)),
                    created_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .insert(&self.db)
                .await?;
                Ok(UpsertOutcome::Created)
            }
        }
    }

    /// Mark synced definitions whose key is not in `present_keys` as missing.
    /// Manually seeded rows (empty sync status) are left alone.
    pub async fn mark_missing_except(&self, present_keys: &[String]) -> Result<u64, DbErr> {
        let now = Utc::now().fixed_offset();
        let mut update = Entity::update_many()
            .col_expr(Column::SyncStatus, Expr::value(SYNC_STATUS_MISSING))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::SyncStatus.eq(SYNC_STATUS_ACTIVE));

        if !present_keys.is_empty() {
            update = update.filter(Column::WorkflowKey.is_not_in(present_keys.iter().cloned()));
        }

        Ok(update.exec(&self.db).await?.rows_affected)
    }
}
