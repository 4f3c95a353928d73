//! Migration to create the workflow_definitions table.
//!
//! Each row describes one workflow that can be triggered against a node or a
//! document, together with the Prefect deployment that executes it.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(WorkflowDefinitions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WorkflowDefinitions::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(WorkflowDefinitions::WorkflowKey)
                            .string_len(128)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(WorkflowDefinitions::Name).text().not_null())
                    .col(ColumnDef::new(WorkflowDefinitions::Description).text().null())
                    .col(
                        ColumnDef::new(WorkflowDefinitions::WorkflowType)
                            .string_len(32)
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(WorkflowDefinitions::SyncStatus)
                            .string_len(32)
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(WorkflowDefinitions::Enabled)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(WorkflowDefinitions::ParameterSchema)
                            .json_binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(WorkflowDefinitions::PrefectDeploymentName)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(WorkflowDefinitions::PrefectDeploymentId)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(WorkflowDefinitions::LastSyncedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(WorkflowDefinitions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(WorkflowDefinitions::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(WorkflowDefinitions::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum WorkflowDefinitions {
    Table,
    Id,
    WorkflowKey,
    Name,
    Description,
    WorkflowType,
    SyncStatus,
    Enabled,
    ParameterSchema,
    PrefectDeploymentName,
    PrefectDeploymentId,
    LastSyncedAt,
    CreatedAt,
    UpdatedAt,
}
