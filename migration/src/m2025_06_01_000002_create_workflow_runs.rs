//! Migration to create the workflow_runs table.
//!
//! This is the ledger of triggered workflow instances. Exactly one of
//! `node_id` / `document_id` is set per row.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(WorkflowRuns::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WorkflowRuns::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(WorkflowRuns::WorkflowKey)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(ColumnDef::new(WorkflowRuns::NodeId).big_integer().null())
                    .col(ColumnDef::new(WorkflowRuns::DocumentId).big_integer().null())
                    .col(ColumnDef::new(WorkflowRuns::Parameters).json_binary().null())
                    .col(
                        ColumnDef::new(WorkflowRuns::Status)
                            .string_len(32)
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(WorkflowRuns::PrefectFlowRunId).text().null())
                    .col(ColumnDef::new(WorkflowRuns::CreatedById).big_integer().null())
                    .col(ColumnDef::new(WorkflowRuns::RetryOfId).big_integer().null())
                    .col(
                        ColumnDef::new(WorkflowRuns::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(WorkflowRuns::FinishedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(WorkflowRuns::ErrorMessage).text().null())
                    .col(ColumnDef::new(WorkflowRuns::Result).json_binary().null())
                    .col(
                        ColumnDef::new(WorkflowRuns::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(WorkflowRuns::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_workflow_runs_node_status")
                    .table(WorkflowRuns::Table)
                    .col(WorkflowRuns::NodeId)
                    .col(WorkflowRuns::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_workflow_runs_document_status")
                    .table(WorkflowRuns::Table)
                    .col(WorkflowRuns::DocumentId)
                    .col(WorkflowRuns::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_workflow_runs_node_status").to_owned())
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_workflow_runs_document_status")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(WorkflowRuns::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum WorkflowRuns {
    Table,
    Id,
    WorkflowKey,
    NodeId,
    DocumentId,
    Parameters,
    Status,
    PrefectFlowRunId,
    CreatedById,
    RetryOfId,
    StartedAt,
    FinishedAt,
    ErrorMessage,
    Result,
    CreatedAt,
    UpdatedAt,
}
