//! Migration to create the workflow_batches table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(WorkflowBatches::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WorkflowBatches::BatchId)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(WorkflowBatches::WorkflowKey)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WorkflowBatches::RootNodeId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WorkflowBatches::Status)
                            .string_len(32)
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(WorkflowBatches::TotalNodes)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(WorkflowBatches::SuccessCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(WorkflowBatches::FailedCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(WorkflowBatches::SkippedCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(WorkflowBatches::Details).json_binary().null())
                    .col(ColumnDef::new(WorkflowBatches::Options).json_binary().null())
                    .col(
                        ColumnDef::new(WorkflowBatches::CreatedById)
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(WorkflowBatches::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(WorkflowBatches::FinishedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(WorkflowBatches::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(WorkflowBatches::UpdatedAt)
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
                    .name("idx_workflow_batches_created_by")
                    .table(WorkflowBatches::Table)
                    .col(WorkflowBatches::CreatedById)
                    .col(WorkflowBatches::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_workflow_batches_created_by")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(WorkflowBatches::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum WorkflowBatches {
    Table,
    BatchId,
    WorkflowKey,
    RootNodeId,
    Status,
    TotalNodes,
    SuccessCount,
    FailedCount,
    SkippedCount,
    Details,
    Options,
    CreatedById,
    StartedAt,
    FinishedAt,
    CreatedAt,
    UpdatedAt,
}
