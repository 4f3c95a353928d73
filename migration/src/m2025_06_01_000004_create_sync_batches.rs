//! Migration to create the sync_batches table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncBatches::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SyncBatches::BatchId)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(SyncBatches::RootNodeId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncBatches::Status)
                            .string_len(32)
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(SyncBatches::TotalDocuments)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncBatches::SuccessCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncBatches::FailedCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncBatches::SkippedCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(SyncBatches::Details).json_binary().null())
                    .col(ColumnDef::new(SyncBatches::Options).json_binary().null())
                    .col(ColumnDef::new(SyncBatches::CreatedById).big_integer().null())
                    .col(
                        ColumnDef::new(SyncBatches::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncBatches::FinishedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncBatches::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SyncBatches::UpdatedAt)
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
            .drop_table(Table::drop().table(SyncBatches::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SyncBatches {
    Table,
    BatchId,
    RootNodeId,
    Status,
    TotalDocuments,
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
