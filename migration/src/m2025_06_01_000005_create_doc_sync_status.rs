//! Migration to create the doc_sync_status table.
//!
//! One row per document tracks the latest sync attempt. Callback guards match
//! on `(document_id, last_event_id, last_status)`.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DocSyncStatus::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DocSyncStatus::DocumentId)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(DocSyncStatus::LastEventId)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DocSyncStatus::LastVersion)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(DocSyncStatus::LastStatus)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(ColumnDef::new(DocSyncStatus::LastRunId).text().null())
                    .col(
                        ColumnDef::new(DocSyncStatus::LastWorkflowRunId)
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(DocSyncStatus::IdempotencyKey)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(ColumnDef::new(DocSyncStatus::LastError).text().null())
                    .col(
                        ColumnDef::new(DocSyncStatus::LastSyncedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(DocSyncStatus::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(DocSyncStatus::UpdatedAt)
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
            .drop_table(Table::drop().table(DocSyncStatus::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum DocSyncStatus {
    Table,
    DocumentId,
    LastEventId,
    LastVersion,
    LastStatus,
    LastRunId,
    LastWorkflowRunId,
    IdempotencyKey,
    LastError,
    LastSyncedAt,
    CreatedAt,
    UpdatedAt,
}
