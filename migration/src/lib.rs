//! Database migrations for the YDMS workflow service.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_06_01_000001_create_workflow_definitions;
mod m2025_06_01_000002_create_workflow_runs;
mod m2025_06_01_000003_create_workflow_batches;
mod m2025_06_01_000004_create_sync_batches;
mod m2025_06_01_000005_create_doc_sync_status;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_06_01_000001_create_workflow_definitions::Migration),
            Box::new(m2025_06_01_000002_create_workflow_runs::Migration),
            Box::new(m2025_06_01_000003_create_workflow_batches::Migration),
            Box::new(m2025_06_01_000004_create_sync_batches::Migration),
            Box::new(m2025_06_01_000005_create_doc_sync_status::Migration),
        ]
    }
}
