//! # Data Models
//!
//! SeaORM entities for the locally owned workflow and sync bookkeeping tables.
//! Categories and documents live in the NDR store and are modelled in
//! [`crate::clients::ndr`].

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod doc_sync_status;
pub mod sync_batch;
pub mod workflow_batch;
pub mod workflow_definition;
pub mod workflow_run;

pub use doc_sync_status::Entity as DocSyncStatus;
pub use sync_batch::Entity as SyncBatch;
pub use workflow_batch::Entity as WorkflowBatch;
pub use workflow_definition::Entity as WorkflowDefinition;
pub use workflow_run::Entity as WorkflowRun;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "ydms".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
