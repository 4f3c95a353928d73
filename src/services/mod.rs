//! # Services
//!
//! Business logic sitting between the HTTP handlers and the repositories /
//! external clients. Role checks live in the handlers; services trust the
//! [`crate::auth::RequestMeta`] they are given except for ownership filters.

pub mod batch_sync;
pub mod batch_workflow;
pub mod categories;
pub mod deployment_sync;
pub mod documents;
pub mod node_tree;
pub mod sync;
pub mod task_queue;
pub mod workflow;

pub use batch_sync::BatchSyncService;
pub use batch_workflow::BatchWorkflowService;
pub use categories::CategoryService;
pub use deployment_sync::{DeploymentSyncService, DeploymentSyncState};
pub use documents::DocumentService;
pub use sync::SyncService;
pub use task_queue::{BatchHandle, BatchQueue};
pub use workflow::WorkflowService;

use chrono::{DateTime, FixedOffset, Utc};

/// Render a stored timestamp as UTC for API responses.
pub(crate) fn to_utc(value: DateTime<FixedOffset>) -> DateTime<Utc> {
    value.with_timezone(&Utc)
}
