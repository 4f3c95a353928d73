//! WorkflowDefinition entity model
//!
//! A workflow that can be triggered against a node or a document. Rows are
//! created by the deployment sync or seeded manually, and are never deleted:
//! deployments that disappear upstream are marked `missing`.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;

/// Definition targets a single category node.
pub const WORKFLOW_TYPE_NODE: &str = "node";
/// Definition targets a single document.
pub const WORKFLOW_TYPE_DOCUMENT: &str = "document";

/// Deployment is present in the scheduler.
pub const SYNC_STATUS_ACTIVE: &str = "active";
/// Deployment disappeared from the scheduler during the last sync.
pub const SYNC_STATUS_MISSING: &str = "missing";

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "workflow_definitions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Stable key used in URLs and as the Prefect flow name
    #[sea_orm(unique)]
    pub workflow_key: String,

    pub name: String,

    pub description: Option<String>,

    /// `node`, `document`, or empty for legacy rows
    pub workflow_type: String,

    /// `active`, `missing`, or empty for manually seeded rows
    pub sync_status: String,

    pub enabled: bool,

    /// JSON schema of user-supplied parameters
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub parameter_schema: Option<JsonValue>,

    pub prefect_deployment_name: Option<String>,

    pub prefect_deployment_id: Option<String>,

    pub last_synced_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// A definition whose deployment is no longer known upstream.
    pub fn is_stale(&self) -> bool {
        !self.sync_status.is_empty() && self.sync_status != SYNC_STATUS_ACTIVE
    }

    /// Whether the definition may be triggered against the given target type.
    /// Legacy rows without a type accept any target.
    pub fn accepts_target(&self, workflow_type: &str) -> bool {
        self.workflow_type.is_empty() || self.workflow_type == workflow_type
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
