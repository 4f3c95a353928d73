//! # Common API Types
//!
//! Shared request and response shapes used across handler modules.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use utoipa::{IntoParams, ToSchema};

use crate::repositories::Page;

/// Offset pagination query parameters
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageQuery {
    /// Maximum number of items to return (default 50, max 200)
    pub limit: Option<u64>,
    /// Number of items to skip
    pub offset: Option<u64>,
}

impl PageQuery {
    pub fn page(&self) -> Page {
        Page::new(self.limit, self.offset)
    }
}

/// Body of a single workflow trigger
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct TriggerRunBody {
    /// Flow parameters; reserved keys are overwritten by the service
    #[serde(default)]
    #[schema(value_type = Object)]
    pub parameters: Map<String, JsonValue>,
    /// Run this trigger retries
    #[serde(default)]
    pub retry_of_id: Option<i64>,
}

/// Generic acknowledgement
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    #[schema(example = "ok")]
    pub status: String,
}

impl StatusResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}
