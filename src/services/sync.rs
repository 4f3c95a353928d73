//! Document sync to an external database.
//!
//! Each document carries a `sync_target` in its metadata naming where its
//! content lands downstream. A sync is a special-purpose workflow with its own
//! idempotency key, event-id replay protection and pending timeout.

use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue, json};
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::to_utc;
use super::workflow::{Dispatch, WorkflowService};
use crate::auth::RequestMeta;
use crate::clients::NdrClient;
use crate::clients::ndr::Document;
use crate::error::{ServiceError, ServiceResult};
use crate::models::doc_sync_status::{self, SyncState};
use crate::models::workflow_run::RunStatus;
use crate::repositories::DocSyncStatusRepository;
use crate::repositories::doc_sync_status::PendingAttempt;
use crate::repositories::workflow_run::{CallbackUpdate, NewWorkflowRun};

/// Metadata key holding the downstream location of a document
pub const SYNC_TARGET_KEY: &str = "sync_target";

/// A pending attempt younger than this absorbs new triggers.
pub const SYNC_PENDING_TIMEOUT_SECONDS: i64 = 60;

const DEFAULT_CONNECTION: &str = "default";

static IDENTIFIER_RE: OnceLock<Regex> = OnceLock::new();
static RECORD_ID_RE: OnceLock<Regex> = OnceLock::new();

fn identifier_re() -> &'static Regex {
    IDENTIFIER_RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,63}$").expect("valid identifier regex")
    })
}

fn record_id_re() -> &'static Regex {
    RECORD_ID_RE
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("valid record id regex"))
}

/// Downstream location of a synced document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SyncTarget {
    pub connection: String,
    pub table: String,
    pub record_id: String,
    pub field: String,
}

fn identifier(target: &Map<String, JsonValue>, key: &str) -> ServiceResult<Option<String>> {
    match target.get(key) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::String(value)) if identifier_re().is_match(value) => {
            Ok(Some(value.clone()))
        }
        Some(value) => Err(ServiceError::validation(format!(
            "sync_target.{} is not a valid identifier: {}",
            key, value
        ))),
    }
}

/// Parse and validate `metadata.sync_target`.
pub fn parse_sync_target(metadata: &Map<String, JsonValue>) -> ServiceResult<SyncTarget> {
    let target = match metadata.get(SYNC_TARGET_KEY) {
        None | Some(JsonValue::Null) => {
            return Err(ServiceError::validation("document has no sync_target"));
        }
        Some(JsonValue::Object(target)) => target,
        Some(_) => return Err(ServiceError::validation("sync_target must be an object")),
    };

    let required = |key: &str| -> ServiceResult<String> {
        identifier(target, key)?
            .ok_or_else(|| ServiceError::validation(format!("sync_target.{} is required", key)))
    };

    let record_id = match target.get("record_id") {
        Some(JsonValue::String(value)) => value.clone(),
        Some(JsonValue::Number(value)) => value.to_string(),
        None | Some(JsonValue::Null) => {
            return Err(ServiceError::validation("sync_target.record_id is required"));
        }
        Some(value) => {
            return Err(ServiceError::validation(format!(
                "sync_target.record_id is not a valid record id: {}",
                value
            )));
        }
    };
    if !record_id_re().is_match(&record_id) {
        return Err(ServiceError::validation(format!(
            "sync_target.record_id is not a valid record id: {}",
            record_id
        )));
    }

    Ok(SyncTarget {
        connection: identifier(target, "connection")?
            .unwrap_or_else(|| DEFAULT_CONNECTION.to_string()),
        table: required("table")?,
        record_id,
        field: required("field")?,
    })
}

/// First 16 hex chars of `sha256("sync:{doc_id}:{version}")`.
pub fn idempotency_key(document_id: i64, version: i64) -> String {
    let digest = Sha256::digest(format!("sync:{}:{}", document_id, version).as_bytes());
    hex::encode(digest)[..16].to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SyncTriggerResponse {
    pub document_id: i64,
    pub event_id: String,
    pub status: SyncState,
    pub workflow_run_id: Option<i64>,
    pub prefect_flow_run_id: Option<String>,
    pub idempotency_key: String,
    /// An attempt was already pending and was returned unchanged
    pub deduplicated: bool,
}

impl SyncTriggerResponse {
    fn from_row(row: doc_sync_status::Model, deduplicated: bool) -> Self {
        Self {
            document_id: row.document_id,
            event_id: row.last_event_id,
            status: row.last_status,
            workflow_run_id: row.last_workflow_run_id,
            prefect_flow_run_id: row.last_run_id,
            idempotency_key: row.idempotency_key,
            deduplicated,
        }
    }
}

/// Callback body sent by the sync flow
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SyncCallback {
    pub event_id: String,
    pub doc_id: i64,
    #[serde(default)]
    pub doc_version: Option<i64>,
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SyncCallbackOutcome {
    pub document_id: i64,
    pub event_id: String,
    pub status: SyncState,
    pub accepted: bool,
}

/// Latest sync attempt of a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SyncStatusView {
    pub document_id: i64,
    pub last_event_id: String,
    pub last_version: i64,
    pub last_status: SyncState,
    pub last_run_id: Option<String>,
    pub last_workflow_run_id: Option<i64>,
    pub idempotency_key: String,
    pub last_error: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl From<doc_sync_status::Model> for SyncStatusView {
    fn from(row: doc_sync_status::Model) -> Self {
        Self {
            document_id: row.document_id,
            last_event_id: row.last_event_id,
            last_version: row.last_version,
            last_status: row.last_status,
            last_run_id: row.last_run_id,
            last_workflow_run_id: row.last_workflow_run_id,
            idempotency_key: row.idempotency_key,
            last_error: row.last_error,
            last_synced_at: row.last_synced_at.map(to_utc),
            updated_at: to_utc(row.updated_at),
        }
    }
}

fn pending_is_fresh(row: &doc_sync_status::Model, now: DateTime<Utc>) -> bool {
    row.last_status == SyncState::Pending
        && now - to_utc(row.updated_at) < Duration::seconds(SYNC_PENDING_TIMEOUT_SECONDS)
}

pub struct SyncService {
    ndr: Arc<dyn NdrClient>,
    statuses: DocSyncStatusRepository,
    workflow: Arc<WorkflowService>,
}

impl SyncService {
    pub fn new(
        ndr: Arc<dyn NdrClient>,
        statuses: DocSyncStatusRepository,
        workflow: Arc<WorkflowService>,
    ) -> Self {
        Self {
            ndr,
            statuses,
            workflow,
        }
    }

    pub fn workflow_key(&self) -> &str {
        &self.workflow.config().sync_workflow_key
    }

    fn callback_url(&self) -> String {
        format!(
            "{}/api/v1/sync/callback",
            self.workflow.config().callback_base_url.trim_end_matches('/')
        )
    }

    /// Load a live document and its sync target.
    pub async fn load_syncable(
        &self,
        meta: &RequestMeta,
        document_id: i64,
    ) -> ServiceResult<(Document, SyncTarget)> {
        let document = self
            .ndr
            .get_document(meta, document_id)
            .await
            .map_err(ServiceError::ndr)?;
        if document.deleted_at.is_some() {
            return Err(ServiceError::validation(format!(
                "document {} is deleted",
                document_id
            )));
        }
        let target = parse_sync_target(&document.metadata)?;
        Ok((document, target))
    }

    /// Start syncing a document, or return the attempt already in flight.
    #[instrument(skip(self, meta))]
    pub async fn trigger_sync(
        &self,
        meta: &RequestMeta,
        document_id: i64,
    ) -> ServiceResult<SyncTriggerResponse> {
        let (document, target) = self.load_syncable(meta, document_id).await?;
        let key = idempotency_key(document_id, document.version);

        if let Some(existing) = self.statuses.find(document_id).await? {
            if pending_is_fresh(&existing, Utc::now()) {
                info!(document_id, event_id = %existing.last_event_id, "Sync already pending");
                counter!("sync_triggers_deduplicated_total").increment(1);
                return Ok(SyncTriggerResponse::from_row(existing, true));
            }
            if existing.last_status == SyncState::Pending {
                self.expire_attempt(&existing).await?;
            }
        }

        let event_id = Uuid::new_v4().to_string();
        let run = self
            .workflow
            .runs()
            .create(NewWorkflowRun {
                workflow_key: self.workflow_key().to_string(),
                node_id: None,
                document_id: Some(document_id),
                parameters: Some(json!({
                    "sync_target": target,
                    "doc_version": document.version,
                })),
                created_by_id: meta.user_id,
                retry_of_id: None,
            })
            .await?;

        let row = self
            .statuses
            .upsert_pending(PendingAttempt {
                document_id,
                event_id: event_id.clone(),
                version: document.version,
                idempotency_key: key.clone(),
                workflow_run_id: run.id,
            })
            .await?;
        counter!("sync_triggers_total").increment(1);

        let mut parameters = Map::new();
        parameters.insert("run_id".into(), json!(run.id));
        parameters.insert("event_id".into(), json!(event_id));
        parameters.insert("document_id".into(), json!(document_id));
        parameters.insert("doc_version".into(), json!(document.version));
        parameters.insert("idempotency_key".into(), json!(key));
        parameters.insert("sync_target".into(), json!(target));
        parameters.insert("callback_url".into(), json!(self.callback_url()));
        parameters.insert(
            "pdms_base_url".into(),
            json!(self.workflow.config().pdms_base_url),
        );

        let definition = self.workflow.find_definition(self.workflow_key()).await?;
        let deployment_name = self.workflow.deployment_name_for(definition.as_ref());

        match self
            .workflow
            .dispatch(self.workflow_key(), &deployment_name, parameters)
            .await
        {
            Ok(Dispatch::LocalOnly) => Ok(SyncTriggerResponse::from_row(row, false)),
            Ok(Dispatch::Submitted(flow_run)) => {
                if !self
                    .statuses
                    .set_run_id(document_id, &event_id, &flow_run.id)
                    .await?
                {
                    info!(
                        document_id,
                        %event_id,
                        "Sync attempt finalized before submission returned"
                    );
                }
                self.workflow.runs().mark_running(run.id, &flow_run.id).await?;

                let current = self.statuses.find(document_id).await?.unwrap_or(row);
                let mut response = SyncTriggerResponse::from_row(current, false);
                response.prefect_flow_run_id = Some(flow_run.id);
                Ok(response)
            }
            Err(err) => {
                let message = err.to_string();
                if !self
                    .statuses
                    .mark_failed(document_id, &event_id, &message)
                    .await?
                {
                    warn!(
                        document_id,
                        %event_id,
                        "Sync attempt changed before recording submission failure"
                    );
                }
                self.workflow.runs().mark_failed(run.id, &message).await?;
                counter!("sync_submissions_failed_total").increment(1);
                Err(err)
            }
        }
    }

    async fn expire_attempt(&self, stale: &doc_sync_status::Model) -> ServiceResult<()> {
        let message = format!(
            "sync timed out: no callback within {} seconds",
            SYNC_PENDING_TIMEOUT_SECONDS
        );
        let expired = self
            .statuses
            .mark_failed(stale.document_id, &stale.last_event_id, &message)
            .await?;
        if let Some(run_id) = stale.last_workflow_run_id {
            self.workflow.runs().mark_failed(run_id, &message).await?;
        }
        if expired {
            warn!(
                document_id = stale.document_id,
                event_id = %stale.last_event_id,
                "Expired stale sync attempt"
            );
        }
        Ok(())
    }

    /// Apply a callback from the sync flow.
    #[instrument(
        skip(self, callback),
        fields(document_id = callback.doc_id, event_id = %callback.event_id)
    )]
    pub async fn handle_sync_callback(
        &self,
        callback: SyncCallback,
    ) -> ServiceResult<SyncCallbackOutcome> {
        let state = match callback.status.as_str() {
            "success" => SyncState::Success,
            "failed" => SyncState::Failed,
            other => {
                return Err(ServiceError::validation(format!(
                    "invalid sync callback status {}",
                    other
                )));
            }
        };

        let row = self
            .statuses
            .find(callback.doc_id)
            .await?
            .ok_or_else(|| {
                ServiceError::not_found(format!("no sync status for document {}", callback.doc_id))
            })?;

        if row.last_event_id != callback.event_id {
            return Err(ServiceError::StaleCallback(format!(
                "event {} is not the latest sync attempt of document {}",
                callback.event_id, callback.doc_id
            )));
        }
        if row.last_status != SyncState::Pending {
            return Err(ServiceError::StaleCallback(format!(
                "sync attempt {} is already {}",
                callback.event_id,
                row.last_status.as_str()
            )));
        }
        if let Some(version) = callback.doc_version
            && version != row.last_version
        {
            warn!(expected = row.last_version, reported = version, "Sync callback version differs");
        }

        let applied = self
            .statuses
            .complete(
                callback.doc_id,
                &callback.event_id,
                state,
                callback.error.as_deref(),
                callback.run_id.as_deref(),
            )
            .await?;
        if !applied {
            return Err(ServiceError::StaleCallback(format!(
                "sync attempt {} changed concurrently",
                callback.event_id
            )));
        }

        if let Some(run_id) = row.last_workflow_run_id {
            let status = match state {
                SyncState::Success => RunStatus::Success,
                _ => RunStatus::Failed,
            };
            self.workflow
                .runs()
                .apply_callback(
                    run_id,
                    CallbackUpdate {
                        status,
                        error_message: callback.error.clone(),
                        result: None,
                    },
                    true,
                )
                .await?;
        }

        counter!("sync_callbacks_total", "status" => state.as_str()).increment(1);
        info!(status = state.as_str(), "Sync callback applied");

        Ok(SyncCallbackOutcome {
            document_id: callback.doc_id,
            event_id: callback.event_id,
            status: state,
            accepted: true,
        })
    }

    pub async fn get_sync_status(&self, document_id: i64) -> ServiceResult<SyncStatusView> {
        self.statuses
            .find(document_id)
            .await?
            .map(SyncStatusView::from)
            .ok_or_else(|| {
                ServiceError::not_found(format!("no sync status for document {}", document_id))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(target: JsonValue) -> Map<String, JsonValue> {
        let mut metadata = Map::new();
        metadata.insert(SYNC_TARGET_KEY.to_string(), target);
        metadata
    }

    #[test]
    fn test_idempotency_key_is_stable_and_short() {
        let key = idempotency_key(42, 3);
        assert_eq!(key.len(), 16);
        assert_eq!(key, idempotency_key(42, 3));
        assert_ne!(key, idempotency_key(42, 4));
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_parse_sync_target_accepts_numeric_record_id() {
        let target = parse_sync_target(&metadata(json!({
            "table": "lessons",
            "record_id": 1001,
            "field": "outline_json"
        })))
        .unwrap();

        assert_eq!(target.connection, "default");
        assert_eq!(target.table, "lessons");
        assert_eq!(target.record_id, "1001");
        assert_eq!(target.field, "outline_json");
    }

    #[test]
    fn test_parse_sync_target_rejects_injection() {
        let result = parse_sync_target(&metadata(json!({
            "table": "lessons; DROP TABLE users",
            "record_id": "1",
            "field": "body"
        })));
        assert!(matches!(result, Err(ServiceError::Validation(_))));

        let result = parse_sync_target(&metadata(json!({
            "table": "lessons",
            "record_id": "1 OR 1=1",
            "field": "body"
        })));
        assert!(matches!(result, Err(ServiceError::Validation(_))));
    }

    #[test]
    fn test_parse_sync_target_requires_target() {
        assert!(matches!(
            parse_sync_target(&Map::new()),
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            parse_sync_target(&metadata(json!({"table": "lessons", "record_id": "1"}))),
            Err(ServiceError::Validation(_))
        ));
    }
}
