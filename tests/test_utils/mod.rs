//! Test utilities shared by the integration tests.
//!
//! Provides an in-memory SQLite database with migrations applied, an
//! in-memory NDR store and a scheduler fake that records every flow run.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use serde_json::{Map, Value as JsonValue};

use ydms::auth::{RequestMeta, UserRole};
use ydms::clients::ndr::{
    CreateDocumentRequest, CreateNodeRequest, Document, DocumentPage, DocumentUpdate,
    DocumentVersion, Node, NodeDocumentsQuery, SourceDocument,
};
use ydms::clients::prefect::{Deployment, FlowRun, flow_name_for};
use ydms::clients::{ClientError, NdrClient, SchedulerClient};
use ydms::config::{AppConfig, BatchConfig, WorkflowConfig};
use ydms::merge_patch::apply_merge_patch;
use ydms::models::workflow_definition::{self, WORKFLOW_TYPE_DOCUMENT, WORKFLOW_TYPE_NODE};
use ydms::repositories::WorkflowDefinitionRepository;
use ydms::repositories::workflow_definition::DefinitionUpsert;
use ydms::server::AppState;

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

pub fn admin() -> RequestMeta {
    RequestMeta::new(Some(1), UserRole::SuperAdmin)
}

pub fn course_admin(user_id: i64) -> RequestMeta {
    RequestMeta::new(Some(user_id), UserRole::CourseAdmin)
}

pub fn proofreader(user_id: i64) -> RequestMeta {
    RequestMeta::new(Some(user_id), UserRole::Proofreader)
}

pub fn test_config() -> AppConfig {
    AppConfig {
        profile: "test".to_string(),
        workflow: WorkflowConfig {
            callback_base_url: "http://ydms.test".to_string(),
            pdms_base_url: "http://pdms.test".to_string(),
            ..WorkflowConfig::default()
        },
        batch: BatchConfig {
            default_concurrency: 2,
            sync_default_concurrency: 2,
            max_concurrency: 4,
        },
        ..AppConfig::default()
    }
}

/// Seed an enabled, manually created definition.
pub async fn seed_definition(
    db: &DatabaseConnection,
    workflow_key: &str,
    workflow_type: &str,
) -> workflow_definition::Model {
    WorkflowDefinitionRepository::new(db.clone())
        .create(DefinitionUpsert {
            workflow_key: workflow_key.to_string(),
            name: workflow_key.replace('_', " "),
            workflow_type: workflow_type.to_string(),
            ..Default::default()
        })
        .await
        .expect("seed definition")
}

pub async fn seed_node_definition(db: &DatabaseConnection, workflow_key: &str) {
    seed_definition(db, workflow_key, WORKFLOW_TYPE_NODE).await;
}

pub async fn seed_document_definition(db: &DatabaseConnection, workflow_key: &str) {
    seed_definition(db, workflow_key, WORKFLOW_TYPE_DOCUMENT).await;
}

/// Everything a service-level test needs.
pub struct TestContext {
    pub db: DatabaseConnection,
    pub ndr: Arc<FakeNdr>,
    pub scheduler: Arc<FakeScheduler>,
    pub state: AppState,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        let db = setup_test_db().await.expect("test db");
        let ndr = Arc::new(FakeNdr::default());
        let scheduler = Arc::new(FakeScheduler::default());
        let state = AppState::new(
            Arc::new(config),
            db.clone(),
            ndr.clone(),
            Some(scheduler.clone() as Arc<dyn SchedulerClient>),
        );
        Self {
            db,
            ndr,
            scheduler,
            state,
        }
    }

    /// Context whose services run without a scheduler.
    pub async fn without_scheduler() -> Self {
        let db = setup_test_db().await.expect("test db");
        let ndr = Arc::new(FakeNdr::default());
        let state = AppState::new(Arc::new(test_config()), db.clone(), ndr.clone(), None);
        Self {
            db,
            ndr,
            scheduler: Arc::new(FakeScheduler::default()),
            state,
        }
    }
}

#[derive(Default)]
struct NdrData {
    next_node_id: i64,
    next_document_id: i64,
    nodes: BTreeMap<i64, Node>,
    documents: BTreeMap<i64, Document>,
    /// Documents bound to each node, in bind order
    bindings: BTreeMap<i64, Vec<i64>>,
    sources: BTreeMap<i64, Vec<SourceDocument>>,
    versions: BTreeMap<i64, Vec<DocumentVersion>>,
}

/// In-memory NDR store
#[derive(Default)]
pub struct FakeNdr {
    data: Mutex<NdrData>,
    failing_nodes: Mutex<HashSet<i64>>,
}

impl FakeNdr {
    fn data(&self) -> std::sync::MutexGuard<'_, NdrData> {
        self.data.lock().unwrap()
    }

    pub fn add_node(&self, name: &str, parent_id: Option<i64>) -> i64 {
        let mut data = self.data();
        data.next_node_id += 1;
        let id = data.next_node_id;
        let position = data
            .nodes
            .values()
            .filter(|node| node.parent_id == parent_id)
            .map(|node| node.position)
            .max()
            .unwrap_or(0)
            + 1;
        data.nodes.insert(
            id,
            Node {
                id,
                name: name.to_string(),
                parent_id,
                position,
                path: None,
                deleted_at: None,
            },
        );
        id
    }

    pub fn soft_delete_node(&self, node_id: i64) {
        if let Some(node) = self.data().nodes.get_mut(&node_id) {
            node.deleted_at = Some(Utc::now());
        }
    }

    pub fn node(&self, node_id: i64) -> Option<Node> {
        self.data().nodes.get(&node_id).cloned()
    }

    /// Add a document bound to `node_id`.
    pub fn add_document(
        &self,
        node_id: i64,
        title: &str,
        doc_type: &str,
        metadata: JsonValue,
    ) -> i64 {
        let mut data = self.data();
        data.next_document_id += 1;
        let id = 1000 + data.next_document_id;
        let metadata = match metadata {
            JsonValue::Object(map) => map,
            _ => Map::new(),
        };
        let document = Document {
            id,
            title: title.to_string(),
            doc_type: doc_type.to_string(),
            version: 1,
            metadata: metadata.clone(),
            deleted_at: None,
        };
        data.versions.insert(
            id,
            vec![DocumentVersion {
                document_id: id,
                version_number: 1,
                title: title.to_string(),
                content: JsonValue::Null,
                metadata,
                change_message: Some("created".to_string()),
                created_at: Some(Utc::now()),
            }],
        );
        data.documents.insert(id, document);
        data.bindings.entry(node_id).or_default().push(id);
        id
    }

    /// Add a document bound to `node_id` and mark it as one of its sources.
    pub fn add_source(&self, node_id: i64, title: &str, doc_type: &str) -> i64 {
        let id = self.add_document(node_id, title, doc_type, JsonValue::Null);
        self.data()
            .sources
            .entry(node_id)
            .or_default()
            .push(SourceDocument {
                document_id: id,
                title: title.to_string(),
                doc_type: doc_type.to_string(),
            });
        id
    }

    pub fn document(&self, doc_id: i64) -> Option<Document> {
        self.data().documents.get(&doc_id).cloned()
    }

    /// Make every source-document lookup for `node_id` fail.
    pub fn fail_node(&self, node_id: i64) {
        self.failing_nodes.lock().unwrap().insert(node_id);
    }

    fn node_not_found(node_id: i64) -> ClientError {
        ClientError::not_found(format!("node {}", node_id))
    }

    fn document_not_found(doc_id: i64) -> ClientError {
        ClientError::not_found(format!("document {}", doc_id))
    }
}

#[async_trait]
impl NdrClient for FakeNdr {
    async fn get_node(&self, _meta: &RequestMeta, node_id: i64) -> Result<Node, ClientError> {
        self.node(node_id)
            .ok_or_else(|| Self::node_not_found(node_id))
    }

    async fn list_children(
        &self,
        _meta: &RequestMeta,
        node_id: i64,
    ) -> Result<Vec<Node>, ClientError> {
        let data = self.data();
        if !data.nodes.contains_key(&node_id) {
            return Err(Self::node_not_found(node_id));
        }
        Ok(data
            .nodes
            .values()
            .filter(|node| node.parent_id == Some(node_id))
            .cloned()
            .collect())
    }

    async fn list_nodes(
        &self,
        _meta: &RequestMeta,
        include_deleted: bool,
    ) -> Result<Vec<Node>, ClientError> {
        Ok(self
            .data()
            .nodes
            .values()
            .filter(|node| include_deleted || !node.is_deleted())
            .cloned()
            .collect())
    }

    async fn create_node(
        &self,
        _meta: &RequestMeta,
        request: &CreateNodeRequest,
    ) -> Result<Node, ClientError> {
        let id = self.add_node(&request.name, request.parent_id);
        let mut data = self.data();
        let node = data
            .nodes
            .get_mut(&id)
            .ok_or_else(|| Self::node_not_found(id))?;
        if let Some(position) = request.position {
            node.position = position;
        }
        Ok(node.clone())
    }

    async fn delete_node(&self, _meta: &RequestMeta, node_id: i64) -> Result<(), ClientError> {
        if self.node(node_id).is_none() {
            return Err(Self::node_not_found(node_id));
        }
        self.soft_delete_node(node_id);
        Ok(())
    }

    async fn restore_node(&self, _meta: &RequestMeta, node_id: i64) -> Result<Node, ClientError> {
        let mut data = self.data();
        let node = data
            .nodes
            .get_mut(&node_id)
            .ok_or_else(|| Self::node_not_found(node_id))?;
        node.deleted_at = None;
        Ok(node.clone())
    }

    async fn list_node_documents(
        &self,
        _meta: &RequestMeta,
        node_id: i64,
        query: &NodeDocumentsQuery,
    ) -> Result<DocumentPage, ClientError> {
        let data = self.data();
        let all: Vec<Document> = data
            .bindings
            .get(&node_id)
            .into_iter()
            .flatten()
            .filter_map(|id| data.documents.get(id).cloned())
            .collect();
        let start = ((query.page.max(1) - 1) * query.size) as usize;
        let items = all
            .iter()
            .skip(start)
            .take(query.size as usize)
            .cloned()
            .collect();
        Ok(DocumentPage {
            items,
            total: all.len() as i64,
            page: query.page,
            size: query.size,
        })
    }

    async fn list_source_documents(
        &self,
        _meta: &RequestMeta,
        node_id: i64,
    ) -> Result<Vec<SourceDocument>, ClientError> {
        if self.failing_nodes.lock().unwrap().contains(&node_id) {
            return Err(ClientError::Http {
                status: 503,
                body: Some("ndr unavailable".to_string()),
            });
        }
        Ok(self
            .data()
            .sources
            .get(&node_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_document(
        &self,
        _meta: &RequestMeta,
        doc_id: i64,
    ) -> Result<Document, ClientError> {
        self.document(doc_id)
            .ok_or_else(|| Self::document_not_found(doc_id))
    }

    async fn create_document(
        &self,
        _meta: &RequestMeta,
        request: &CreateDocumentRequest,
    ) -> Result<Document, ClientError> {
        let mut data = self.data();
        data.next_document_id += 1;
        let id = 1000 + data.next_document_id;
        let document = Document {
            id,
            title: request.title.clone(),
            doc_type: request.doc_type.clone(),
            version: 1,
            metadata: request.metadata.clone(),
            deleted_at: None,
        };
        data.documents.insert(id, document.clone());
        Ok(document)
    }

    async fn update_document(
        &self,
        _meta: &RequestMeta,
        doc_id: i64,
        update: &DocumentUpdate,
    ) -> Result<Document, ClientError> {
        let mut data = self.data();
        let document = data
            .documents
            .get_mut(&doc_id)
            .ok_or_else(|| Self::document_not_found(doc_id))?;

        let mut metadata = JsonValue::Object(std::mem::take(&mut document.metadata));
        if let Some(patch) = update.to_merge_patch().get("metadata") {
            apply_merge_patch(&mut metadata, patch);
        }
        document.metadata = match metadata {
            JsonValue::Object(map) => map,
            _ => Map::new(),
        };
        if let Some(title) = &update.title {
            document.title = title.clone();
        }
        document.version += 1;

        let updated = document.clone();
        data.versions
            .entry(doc_id)
            .or_default()
            .push(DocumentVersion {
                document_id: doc_id,
                version_number: updated.version,
                title: updated.title.clone(),
                content: JsonValue::Null,
                metadata: updated.metadata.clone(),
                change_message: None,
                created_at: Some(Utc::now()),
            });
        Ok(updated)
    }

    async fn bind_document(
        &self,
        _meta: &RequestMeta,
        node_id: i64,
        doc_id: i64,
    ) -> Result<(), ClientError> {
        let mut data = self.data();
        let bound = data.bindings.entry(node_id).or_default();
        if !bound.contains(&doc_id) {
            bound.push(doc_id);
        }
        Ok(())
    }

    async fn unbind_document(
        &self,
        _meta: &RequestMeta,
        node_id: i64,
        doc_id: i64,
    ) -> Result<(), ClientError> {
        if let Some(bound) = self.data().bindings.get_mut(&node_id) {
            bound.retain(|id| *id != doc_id);
        }
        Ok(())
    }

    async fn list_document_versions(
        &self,
        _meta: &RequestMeta,
        doc_id: i64,
    ) -> Result<Vec<DocumentVersion>, ClientError> {
        self.data()
            .versions
            .get(&doc_id)
            .cloned()
            .ok_or_else(|| Self::document_not_found(doc_id))
    }

    async fn get_document_version(
        &self,
        _meta: &RequestMeta,
        doc_id: i64,
        version_number: i64,
    ) -> Result<DocumentVersion, ClientError> {
        self.data()
            .versions
            .get(&doc_id)
            .and_then(|versions| {
                versions
                    .iter()
                    .find(|v| v.version_number == version_number)
                    .cloned()
            })
            .ok_or_else(|| {
                ClientError::not_found(format!("document {} version {}", doc_id, version_number))
            })
    }
}

/// A flow run the fake scheduler accepted
#[derive(Debug, Clone)]
pub struct RecordedFlowRun {
    pub flow_run_id: String,
    pub deployment_id: String,
    pub parameters: Map<String, JsonValue>,
}

/// Scheduler fake that accepts every deployment lookup and records flow runs
#[derive(Default)]
pub struct FakeScheduler {
    deployments: Mutex<Vec<Deployment>>,
    flow_runs: Mutex<Vec<RecordedFlowRun>>,
    cancelled: Mutex<Vec<String>>,
    fail_submissions: AtomicBool,
    counter: AtomicUsize,
}

impl FakeScheduler {
    pub fn set_deployments(&self, deployments: Vec<Deployment>) {
        *self.deployments.lock().unwrap() = deployments;
    }

    pub fn fail_submissions(&self, fail: bool) {
        self.fail_submissions.store(fail, Ordering::SeqCst);
    }

    pub fn flow_runs(&self) -> Vec<RecordedFlowRun> {
        self.flow_runs.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }
}

pub fn deployment(flow_name: &str, name: &str, tags: &[&str]) -> Deployment {
    Deployment {
        id: format!("dep-{}-{}", flow_name, name),
        name: name.to_string(),
        flow_name: flow_name.to_string(),
        flow_id: Some(format!("flow-{}", flow_name)),
        description: Some(format!("{} flow", flow_name)),
        tags: tags.iter().map(|tag| tag.to_string()).collect(),
        parameter_openapi_schema: None,
    }
}

#[async_trait]
impl SchedulerClient for FakeScheduler {
    async fn get_deployment_by_name(
        &self,
        workflow_key: &str,
        deployment_name: &str,
    ) -> Result<Deployment, ClientError> {
        let flow_name = flow_name_for(workflow_key);
        let known = self
            .deployments
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.flow_name == flow_name && d.name == deployment_name)
            .cloned();
        Ok(known.unwrap_or_else(|| deployment(&flow_name, deployment_name, &[])))
    }

    async fn create_flow_run(
        &self,
        deployment_id: &str,
        parameters: Map<String, JsonValue>,
    ) -> Result<FlowRun, ClientError> {
        if self.fail_submissions.load(Ordering::SeqCst) {
            return Err(ClientError::Http {
                status: 500,
                body: Some("prefect is down".to_string()),
            });
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let flow_run_id = format!("flow-run-{}", n);
        self.flow_runs.lock().unwrap().push(RecordedFlowRun {
            flow_run_id: flow_run_id.clone(),
            deployment_id: deployment_id.to_string(),
            parameters,
        });
        Ok(FlowRun {
            id: flow_run_id,
            name: None,
            deployment_id: Some(deployment_id.to_string()),
        })
    }

    async fn list_deployments(&self) -> Result<Vec<Deployment>, ClientError> {
        Ok(self.deployments.lock().unwrap().clone())
    }

    async fn cancel_flow_run(&self, flow_run_id: &str) -> Result<(), ClientError> {
        self.cancelled.lock().unwrap().push(flow_run_id.to_string());
        Ok(())
    }
}
