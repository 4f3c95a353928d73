//! NDR node/document store client
//!
//! Categories (nodes) and documents are owned by NDR. This module defines the
//! wire types, the [`NdrClient`] trait the services depend on, and a
//! reqwest-backed implementation.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, header::CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::debug;
use url::Url;
use utoipa::ToSchema;

use crate::auth::RequestMeta;
use crate::clients::{ClientError, check_status, decode_json};
use crate::merge_patch::MetadataPatch;

/// Category node as stored in NDR
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Node {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<i64>,
    /// 1-based position among siblings
    #[serde(default)]
    pub position: i32,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Node {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Document as stored in NDR
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Document {
    pub id: i64,
    pub title: String,
    #[serde(rename = "type", default)]
    pub doc_type: String,
    /// Current version number
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub metadata: Map<String, JsonValue>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Source-document binding of a node: the inputs of node workflows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SourceDocument {
    pub document_id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type", default)]
    pub doc_type: String,
}

/// Page of documents returned by the node document listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentPage {
    pub items: Vec<Document>,
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub size: u32,
}

/// Query for [`NdrClient::list_node_documents`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeDocumentsQuery {
    pub include_descendants: bool,
    pub page: u32,
    pub size: u32,
}

impl NodeDocumentsQuery {
    /// Documents bound directly to the node, first page.
    pub fn direct(size: u32) -> Self {
        Self {
            include_descendants: false,
            page: 1,
            size,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateNodeRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateDocumentRequest {
    pub title: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub content: JsonValue,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub metadata: Map<String, JsonValue>,
}

/// Partial document update, sent as an RFC 7396 merge patch.
///
/// Metadata keys not present in `metadata` are left untouched; keys mapped to
/// [`MetadataPatch::Remove`] are deleted upstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DocumentUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<JsonValue>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, MetadataPatch>,
}

impl DocumentUpdate {
    pub fn metadata(key: impl Into<String>, patch: MetadataPatch) -> Self {
        let mut update = Self::default();
        update.metadata.insert(key.into(), patch);
        update
    }

    /// Merge patch document for this update.
    pub fn to_merge_patch(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or_else(|_| JsonValue::Object(Map::new()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DocumentVersion {
    pub document_id: i64,
    pub version_number: i64,
    pub title: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub content: JsonValue,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub metadata: Map<String, JsonValue>,
    #[serde(default)]
    pub change_message: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Operations the service needs from the NDR store
#[async_trait]
pub trait NdrClient: Send + Sync {
    async fn get_node(&self, meta: &RequestMeta, node_id: i64) -> Result<Node, ClientError>;

    /// Direct children, including soft-deleted ones.
    async fn list_children(&self, meta: &RequestMeta, node_id: i64)
    -> Result<Vec<Node>, ClientError>;

    async fn has_children(&self, meta: &RequestMeta, node_id: i64) -> Result<bool, ClientError> {
        let children = self.list_children(meta, node_id).await?;
        Ok(children.iter().any(|child| !child.is_deleted()))
    }

    /// Flat listing of every node.
    async fn list_nodes(
        &self,
        meta: &RequestMeta,
        include_deleted: bool,
    ) -> Result<Vec<Node>, ClientError>;

    async fn create_node(
        &self,
        meta: &RequestMeta,
        request: &CreateNodeRequest,
    ) -> Result<Node, ClientError>;

    /// Soft delete.
    async fn delete_node(&self, meta: &RequestMeta, node_id: i64) -> Result<(), ClientError>;

    async fn restore_node(&self, meta: &RequestMeta, node_id: i64) -> Result<Node, ClientError>;

    async fn list_node_documents(
        &self,
        meta: &RequestMeta,
        node_id: i64,
        query: &NodeDocumentsQuery,
    ) -> Result<DocumentPage, ClientError>;

    async fn list_source_documents(
        &self,
        meta: &RequestMeta,
        node_id: i64,
    ) -> Result<Vec<SourceDocument>, ClientError>;

    async fn get_document(&self, meta: &RequestMeta, doc_id: i64)
    -> Result<Document, ClientError>;

    async fn create_document(
        &self,
        meta: &RequestMeta,
        request: &CreateDocumentRequest,
    ) -> Result<Document, ClientError>;

    async fn update_document(
        &self,
        meta: &RequestMeta,
        doc_id: i64,
        update: &DocumentUpdate,
    ) -> Result<Document, ClientError>;

    async fn bind_document(
        &self,
        meta: &RequestMeta,
        node_id: i64,
        doc_id: i64,
    ) -> Result<(), ClientError>;

    async fn unbind_document(
        &self,
        meta: &RequestMeta,
        node_id: i64,
        doc_id: i64,
    ) -> Result<(), ClientError>;

    async fn list_document_versions(
        &self,
        meta: &RequestMeta,
        doc_id: i64,
    ) -> Result<Vec<DocumentVersion>, ClientError>;

    async fn get_document_version(
        &self,
        meta: &RequestMeta,
        doc_id: i64,
        version_number: i64,
    ) -> Result<DocumentVersion, ClientError>;
}

/// NDR client over HTTP
#[derive(Debug, Clone)]
pub struct HttpNdrClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpNdrClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let parsed = Url::parse(base_url)
            .map_err(|e| ClientError::Configuration(format!("invalid NDR base url: {}", e)))?;
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    fn request(&self, builder: RequestBuilder, meta: &RequestMeta) -> RequestBuilder {
        let mut builder = builder.header("x-user-role", meta.role.as_str());
        if let Some(api_key) = &self.api_key {
            builder = builder.header("x-api-key", api_key);
        }
        if let Some(user_id) = meta.user_id {
            builder = builder.header("x-user-id", user_id.to_string());
        }
        builder
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        meta: &RequestMeta,
        path: &str,
        resource: impl FnOnce() -> String,
    ) -> Result<T, ClientError> {
        debug!(path, "NDR GET");
        let response = self
            .request(self.client.get(self.url(path)), meta)
            .send()
            .await?;
        decode_json(check_status(response, resource).await?).await
    }
}

#[async_trait]
impl NdrClient for HttpNdrClient {
    async fn get_node(&self, meta: &RequestMeta, node_id: i64) -> Result<Node, ClientError> {
        self.get_json(meta, &format!("/nodes/{}", node_id), || {
            format!("node {}", node_id)
        })
        .await
    }

    async fn list_children(
        &self,
        meta: &RequestMeta,
        node_id: i64,
    ) -> Result<Vec<Node>, ClientError> {
        self.get_json(meta, &format!("/nodes/{}/children", node_id), || {
            format!("node {}", node_id)
        })
        .await
    }

    async fn list_nodes(
        &self,
        meta: &RequestMeta,
        include_deleted: bool,
    ) -> Result<Vec<Node>, ClientError> {
        self.get_json(
            meta,
            &format!("/nodes?include_deleted={}", include_deleted),
            || "nodes".to_string(),
        )
        .await
    }

    async fn create_node(
        &self,
        meta: &RequestMeta,
        request: &CreateNodeRequest,
    ) -> Result<Node, ClientError> {
        let response = self
            .request(self.client.post(self.url("/nodes")), meta)
            .json(request)
            .send()
            .await?;
        let parent = request.parent_id;
        decode_json(
            check_status(response, || format!("parent node {:?}", parent)).await?,
        )
        .await
    }

    async fn delete_node(&self, meta: &RequestMeta, node_id: i64) -> Result<(), ClientError> {
        let response = self
            .request(
                self.client.delete(self.url(&format!("/nodes/{}", node_id))),
                meta,
            )
            .send()
            .await?;
        check_status(response, || format!("node {}", node_id)).await?;
        Ok(())
    }

    async fn restore_node(&self, meta: &RequestMeta, node_id: i64) -> Result<Node, ClientError> {
        let response = self
            .request(
                self.client
                    .post(self.url(&format!("/nodes/{}/restore", node_id))),
                meta,
            )
            .send()
            .await?;
        decode_json(check_status(response, || format!("node {}", node_id)).await?).await
    }

    async fn list_node_documents(
        &self,
        meta: &RequestMeta,
        node_id: i64,
        query: &NodeDocumentsQuery,
    ) -> Result<DocumentPage, ClientError> {
        self.get_json(
            meta,
            &format!(
                "/nodes/{}/documents?include_descendants={}&page={}&size={}",
                node_id, query.include_descendants, query.page, query.size
            ),
            || format!("node {}", node_id),
        )
        .await
    }

    async fn list_source_documents(
        &self,
        meta: &RequestMeta,
        node_id: i64,
    ) -> Result<Vec<SourceDocument>, ClientError> {
        self.get_json(meta, &format!("/nodes/{}/source-documents", node_id), || {
            format!("node {}", node_id)
        })
        .await
    }

    async fn get_document(&self, meta: &RequestMeta, doc_id: i64) -> Result<Document, ClientError> {
        self.get_json(meta, &format!("/documents/{}", doc_id), || {
            format!("document {}", doc_id)
        })
        .await
    }

    async fn create_document(
        &self,
        meta: &RequestMeta,
        request: &CreateDocumentRequest,
    ) -> Result<Document, ClientError> {
        let response = self
            .request(self.client.post(self.url("/documents")), meta)
            .json(request)
            .send()
            .await?;
        decode_json(check_status(response, || "documents".to_string()).await?).await
    }

    async fn update_document(
        &self,
        meta: &RequestMeta,
        doc_id: i64,
        update: &DocumentUpdate,
    ) -> Result<Document, ClientError> {
        let body = serde_json::to_vec(&update.to_merge_patch())
            .map_err(|e| ClientError::MalformedResponse(e.to_string()))?;
        let response = self
            .request(
                self.client
                    .patch(self.url(&format!("/documents/{}", doc_id)))
                    .header(CONTENT_TYPE, "application/merge-patch+json")
                    .body(body),
                meta,
            )
            .send()
            .await?;
        decode_json(check_status(response, || format!("document {}", doc_id)).await?).await
    }

    async fn bind_document(
        &self,
        meta: &RequestMeta,
        node_id: i64,
        doc_id: i64,
    ) -> Result<(), ClientError> {
        let response = self
            .request(
                self.client
                    .post(self.url(&format!("/nodes/{}/bind/{}", node_id, doc_id))),
                meta,
            )
            .send()
            .await?;
        check_status(response, || format!("node {} or document {}", node_id, doc_id)).await?;
        Ok(())
    }

    async fn unbind_document(
        &self,
        meta: &RequestMeta,
        node_id: i64,
        doc_id: i64,
    ) -> Result<(), ClientError> {
        let response = self
            .request(
                self.client
                    .delete(self.url(&format!("/nodes/{}/bind/{}", node_id, doc_id))),
                meta,
            )
            .send()
            .await?;
        check_status(response, || format!("node {} or document {}", node_id, doc_id)).await?;
        Ok(())
    }

    async fn list_document_versions(
        &self,
        meta: &RequestMeta,
        doc_id: i64,
    ) -> Result<Vec<DocumentVersion>, ClientError> {
        self.get_json(meta, &format!("/documents/{}/versions", doc_id), || {
            format!("document {}", doc_id)
        })
        .await
    }

    async fn get_document_version(
        &self,
        meta: &RequestMeta,
        doc_id: i64,
        version_number: i64,
    ) -> Result<DocumentVersion, ClientError> {
        self.get_json(
            meta,
            &format!("/documents/{}/versions/{}", doc_id, version_number),
            || format!("version {} of document {}", version_number, doc_id),
        )
        .await
    }
}
