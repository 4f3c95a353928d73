//! Document versions and cross-document references.
//!
//! References live in the document's `references` metadata key as a list of
//! `{document_id, title}` objects. Removing the last reference deletes the key.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::{info, instrument};
use utoipa::ToSchema;

use crate::auth::RequestMeta;
use crate::clients::NdrClient;
use crate::clients::ndr::{Document, DocumentUpdate, DocumentVersion};
use crate::error::{ServiceError, ServiceResult};
use crate::merge_patch::MetadataPatch;

pub const REFERENCES_KEY: &str = "references";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DocumentReference {
    pub document_id: i64,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AddReferenceRequest {
    pub document_id: i64,
}

/// References stored on a document. Bare ids are accepted alongside objects.
pub fn parse_references(metadata: &Map<String, JsonValue>) -> Vec<DocumentReference> {
    let Some(JsonValue::Array(items)) = metadata.get(REFERENCES_KEY) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match item {
            JsonValue::Number(id) => id.as_i64().map(|document_id| DocumentReference {
                document_id,
                title: String::new(),
            }),
            JsonValue::Object(_) => serde_json::from_value(item.clone()).ok(),
            _ => None,
        })
        .collect()
}

fn references_patch(references: &[DocumentReference]) -> MetadataPatch {
    if references.is_empty() {
        MetadataPatch::Remove
    } else {
        MetadataPatch::set(serde_json::to_value(references).unwrap_or(JsonValue::Null))
    }
}

pub struct DocumentService {
    ndr: Arc<dyn NdrClient>,
}

impl DocumentService {
    pub fn new(ndr: Arc<dyn NdrClient>) -> Self {
        Self { ndr }
    }

    /// Versions of a document, newest first.
    pub async fn list_versions(
        &self,
        meta: &RequestMeta,
        document_id: i64,
    ) -> ServiceResult<Vec<DocumentVersion>> {
        let mut versions = self
            .ndr
            .list_document_versions(meta, document_id)
            .await
            .map_err(ServiceError::ndr)?;
        versions.sort_by(|a, b| b.version_number.cmp(&a.version_number));
        Ok(versions)
    }

    pub async fn get_version(
        &self,
        meta: &RequestMeta,
        document_id: i64,
        version_number: i64,
    ) -> ServiceResult<DocumentVersion> {
        if version_number < 1 {
            return Err(ServiceError::validation("version number must be positive"));
        }
        self.ndr
            .get_document_version(meta, document_id, version_number)
            .await
            .map_err(ServiceError::ndr)
    }

    #[instrument(skip(self, meta))]
    pub async fn add_reference(
        &self,
        meta: &RequestMeta,
        document_id: i64,
        referenced_id: i64,
    ) -> ServiceResult<Document> {
        if document_id == referenced_id {
            return Err(ServiceError::validation("a document cannot reference itself"));
        }

        let document = self
            .ndr
            .get_document(meta, document_id)
            .await
            .map_err(ServiceError::ndr)?;
        let referenced = self
            .ndr
            .get_document(meta, referenced_id)
            .await
            .map_err(ServiceError::ndr)?;

        let mut references = parse_references(&document.metadata);
        if references.iter().any(|r| r.document_id == referenced_id) {
            return Err(ServiceError::validation(format!(
                "document {} already references {}",
                document_id, referenced_id
            )));
        }
        references.push(DocumentReference {
            document_id: referenced_id,
            title: referenced.title,
        });

        let updated = self
            .ndr
            .update_document(
                meta,
                document_id,
                &DocumentUpdate::metadata(REFERENCES_KEY, references_patch(&references)),
            )
            .await
            .map_err(ServiceError::ndr)?;
        info!(document_id, referenced_id, "Reference added");
        Ok(updated)
    }

    #[instrument(skip(self, meta))]
    pub async fn remove_reference(
        &self,
        meta: &RequestMeta,
        document_id: i64,
        referenced_id: i64,
    ) -> ServiceResult<Document> {
        let document = self
            .ndr
            .get_document(meta, document_id)
            .await
            .map_err(ServiceError::ndr)?;

        let mut references = parse_references(&document.metadata);
        let before = references.len();
        references.retain(|r| r.document_id != referenced_id);
        if references.len() == before {
            return Err(ServiceError::not_found(format!(
                "document {} does not reference {}",
                document_id, referenced_id
            )));
        }

        let updated = self
            .ndr
            .update_document(
                meta,
                document_id,
                &DocumentUpdate::metadata(REFERENCES_KEY, references_patch(&references)),
            )
            .await
            .map_err(ServiceError::ndr)?;
        info!(document_id, referenced_id, "Reference removed");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_references_accepts_ids_and_objects() {
        let mut metadata = Map::new();
        metadata.insert(
            REFERENCES_KEY.to_string(),
            json!([12, {"document_id": 13, "title": "教案"}, "junk"]),
        );

        let references = parse_references(&metadata);

        assert_eq!(
            references,
            vec![
                DocumentReference {
                    document_id: 12,
                    title: String::new()
                },
                DocumentReference {
                    document_id: 13,
                    title: "教案".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_empty_references_remove_the_key() {
        assert_eq!(references_patch(&[]), MetadataPatch::Remove);
        assert_eq!(
            DocumentUpdate::metadata(REFERENCES_KEY, references_patch(&[])).to_merge_patch(),
            json!({"metadata": {"references": null}})
        );
    }
}
