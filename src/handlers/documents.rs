//! # Document Handlers
//!
//! Version history and cross-document references. Content editing stays with
//! NDR; these endpoints only read versions and patch the `references` key.

use axum::{
    extract::{Path, State},
    response::Json,
};

use crate::auth::{CallerHeaders, RequestMeta, ensure_can_edit};
use crate::clients::ndr::{Document, DocumentVersion};
use crate::error::ApiError;
use crate::server::AppState;
use crate::services::documents::AddReferenceRequest;

/// Versions of a document, newest first
#[utoipa::path(
    get,
    path = "/api/v1/documents/{id}/versions",
    security(("bearer_auth" = [])),
    params(("id" = i64, Path, description = "Document id"), CallerHeaders),
    responses(
        (status = 200, description = "Document versions", body = Vec<DocumentVersion>),
        (status = 404, description = "Document not found", body = ApiError)
    ),
    tag = "documents"
)]
pub async fn list_versions(
    State(state): State<AppState>,
    meta: RequestMeta,
    Path(document_id): Path<i64>,
) -> Result<Json<Vec<DocumentVersion>>, ApiError> {
    Ok(Json(state.documents.list_versions(&meta, document_id).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/documents/{id}/versions/{version}",
    security(("bearer_auth" = [])),
    params(
        ("id" = i64, Path, description = "Document id"),
        ("version" = i64, Path, description = "Version number, starting at 1"),
        CallerHeaders
    ),
    responses(
        (status = 200, description = "Document version", body = DocumentVersion),
        (status = 400, description = "Version number out of range", body = ApiError),
        (status = 404, description = "Version not found", body = ApiError)
    ),
    tag = "documents"
)]
pub async fn get_version(
    State(state): State<AppState>,
    meta: RequestMeta,
    Path((document_id, version)): Path<(i64, i64)>,
) -> Result<Json<DocumentVersion>, ApiError> {
    Ok(Json(
        state
            .documents
            .get_version(&meta, document_id, version)
            .await?,
    ))
}

/// Add a reference to another document
#[utoipa::path(
    post,
    path = "/api/v1/documents/{id}/references",
    security(("bearer_auth" = [])),
    params(("id" = i64, Path, description = "Referencing document id"), CallerHeaders),
    request_body = AddReferenceRequest,
    responses(
        (status = 200, description = "Updated document", body = Document),
        (status = 400, description = "Self reference or duplicate", body = ApiError),
        (status = 403, description = "Caller may not edit documents", body = ApiError),
        (status = 404, description = "Document not found", body = ApiError)
    ),
    tag = "documents"
)]
pub async fn add_reference(
    State(state): State<AppState>,
    meta: RequestMeta,
    Path(document_id): Path<i64>,
    Json(request): Json<AddReferenceRequest>,
) -> Result<Json<Document>, ApiError> {
    ensure_can_edit(&meta)?;
    Ok(Json(
        state
            .documents
            .add_reference(&meta, document_id, request.document_id)
            .await?,
    ))
}

#[utoipa::path(
    delete,
    path = "/api/v1/documents/{id}/references/{ref_id}",
    security(("bearer_auth" = [])),
    params(
        ("id" = i64, Path, description = "Referencing document id"),
        ("ref_id" = i64, Path, description = "Referenced document id"),
        CallerHeaders
    ),
    responses(
        (status = 200, description = "Updated document", body = Document),
        (status = 403, description = "Caller may not edit documents", body = ApiError),
        (status = 404, description = "Reference not found", body = ApiError)
    ),
    tag = "documents"
)]
pub async fn remove_reference(
    State(state): State<AppState>,
    meta: RequestMeta,
    Path((document_id, referenced_id)): Path<(i64, i64)>,
) -> Result<Json<Document>, ApiError> {
    ensure_can_edit(&meta)?;
    Ok(Json(
        state
            .documents
            .remove_reference(&meta, document_id, referenced_id)
            .await?,
    ))
}
