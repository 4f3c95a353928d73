//! # Category Handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};

use crate::auth::{CallerHeaders, RequestMeta, ensure_can_edit};
use crate::clients::ndr::Node;
use crate::error::ApiError;
use crate::server::AppState;
use crate::services::categories::{CategoryTreeNode, CreateCategoryRequest};

/// Live category tree
#[utoipa::path(
    get,
    path = "/api/v1/categories/tree",
    security(("bearer_auth" = [])),
    params(CallerHeaders),
    responses(
        (status = 200, description = "Category forest ordered by position", body = Vec<CategoryTreeNode>),
        (status = 502, description = "NDR unavailable", body = ApiError)
    ),
    tag = "categories"
)]
pub async fn category_tree(
    State(state): State<AppState>,
    meta: RequestMeta,
) -> Result<Json<Vec<CategoryTreeNode>>, ApiError> {
    Ok(Json(state.categories.tree(&meta).await?))
}

/// Create a category as the last child of its parent
#[utoipa::path(
    post,
    path = "/api/v1/categories",
    security(("bearer_auth" = [])),
    params(CallerHeaders),
    request_body = CreateCategoryRequest,
    responses(
        (status = 201, description = "Category created", body = Node),
        (status = 400, description = "Empty name or deleted parent", body = ApiError),
        (status = 403, description = "Caller may not edit categories", body = ApiError)
    ),
    tag = "categories"
)]
pub async fn create_category(
    State(state): State<AppState>,
    meta: RequestMeta,
    Json(request): Json<CreateCategoryRequest>,
) -> Result<(StatusCode, Json<Node>), ApiError> {
    ensure_can_edit(&meta)?;
    let node = state.categories.create(&meta, request).await?;
    Ok((StatusCode::CREATED, Json(node)))
}

/// Move a category to the trash
#[utoipa::path(
    delete,
    path = "/api/v1/categories/{id}",
    security(("bearer_auth" = [])),
    params(("id" = i64, Path, description = "Category id"), CallerHeaders),
    responses(
        (status = 204, description = "Category deleted"),
        (status = 400, description = "Category already deleted", body = ApiError),
        (status = 403, description = "Caller may not edit categories", body = ApiError),
        (status = 404, description = "Category not found", body = ApiError)
    ),
    tag = "categories"
)]
pub async fn delete_category(
    State(state): State<AppState>,
    meta: RequestMeta,
    Path(node_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    ensure_can_edit(&meta)?;
    state.categories.delete(&meta, node_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Deleted categories, most recent first
#[utoipa::path(
    get,
    path = "/api/v1/categories/trash",
    security(("bearer_auth" = [])),
    params(CallerHeaders),
    responses(
        (status = 200, description = "Trashed categories", body = Vec<Node>)
    ),
    tag = "categories"
)]
pub async fn category_trash(
    State(state): State<AppState>,
    meta: RequestMeta,
) -> Result<Json<Vec<Node>>, ApiError> {
    Ok(Json(state.categories.trash(&meta).await?))
}

/// Restore a category from the trash
#[utoipa::path(
    post,
    path = "/api/v1/categories/{id}/restore",
    security(("bearer_auth" = [])),
    params(("id" = i64, Path, description = "Category id"), CallerHeaders),
    responses(
        (status = 200, description = "Category restored", body = Node),
        (status = 400, description = "Not deleted, or parent still deleted", body = ApiError),
        (status = 403, description = "Caller may not edit categories", body = ApiError),
        (status = 404, description = "Category not found", body = ApiError)
    ),
    tag = "categories"
)]
pub async fn restore_category(
    State(state): State<AppState>,
    meta: RequestMeta,
    Path(node_id): Path<i64>,
) -> Result<Json<Node>, ApiError> {
    ensure_can_edit(&meta)?;
    Ok(Json(state.categories.restore(&meta, node_id).await?))
}
