//! # Tests for Handlers

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    response::Json,
};
use sea_orm::{Database, DatabaseConnection};
use tower::ServiceExt;
use utoipa::OpenApi;

use crate::config::AppConfig;
use crate::handlers::{healthz, readyz, root};
use crate::server::{ApiDoc, AppState, create_app};

fn state_with(config: AppConfig, db: DatabaseConnection) -> AppState {
    AppState::from_config(Arc::new(config), db).expect("state builds from default config")
}

#[tokio::test]
async fn test_root_handler_returns_service_info() {
    let Json(info) = root().await;

    assert_eq!(info.service, "ydms");
    assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_healthz_is_ok() {
    let Json(status) = healthz().await;
    assert_eq!(status.status, "ok");
}

#[tokio::test]
async fn test_readyz_reports_unavailable_database() {
    let state = state_with(AppConfig::default(), DatabaseConnection::default());

    let error = readyz(State(state)).await.expect_err("disconnected db");

    assert_eq!(error.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(&*error.code, "SERVICE_UNAVAILABLE");
}

#[tokio::test]
async fn test_readyz_with_live_database() {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    let state = state_with(AppConfig::default(), db);

    let Json(status) = readyz(State(state)).await.unwrap();
    assert_eq!(status.status, "ok");
}

#[tokio::test]
async fn test_api_routes_require_bearer_token() {
    let config = AppConfig {
        api_keys: vec!["secret-key".to_string()],
        ..Default::default()
    };
    let app = create_app(state_with(config, DatabaseConnection::default()));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/categories/tree")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn test_callbacks_skip_bearer_but_check_webhook_secret() {
    let config = AppConfig {
        api_keys: vec!["secret-key".to_string()],
        webhook_secret: Some("hook".to_string()),
        ..Default::default()
    };
    let app = create_app(state_with(config, DatabaseConnection::default()));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/sync/callback")
                .header("content-type", "application/json")
                .header("X-Webhook-Secret", "wrong")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_proofreader_cannot_create_category() {
    let app = create_app(state_with(AppConfig::default(), DatabaseConnection::default()));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/categories")
                .header("content-type", "application/json")
                .header("X-User-Id", "9")
                .header("X-User-Role", "proofreader")
                .body(Body::from(r#"{"name":"第一单元"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[test]
fn test_openapi_lists_core_paths() {
    let doc = ApiDoc::openapi();
    let paths = &doc.paths.paths;

    for path in [
        "/api/v1/nodes/{id}/workflows/{key}/runs",
        "/api/v1/workflows/callback/{run_id}",
        "/api/v1/nodes/{id}/batch-workflows/execute",
        "/api/v1/documents/{id}/sync",
        "/api/v1/sync/callback",
        "/api/v1/categories/tree",
    ] {
        assert!(paths.contains_key(path), "missing {}", path);
    }
    assert!(
        doc.components
            .as_ref()
            .is_some_and(|c| c.security_schemes.contains_key("bearer_auth"))
    );
}
