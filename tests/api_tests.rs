//! End-to-end HTTP tests against the full router.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value as JsonValue, json};
use tower::ServiceExt;

use ydms::server::create_app;

#[path = "test_utils/mod.rs"]
mod test_utils;

use test_utils::{TestContext, seed_node_definition};

async fn send(
    ctx: &TestContext,
    method: &str,
    uri: &str,
    role: Option<&str>,
    body: Option<JsonValue>,
) -> (StatusCode, JsonValue) {
    send_as(ctx, method, uri, role.map(|role| ("7", role)), body).await
}

async fn send_as(
    ctx: &TestContext,
    method: &str,
    uri: &str,
    caller: Option<(&str, &str)>,
    body: Option<JsonValue>,
) -> (StatusCode, JsonValue) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some((user_id, role)) = caller {
        builder = builder
            .header("X-User-Id", user_id)
            .header("X-User-Role", role);
    }
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = create_app(ctx.state.clone())
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        JsonValue::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn test_trigger_then_callback_over_http() {
    let ctx = TestContext::new().await;
    seed_node_definition(&ctx.db, "outline").await;
    let node = ctx.ndr.add_node("第一课", None);

    let (status, body) = send(
        &ctx,
        "POST",
        &format!("/api/v1/nodes/{}/workflows/outline/runs", node),
        Some("course_admin"),
        Some(json!({ "parameters": { "depth": 2 } })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], json!("running"));
    let run_id = body["run_id"].as_i64().unwrap();

    let (status, body) = send(
        &ctx,
        "POST",
        &format!("/api/v1/workflows/callback/{}", run_id),
        None,
        Some(json!({ "status": "success", "result": { "ok": true } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["applied"], json!(true));

    let (status, body) = send(
        &ctx,
        "GET",
        &format!("/api/v1/workflows/runs/{}", run_id),
        Some("course_admin"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("success"));
    assert_eq!(body["is_zombie"], json!(false));
}

#[tokio::test]
async fn test_proofreader_cannot_trigger_workflows() {
    let ctx = TestContext::new().await;
    seed_node_definition(&ctx.db, "outline").await;
    let node = ctx.ndr.add_node("第一课", None);

    let (status, body) = send(
        &ctx,
        "POST",
        &format!("/api/v1/nodes/{}/workflows/outline/runs", node),
        Some("proofreader"),
        Some(json!({})),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], json!("FORBIDDEN"));
    assert!(ctx.scheduler.flow_runs().is_empty());
}

#[tokio::test]
async fn test_runs_are_private_to_their_creator() {
    let ctx = TestContext::new().await;
    seed_node_definition(&ctx.db, "outline").await;
    let node = ctx.ndr.add_node("第一课", None);
    let (_, body) = send(
        &ctx,
        "POST",
        &format!("/api/v1/nodes/{}/workflows/outline/runs", node),
        Some("course_admin"),
        Some(json!({})),
    )
    .await;
    let run_uri = format!("/api/v1/workflows/runs/{}", body["run_id"]);

    let (status, body) = send_as(&ctx, "GET", &run_uri, Some(("8", "course_admin")), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], json!("FORBIDDEN"));

    let (status, _) = send_as(
        &ctx,
        "POST",
        &format!("{}/cancel", run_uri),
        Some(("8", "course_admin")),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send_as(&ctx, "GET", &run_uri, Some(("1", "super_admin")), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("running"));
}

#[tokio::test]
async fn test_invalid_callback_status_is_bad_request() {
    let ctx = TestContext::new().await;
    seed_node_definition(&ctx.db, "outline").await;
    let node = ctx.ndr.add_node("第一课", None);
    let (_, body) = send(
        &ctx,
        "POST",
        &format!("/api/v1/nodes/{}/workflows/outline/runs", node),
        Some("super_admin"),
        Some(json!({})),
    )
    .await;

    let (status, body) = send(
        &ctx,
        "POST",
        &format!("/api/v1/workflows/callback/{}", body["run_id"]),
        None,
        Some(json!({ "status": "exploded" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], json!("VALIDATION_FAILED"));
}

#[tokio::test]
async fn test_stale_sync_callback_is_acknowledged() {
    let ctx = TestContext::new().await;
    let node = ctx.ndr.add_node("第一课", None);
    let doc = ctx.ndr.add_document(
        node,
        "教案",
        "lesson_plan",
        json!({ "sync_target": { "table": "lessons", "record_id": "7", "field": "body" } }),
    );

    let (status, body) = send(
        &ctx,
        "POST",
        &format!("/api/v1/documents/{}/sync", doc),
        Some("course_admin"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let event_id = body["event_id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &ctx,
        "POST",
        "/api/v1/sync/callback",
        None,
        Some(json!({ "event_id": "not-the-latest", "doc_id": doc, "status": "success" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], json!(false));
    assert!(body["message"].is_string());

    let (status, body) = send(
        &ctx,
        "POST",
        "/api/v1/sync/callback",
        None,
        Some(json!({ "event_id": event_id, "doc_id": doc, "status": "success" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], json!(true));
    assert_eq!(body["status"], json!("success"));

    let (status, body) = send(
        &ctx,
        "GET",
        &format!("/api/v1/documents/{}/sync", doc),
        Some("proofreader"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["last_status"], json!("success"));
}

#[tokio::test]
async fn test_category_tree_over_http() {
    let ctx = TestContext::new().await;
    let unit = ctx.ndr.add_node("第一单元", None);
    ctx.ndr.add_node("第一课", Some(unit));

    let (status, body) = send(
        &ctx,
        "GET",
        "/api/v1/categories/tree",
        Some("proofreader"),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["name"], json!("第一单元"));
    assert_eq!(body[0]["children"][0]["name"], json!("第一课"));
}
