//! # Authentication and Authorization
//!
//! Bearer API-key authentication for the management API, shared-secret
//! verification for scheduler callbacks, and the caller identity
//! ([`RequestMeta`]) used for role checks and forwarded to NDR.

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts, Request, State},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use utoipa::{IntoParams, ToSchema};

use crate::config::AppConfig;
use crate::error::{ApiError, ServiceError, ServiceResult, unauthorized, validation_error};
use crate::server::AppState;

pub const USER_ID_HEADER: &str = "X-User-Id";
pub const USER_ROLE_HEADER: &str = "X-User-Role";
pub const WEBHOOK_SECRET_HEADER: &str = "X-Webhook-Secret";

/// Caller role as asserted by the upstream gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    SuperAdmin,
    CourseAdmin,
    Proofreader,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::SuperAdmin => "super_admin",
            UserRole::CourseAdmin => "course_admin",
            UserRole::Proofreader => "proofreader",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "super_admin" => Some(UserRole::SuperAdmin),
            "course_admin" => Some(UserRole::CourseAdmin),
            "proofreader" => Some(UserRole::Proofreader),
            _ => None,
        }
    }
}

/// Identity of the caller, threaded through services and NDR calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMeta {
    pub user_id: Option<i64>,
    pub role: UserRole,
}

impl RequestMeta {
    pub fn new(user_id: Option<i64>, role: UserRole) -> Self {
        Self { user_id, role }
    }

    pub fn is_super_admin(&self) -> bool {
        self.role == UserRole::SuperAdmin
    }

    /// Course admins and super admins may mutate categories and run workflows.
    pub fn can_edit(&self) -> bool {
        matches!(self.role, UserRole::SuperAdmin | UserRole::CourseAdmin)
    }

    /// Whether the caller may see a resource created by `owner`.
    pub fn can_view_owned_by(&self, owner: Option<i64>) -> bool {
        self.is_super_admin() || (owner.is_some() && owner == self.user_id)
    }

    fn from_headers(headers: &HeaderMap) -> Result<Self, ApiError> {
        let user_id = match headers.get(USER_ID_HEADER) {
            Some(value) => Some(
                value
                    .to_str()
                    .ok()
                    .and_then(|v| v.trim().parse::<i64>().ok())
                    .ok_or_else(|| {
                        validation_error(
                            "Invalid user header",
                            serde_json::json!({ USER_ID_HEADER: "Must be an integer" }),
                        )
                    })?,
            ),
            None => None,
        };

        let role = match headers.get(USER_ROLE_HEADER) {
            Some(value) => value
                .to_str()
                .ok()
                .and_then(UserRole::parse)
                .ok_or_else(|| {
                    validation_error(
                        "Invalid role header",
                        serde_json::json!({
                            USER_ROLE_HEADER: "Must be super_admin, course_admin or proofreader"
                        }),
                    )
                })?,
            None => UserRole::Proofreader,
        };

        Ok(Self { user_id, role })
    }
}

/// Reject callers that are not super admins.
pub fn ensure_super_admin(meta: &RequestMeta) -> ServiceResult<()> {
    if meta.is_super_admin() {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(
            "this operation requires the super_admin role".to_string(),
        ))
    }
}

/// Reject read-only callers.
pub fn ensure_can_edit(meta: &RequestMeta) -> ServiceResult<()> {
    if meta.can_edit() {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(format!(
            "role {} may not modify resources",
            meta.role.as_str()
        )))
    }
}

impl FromRef<AppState> for Arc<AppConfig> {
    fn from_ref(app_state: &AppState) -> Self {
        Arc::clone(&app_state.config)
    }
}

/// Authentication middleware that validates bearer API keys and resolves the caller
pub async fn auth_middleware(
    State(config): State<Arc<AppConfig>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let headers = request.headers();

    if !config.api_keys.is_empty() {
        let token = extract_bearer_token(headers)?;
        validate_token(&config, token)?;
    }

    let meta = RequestMeta::from_headers(headers)?;
    tracing::debug!(
        user_id = ?meta.user_id,
        role = meta.role.as_str(),
        "Authenticated request"
    );

    request.extensions_mut().insert(meta);

    Ok(next.run(request).await)
}

/// Callback routes skip bearer auth; when a webhook secret is configured the
/// caller must present it.
pub async fn webhook_secret_middleware(
    State(config): State<Arc<AppConfig>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(expected) = &config.webhook_secret {
        let presented = request
            .headers()
            .get(WEBHOOK_SECRET_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();

        let matches: bool = presented.as_bytes().ct_eq(expected.as_bytes()).into();
        if !matches {
            tracing::warn!("Rejected callback with missing or invalid webhook secret");
            return Err(unauthorized(Some("Invalid webhook secret")));
        }
    }

    Ok(next.run(request).await)
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| unauthorized(Some("Missing Authorization header")))?
        .to_str()
        .map_err(|_| unauthorized(Some("Invalid Authorization header")))?;

    header
        .strip_prefix("Bearer ")
        .ok_or_else(|| unauthorized(Some("Authorization header must use Bearer scheme")))
}

fn validate_token(config: &AppConfig, token: &str) -> Result<(), ApiError> {
    let is_valid = config
        .api_keys
        .iter()
        .any(|configured| ConstantTimeEq::ct_eq(token.as_bytes(), configured.as_bytes()).into());

    if is_valid {
        Ok(())
    } else {
        Err(unauthorized(Some("Invalid bearer token")))
    }
}

/// OpenAPI header parameters describing the caller
#[derive(Debug, Serialize, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Header)]
pub struct CallerHeaders {
    /// Numeric id of the calling user
    #[serde(rename = "X-User-Id")]
    #[param(rename = "X-User-Id", value_type = Option<i64>)]
    pub user_id: Option<String>,
    /// `super_admin`, `course_admin` or `proofreader` (default)
    #[serde(rename = "X-User-Role")]
    #[param(rename = "X-User-Role", value_type = Option<String>)]
    pub role: Option<String>,
}

impl<S> FromRequestParts<S> for RequestMeta
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<RequestMeta>() {
            Some(meta) => Ok(meta.clone()),
            None => RequestMeta::from_headers(&parts.headers),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Router,
        body::Body,
        http::{Request, StatusCode},
        routing::{get, post},
    };
    use tower::ServiceExt;

    fn create_test_config() -> Arc<AppConfig> {
        Arc::new(AppConfig {
            api_keys: vec!["test-key-123".to_string()],
            webhook_secret: Some("hook-secret".to_string()),
            ..Default::default()
        })
    }

    async fn run_middleware(config: Arc<AppConfig>, request: Request<Body>) -> Response {
        async fn handler(meta: RequestMeta) -> String {
            meta.role.as_str().to_string()
        }

        Router::new()
            .route("/test", get(handler))
            .layer(axum::middleware::from_fn_with_state(
                Arc::clone(&config),
                auth_middleware,
            ))
            .oneshot(request)
            .await
            .unwrap()
    }

    async fn run_webhook(config: Arc<AppConfig>, request: Request<Body>) -> Response {
        async fn handler() -> &'static str {
            "OK"
        }

        Router::new()
            .route("/callback", post(handler))
            .layer(axum::middleware::from_fn_with_state(
                config,
                webhook_secret_middleware,
            ))
            .oneshot(request)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn missing_auth_header_returns_401() {
        let request = Request::builder()
            .uri("/test")
            .body(Body::empty())
            .unwrap();

        let response = run_middleware(create_test_config(), request).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn invalid_auth_scheme_returns_401() {
        let request = Request::builder()
            .uri("/test")
            .header("Authorization", "Basic dGVzdDoxMjM=")
            .body(Body::empty())
            .unwrap();

        let response = run_middleware(create_test_config(), request).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn invalid_key_returns_401() {
        let request = Request::builder()
            .uri("/test")
            .header("Authorization", "Bearer wrong-key")
            .body(Body::empty())
            .unwrap();

        let response = run_middleware(create_test_config(), request).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn invalid_role_header_returns_400() {
        let request = Request::builder()
            .uri("/test")
            .header("Authorization", "Bearer test-key-123")
            .header(USER_ROLE_HEADER, "root")
            .body(Body::empty())
            .unwrap();

        let response = run_middleware(create_test_config(), request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn valid_request_passes_through_with_role() {
        let request = Request::builder()
            .uri("/test")
            .header("Authorization", "Bearer test-key-123")
            .header(USER_ID_HEADER, "7")
            .header(USER_ROLE_HEADER, "course_admin")
            .body(Body::empty())
            .unwrap();

        let response = run_middleware(create_test_config(), request).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn no_configured_keys_disables_bearer_check() {
        let config = Arc::new(AppConfig::default());
        let request = Request::builder()
            .uri("/test")
            .body(Body::empty())
            .unwrap();

        let response = run_middleware(config, request).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn webhook_secret_is_enforced() {
        let request = Request::builder()
            .method("POST")
            .uri("/callback")
            .header(WEBHOOK_SECRET_HEADER, "nope")
            .body(Body::empty())
            .unwrap();
        let response = run_webhook(create_test_config(), request).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let request = Request::builder()
            .method("POST")
            .uri("/callback")
            .header(WEBHOOK_SECRET_HEADER, "hook-secret")
            .body(Body::empty())
            .unwrap();
        let response = run_webhook(create_test_config(), request).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn role_checks() {
        let proofreader = RequestMeta::new(Some(3), UserRole::Proofreader);
        let admin = RequestMeta::new(Some(4), UserRole::CourseAdmin);
        let root = RequestMeta::new(Some(1), UserRole::SuperAdmin);

        assert!(ensure_can_edit(&proofreader).is_err());
        assert!(ensure_can_edit(&admin).is_ok());
        assert!(matches!(
            ensure_super_admin(&admin),
            Err(ServiceError::Forbidden(_))
        ));
        assert!(ensure_super_admin(&root).is_ok());

        assert!(admin.can_view_owned_by(Some(4)));
        assert!(!admin.can_view_owned_by(Some(5)));
        assert!(!admin.can_view_owned_by(None));
        assert!(root.can_view_owned_by(None));
    }
}
