//! # Error Handling
//!
//! Service-level errors ([`ServiceError`]) follow the workflow taxonomy:
//! validation, not-found, forbidden, stale callbacks, upstream and storage
//! failures. HTTP handlers convert them into a problem+json [`ApiError`]
//! carrying the request trace id.

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;

use crate::clients::ClientError;
use crate::telemetry;

/// Errors produced by the workflow, batch, sync and category services
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Bad input or an illegal state transition
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    /// A callback that no longer matches the stored attempt
    #[error("{0}")]
    StaleCallback(String),
    /// NDR or Prefect failed
    #[error("{service} error: {source}")]
    Upstream {
        service: &'static str,
        #[source]
        source: ClientError,
    },
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    pub fn validation<S: Into<String>>(message: S) -> Self {
        ServiceError::Validation(message.into())
    }

    pub fn not_found<S: Into<String>>(message: S) -> Self {
        ServiceError::NotFound(message.into())
    }

    /// Wrap an NDR client failure, keeping upstream 404s as not-found.
    pub fn ndr(source: ClientError) -> Self {
        match source {
            ClientError::NotFound { resource } => ServiceError::NotFound(resource),
            source => ServiceError::Upstream {
                service: "ndr",
                source,
            },
        }
    }

    pub fn scheduler(source: ClientError) -> Self {
        ServiceError::Upstream {
            service: "prefect",
            source,
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    /// Create a new API error with the given status code and message
    pub fn new<S: Into<String>>(status: StatusCode, code: S, message: S) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            trace_id: Self::current_trace_id(),
        }
    }

    /// Add details to the error
    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    /// Extract the request trace ID, falling back to a generated correlation ID
    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                Some(format!("corr-{}", &uuid::Uuid::new_v4().to_string()[..8]).into_boxed_str())
            })
    }
}

/// Upstream error information attached to 502 responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpstreamErrorDetails {
    /// Upstream identifier (`ndr` or `prefect`)
    pub service: String,
    /// HTTP status code from upstream, when one was received
    pub status: Option<u16>,
    /// Response body snippet from upstream (truncated)
    pub body_snippet: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        (self.status, headers, axum::Json(self)).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(error: ServiceError) -> Self {
        match error {
            ServiceError::Validation(message) => {
                Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED".into(), message)
            }
            ServiceError::NotFound(message) => {
                Self::new(StatusCode::NOT_FOUND, "NOT_FOUND".into(), message)
            }
            ServiceError::Forbidden(message) => {
                Self::new(StatusCode::FORBIDDEN, "FORBIDDEN".into(), message)
            }
            ServiceError::StaleCallback(message) => {
                Self::new(StatusCode::CONFLICT, "STALE_CALLBACK".into(), message)
            }
            ServiceError::Upstream { service, source } => {
                let (status, body) = match &source {
                    ClientError::Http { status, body } => (Some(*status), body.clone()),
                    other => (None, Some(other.to_string())),
                };
                upstream_error(service, status, body)
            }
            ServiceError::Database(db_err) => db_err.into(),
            ServiceError::Internal(message) => {
                tracing::error!("Internal error: {}", message);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "An internal error occurred",
                )
            }
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:?}", error);

        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "An internal error occurred",
        )
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", &message)
    }
}

impl From<sea_orm::DbErr> for ApiError {
    fn from(error: sea_orm::DbErr) -> Self {
        match error {
            sea_orm::DbErr::RecordNotFound(record) => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                &format!("Record not found: {}", record),
            ),
            sea_orm::DbErr::Conn(connection_err) => {
                tracing::error!("Database connection error: {:?}", connection_err);
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Database service unavailable",
                )
            }
            _ => {
                tracing::error!("Database error: {:?}", error);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Database error occurred",
                )
            }
        }
    }
}

/// Create a 502 error for a failed NDR or Prefect call
pub fn upstream_error(service: &str, status: Option<u16>, body: Option<String>) -> ApiError {
    let details = UpstreamErrorDetails {
        service: service.to_string(),
        status,
        body_snippet: body.map(|b| {
            if b.chars().count() > 200 {
                let truncated: String = b.chars().take(200).collect();
                format!("{}...", truncated)
            } else {
                b
            }
        }),
    };

    let message = match status {
        Some(status) => format!("Upstream {} returned error status {}", service, status),
        None => format!("Upstream {} request failed", service),
    };

    ApiError::new(StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", &message).with_details(json!(details))
}

/// Create an unauthorized error (401)
pub fn unauthorized(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Authentication required");
    ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg)
}

/// Create a validation error with field details
pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message).with_details(field_errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_maps_to_400() {
        let api_error: ApiError =
            ServiceError::validation("cannot cancel workflow run in status success").into();

        assert_eq!(api_error.status, StatusCode::BAD_REQUEST);
        assert_eq!(api_error.code, Box::from("VALIDATION_FAILED"));
        assert!(api_error.message.contains("success"));
    }

    #[test]
    fn test_not_found_and_stale_callback_mapping() {
        let not_found: ApiError = ServiceError::not_found("workflow run 7 not found").into();
        assert_eq!(not_found.status, StatusCode::NOT_FOUND);

        let stale: ApiError = ServiceError::StaleCallback("event id mismatch".into()).into();
        assert_eq!(stale.status, StatusCode::CONFLICT);
        assert_eq!(stale.code, Box::from("STALE_CALLBACK"));
    }

    #[test]
    fn test_ndr_not_found_is_not_upstream() {
        let error = ServiceError::ndr(ClientError::NotFound {
            resource: "node 9".to_string(),
        });
        assert!(matches!(error, ServiceError::NotFound(_)));

        let error = ServiceError::ndr(ClientError::Http {
            status: 500,
            body: None,
        });
        assert!(matches!(error, ServiceError::Upstream { service: "ndr", .. }));
    }

    #[test]
    fn test_upstream_maps_to_502_with_details() {
        let api_error: ApiError = ServiceError::scheduler(ClientError::Http {
            status: 503,
            body: Some("scheduler overloaded".to_string()),
        })
        .into();

        assert_eq!(api_error.status, StatusCode::BAD_GATEWAY);
        assert_eq!(api_error.code, Box::from("UPSTREAM_ERROR"));
        let details = api_error.details.unwrap();
        assert_eq!(details["service"], "prefect");
        assert_eq!(details["status"], 503);
    }

    #[test]
    fn test_upstream_body_truncation_is_char_safe() {
        let body = "数据同步失败 ".repeat(80);
        let error = upstream_error("ndr", Some(500), Some(body));

        let details = error.details.unwrap();
        let snippet = details["body_snippet"].as_str().unwrap();
        assert!(snippet.ends_with("..."));
        assert!(snippet.chars().count() <= 203);
    }

    #[test]
    fn test_content_type_header() {
        let error = ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", "Test error");
        let response = error.into_response();

        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/problem+json"
        );
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_trace_id_fallback() {
        let error = ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR", "x");
        let trace_id = error.trace_id.unwrap();
        assert!(trace_id.starts_with("corr-"));
        assert_eq!(trace_id.len(), 13);
    }

    #[test]
    fn test_database_error_mapping() {
        let api_error: ApiError =
            sea_orm::DbErr::RecordNotFound("workflow_runs".to_string()).into();
        assert_eq!(api_error.status, StatusCode::NOT_FOUND);
    }
}
