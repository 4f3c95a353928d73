//! # External Clients
//!
//! Traits for the two external collaborators, the NDR node/document store and
//! the Prefect workflow scheduler, together with their HTTP implementations.
//! Services only depend on the traits so tests can substitute in-memory fakes.

use thiserror::Error;

pub mod ndr;
pub mod prefect;

pub use ndr::{HttpNdrClient, NdrClient};
pub use prefect::{HttpPrefectClient, SchedulerClient};

/// Errors returned by the external clients
#[derive(Debug, Error)]
pub enum ClientError {
    /// Upstream answered with a non-success status
    #[error("upstream returned status {status}")]
    Http { status: u16, body: Option<String> },
    #[error("{resource} not found")]
    NotFound { resource: String },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("invalid client configuration: {0}")]
    Configuration(String),
}

impl ClientError {
    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        ClientError::NotFound {
            resource: resource.into(),
        }
    }
}

/// Read a response, mapping 404 to [`ClientError::NotFound`] and other
/// non-success codes to [`ClientError::Http`].
pub(crate) async fn check_status(
    response: reqwest::Response,
    resource: impl FnOnce() -> String,
) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(ClientError::not_found(resource()));
    }

    let body = response.text().await.ok().filter(|b| !b.is_empty());
    Err(ClientError::Http {
        status: status.as_u16(),
        body,
    })
}

/// Decode a JSON body, keeping decode failures distinct from transport errors.
pub(crate) async fn decode_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ClientError> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ClientError::MalformedResponse(e.to_string()))
}
