//! Error types for the compute gateway

use std::io;

use axum::http::StatusCode;
use thiserror::Error;

/// Result type alias for the compute gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Compute gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Definition not found in the registry
    #[error("Definition not found: {0}")]
    DefinitionNotFound(String),

    /// Malformed client request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Compute backend rejected the request (non-2xx with body)
    ///
    /// Never retried: the backend processed the request and answered, so a
    /// second identical call would fail the same way.
    #[error("Compute backend returned {status}: {body}")]
    ComputeStatus {
        /// HTTP status returned by the backend
        status: u16,
        /// Response body text
        body: String,
    },

    /// Compute backend could not be reached at the transport level
    ///
    /// The one error class the solve pipeline retries, after a wake-up.
    #[error("Compute backend unreachable: {0}")]
    ComputeUnreachable(String),

    /// Infra control plane refused to allocate capacity for the backend VM
    #[error("No compute capacity available: {0}")]
    InfraCapacity(String),

    /// Infra control plane call failed
    #[error("Infra control plane error: {0}")]
    Infra(String),

    /// Infra control plane is not configured
    #[error("Infra control plane not configured: {0}")]
    InfraNotConfigured(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status code to surface this error with
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DefinitionNotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::ComputeStatus { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::ComputeUnreachable(_) => StatusCode::BAD_GATEWAY,
            Self::InfraCapacity(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the solve pipeline may retry after waking the backend
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ComputeUnreachable(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::ComputeUnreachable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            Error::DefinitionNotFound("box".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::ComputeStatus {
                status: 422,
                body: "bad tree".into()
            }
            .status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            Error::ComputeUnreachable("connection refused".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            Error::InfraCapacity("SkuNotAvailable".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_only_transport_failures_retryable() {
        assert!(Error::ComputeUnreachable("timeout".into()).is_retryable());
        assert!(
            !Error::ComputeStatus {
                status: 500,
                body: "solver exception".into()
            }
            .is_retryable()
        );
        assert!(!Error::DefinitionNotFound("box".into()).is_retryable());
    }
}
