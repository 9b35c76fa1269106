//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::DomainError;
use crate::event_log::LogError;
use crate::projection::ProjectionError;
use crate::transport::TransportError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Concurrent modification: {0}")]
    Conflict(String),

    // Domain errors
    #[error(transparent)]
    Domain(#[from] DomainError),

    // Server errors (5xx)
    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("Stored data is corrupt: {0}")]
    DataCorrupt(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Transient failure; the whole command may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DependencyUnavailable(_) | Self::Conflict(_))
    }
}

impl From<LogError> for AppError {
    fn from(err: LogError) -> Self {
        match err {
            LogError::Unavailable(msg) => AppError::DependencyUnavailable(msg),
            LogError::Corrupt { .. } => AppError::DataCorrupt(err.to_string()),
            LogError::Conflict { .. } => AppError::Conflict(err.to_string()),
            LogError::InvalidKey(_) => AppError::InvalidRequest(err.to_string()),
            LogError::Serialization(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<TransportError> for AppError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Unavailable(msg) => AppError::DependencyUnavailable(msg),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<ProjectionError> for AppError {
    fn from(err: ProjectionError) -> Self {
        AppError::DependencyUnavailable(err.to_string())
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = match &self {
            // 400 Bad Request
            AppError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", Some(msg.clone()))
            }

            // 409 Conflict
            AppError::Conflict(msg) => {
                (StatusCode::CONFLICT, "concurrent_modification", Some(msg.clone()))
            }

            // Domain errors - map to appropriate HTTP status
            AppError::Domain(domain_err) => match domain_err {
                DomainError::InvalidAmount(msg) => {
                    (StatusCode::BAD_REQUEST, "invalid_amount", Some(msg.clone()))
                }
                DomainError::InvalidAccountId(msg) => {
                    (StatusCode::BAD_REQUEST, "invalid_account_id", Some(msg.clone()))
                }
                DomainError::InsufficientFunds { .. } => {
                    (StatusCode::CONFLICT, "insufficient_funds", Some(domain_err.to_string()))
                }
                DomainError::AccountNotFound(id) => {
                    (StatusCode::NOT_FOUND, "account_not_found", Some(id.clone()))
                }
            },

            // 503 Service Unavailable
            AppError::DependencyUnavailable(msg) => {
                tracing::warn!("Dependency unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "dependency_unavailable", None)
            }

            // 500 Internal Server Error
            AppError::DataCorrupt(msg) => {
                tracing::error!("Corrupt data: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "data_corrupt", None)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: self.to_string(),
            error_code: error_code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::BlobError;
    use rust_decimal_macros::dec;

    fn status_of(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_domain_error_status() {
        assert_eq!(
            status_of(DomainError::InvalidAmount("0".into()).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(DomainError::insufficient_funds(dec!(10), dec!(5)).into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(DomainError::AccountNotFound("x".into()).into()),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_log_error_mapping() {
        let unavailable: AppError = LogError::Unavailable("down".into()).into();
        assert!(unavailable.is_retryable());
        assert_eq!(status_of(unavailable), StatusCode::SERVICE_UNAVAILABLE);

        let corrupt: AppError = LogError::Corrupt {
            key: "a.jsonl".into(),
            line: 2,
            reason: "bad".into(),
        }
        .into();
        assert!(matches!(corrupt, AppError::DataCorrupt(_)));
        assert_eq!(status_of(corrupt), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_refused_log_key_is_a_client_error() {
        let err: AppError = LogError::from(BlobError::InvalidKey(".hidden.jsonl".into())).into();
        assert!(!err.is_retryable());
        assert_eq!(status_of(err), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_transport_error_mapping() {
        let err: AppError = TransportError::Unavailable("broker".into()).into();
        assert!(matches!(err, AppError::DependencyUnavailable(_)));
    }
}
