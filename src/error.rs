//! Error types for the sync layer
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ErrorResponse;

// == Sync Error Enum ==
/// Unified error type for the cache and synchronization layer.
#[derive(Error, Debug, Clone)]
pub enum SyncError {
    /// Invalid input (empty key, zero TTL, malformed endpoint)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Key not present in the cache
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Transport-level failure (connection refused, reset, DNS)
    #[error("Network error: {0}")]
    Network(String),

    /// Request exceeded its deadline
    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    /// Non-success HTTP status
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Response body could not be parsed as JSON, even after cleansing
    #[error("Failed to parse response: {message} (body starts with: {snippet:?})")]
    Parse { message: String, snippet: String },

    /// Offline queue was cleared before the request could be replayed
    #[error("Queued request was dropped before replay")]
    QueueCleared,

    /// Durable storage failure surfaced by an operation that cannot swallow it
    #[error("Storage error: {0}")]
    Storage(String),

    /// Real-time channel failure
    #[error("Channel error: {0}")]
    Channel(String),

    /// Feature disabled or component not initialized
    #[error("Unavailable: {0}")]
    Unavailable(String),
}

impl SyncError {
    // == Retry Classification ==
    /// Returns true for transient failures worth retrying:
    /// network errors, timeouts and 5xx responses.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network(_) | SyncError::Timeout(_) => true,
            SyncError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<crate::persistence::PersistenceError> for SyncError {
    fn from(err: crate::persistence::PersistenceError) -> Self {
        SyncError::Storage(err.to_string())
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let status = match &self {
            SyncError::NotFound(_) => StatusCode::NOT_FOUND,
            SyncError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            SyncError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            SyncError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            SyncError::Network(_) | SyncError::Http { .. } | SyncError::Channel(_) => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(ErrorResponse::new(self.to_string()));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the sync layer.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(SyncError::Network("reset".into()).is_retryable());
        assert!(SyncError::Timeout(100).is_retryable());
        assert!(SyncError::Http {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(!SyncError::Http {
            status: 404,
            body: String::new()
        }
        .is_retryable());
        assert!(!SyncError::Parse {
            message: "eof".into(),
            snippet: String::new()
        }
        .is_retryable());
        assert!(!SyncError::QueueCleared.is_retryable());
    }

    #[test]
    fn test_not_found_maps_to_404() {
        let response = SyncError::NotFound("k".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
