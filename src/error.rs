//! Error types for the storage engine
//!
//! Provides unified error handling using thiserror. Data-plane failures are
//! reported through [`StorageError`]; persistence-plane failures are
//! [`BackingError`]s and are absorbed by the wrappers.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Storage Error Enum ==
/// Unified error type for storage operations and the HTTP binding.
#[derive(Error, Debug)]
pub enum StorageError {
    /// A write would push the origin past its byte quota
    #[error("Quota exceeded: write needs {requested} bytes, limit is {limit}")]
    QuotaExceeded { requested: usize, limit: usize },

    /// Key not found in the origin's map
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Origin cannot be used as a storage namespace
    #[error("Invalid origin: {0}")]
    InvalidOrigin(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Target origin already has a live wrapper
    #[error("Origin already open: {0}")]
    OriginInUse(String),

    /// Backing store failure surfaced to a management call
    #[error("Backing store error: {0}")]
    Backing(#[from] BackingError),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

// == Backing Error Enum ==
/// Failures reported by a [`crate::backing::BackingStore`].
#[derive(Error, Debug)]
pub enum BackingError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Persisted data could not be decoded
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// Store refused or could not service the request
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

// == IntoResponse Implementation ==
impl IntoResponse for StorageError {
    fn into_response(self) -> Response {
        let status = match &self {
            StorageError::QuotaExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            StorageError::NotFound(_) => StatusCode::NOT_FOUND,
            StorageError::InvalidOrigin(_) | StorageError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            StorageError::OriginInUse(_) => StatusCode::CONFLICT,
            StorageError::Backing(_) | StorageError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_error_maps_to_payload_too_large() {
        let response = StorageError::QuotaExceeded {
            requested: 11,
            limit: 10,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_backing_error_converts() {
        let err: StorageError = BackingError::Unavailable("offline".to_string()).into();
        assert!(matches!(err, StorageError::Backing(_)));
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_messages() {
        let err = StorageError::InvalidOrigin("".to_string());
        assert_eq!(err.to_string(), "Invalid origin: ");
        let err = StorageError::QuotaExceeded {
            requested: 11,
            limit: 10,
        };
        assert!(err.to_string().contains("11"));
    }
}
