//! Error types for the cache core
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::cache::LookupStatus;
use crate::models::ErrorResponse;

// == Cache Error Enum ==
/// Unified error type for the cache core.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key not found in cache (never stored, expired or evicted)
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// The key is reserved for the index's own persistence
    #[error("Key is reserved for the cache index: {0}")]
    ReservedKey(String),

    /// The backend cannot store objects by reference
    #[error("Reference objects are not supported by provider: {0}")]
    UnsupportedReference(String),

    /// Lock names must not be empty
    #[error("Invalid lock name")]
    InvalidLockName,

    /// The cache has not been connected yet
    #[error("Cache not connected: {0}")]
    NotConnected(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Index or object encoding failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Opaque failure reported by a storage backend
    #[error("Backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl CacheError {
    /// Maps an error to the lookup outcome reported for a retrieve.
    pub fn lookup_status(&self) -> LookupStatus {
        match self {
            CacheError::KeyNotFound(_) => LookupStatus::KeyMiss,
            _ => LookupStatus::Error,
        }
    }

    /// Returns true for a plain cache miss.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::KeyNotFound(_))
    }
}

impl From<bincode::Error> for CacheError {
    fn from(err: bincode::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::KeyNotFound(_) => StatusCode::NOT_FOUND,
            CacheError::ReservedKey(_)
            | CacheError::InvalidLockName
            | CacheError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CacheError::UnsupportedReference(_) => StatusCode::NOT_IMPLEMENTED,
            CacheError::NotConnected(_) => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::Serialization(_) | CacheError::Backend(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(ErrorResponse::new(self.to_string()));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache core.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_status_mapping() {
        assert_eq!(
            CacheError::KeyNotFound("k".into()).lookup_status(),
            LookupStatus::KeyMiss
        );
        assert_eq!(
            CacheError::Backend(anyhow::anyhow!("disk gone")).lookup_status(),
            LookupStatus::Error
        );
        assert!(CacheError::KeyNotFound("k".into()).is_not_found());
        assert!(!CacheError::InvalidLockName.is_not_found());
    }

    #[test]
    fn test_error_status_codes() {
        let cases = [
            (CacheError::KeyNotFound("k".into()), StatusCode::NOT_FOUND),
            (CacheError::ReservedKey("k".into()), StatusCode::BAD_REQUEST),
            (
                CacheError::UnsupportedReference("redis".into()),
                StatusCode::NOT_IMPLEMENTED,
            ),
            (
                CacheError::NotConnected("default".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                CacheError::Serialization("truncated".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }
}
