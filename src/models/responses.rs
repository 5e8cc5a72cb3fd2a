//! Response DTOs for the cache server API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;

use crate::cache::StatsSnapshot;

/// Response body for the GET operation (GET /get/:key)
#[derive(Debug, Clone, Serialize)]
pub struct GetResponse {
    /// The requested key
    pub key: String,
    /// The stored value
    pub value: String,
}

impl GetResponse {
    /// Creates a new GetResponse
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Response body for the SET operation (PUT /set)
#[derive(Debug, Clone, Serialize)]
pub struct SetResponse {
    /// Success message
    pub message: String,
    /// The key that was set
    pub key: String,
}

impl SetResponse {
    /// Creates a new SetResponse
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' set successfully", key),
            key,
        }
    }
}

/// Response body for the DELETE operation (DELETE /del/:key)
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    /// Success message
    pub message: String,
    /// The key that was deleted
    pub key: String,
}

impl DeleteResponse {
    /// Creates a new DeleteResponse
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' deleted successfully", key),
            key,
        }
    }
}

/// Response body for the stats endpoint (GET /stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub cache: String,
    pub provider: String,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub stores: u64,
    pub removes: u64,
    pub evictions: u64,
    /// Objects tracked by the index
    pub objects: i64,
    /// Bytes tracked by the index
    pub bytes: i64,
    pub max_objects: i64,
    pub max_bytes: i64,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
}

impl StatsResponse {
    /// Creates a new StatsResponse from a stats snapshot
    pub fn new(cache: impl Into<String>, provider: impl Into<String>, stats: &StatsSnapshot) -> Self {
        Self {
            cache: cache.into(),
            provider: provider.into(),
            hits: stats.hits,
            misses: stats.misses,
            errors: stats.errors,
            stores: stats.stores,
            removes: stats.removes,
            evictions: stats.evictions,
            objects: stats.objects,
            bytes: stats.bytes,
            max_objects: stats.max_objects,
            max_bytes: stats.max_bytes,
            hit_rate: stats.hit_rate(),
        }
    }
}

/// Response body for the index maintenance endpoints (POST /index/*)
#[derive(Debug, Clone, Serialize)]
pub struct IndexResponse {
    /// Objects tracked after the operation
    pub objects: i64,
    /// Bytes tracked after the operation
    pub bytes: i64,
    /// Whether a flush wrote the index (flush only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flushed: Option<bool>,
}

impl IndexResponse {
    pub fn new(objects: i64, bytes: i64) -> Self {
        Self {
            objects,
            bytes,
            flushed: None,
        }
    }

    pub fn with_flushed(mut self, flushed: bool) -> Self {
        self.flushed = Some(flushed);
        self
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status ("healthy" or "disconnected")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self::with_status("healthy")
    }

    pub fn disconnected() -> Self {
        Self::with_status("disconnected")
    }

    fn with_status(status: &str) -> Self {
        Self {
            status: status.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Error response body for all error conditions
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub error: String,
}

impl ErrorResponse {
    /// Creates a new ErrorResponse
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
