//! API Handlers
//!
//! HTTP request handlers for each cache server endpoint.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};

use crate::cache::{CacheManager, CacheStats, Client, Index};
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::models::{
    DeleteResponse, GetResponse, HealthResponse, IndexResponse, SetRequest, SetResponse,
    StatsResponse,
};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The cache behind the API; it serializes access per key itself
    pub cache: Arc<CacheManager>,
    /// Counters fed by the cache
    pub stats: Arc<CacheStats>,
}

impl AppState {
    /// Creates a new AppState around a manager and the stats it reports to.
    pub fn new(cache: Arc<CacheManager>, stats: Arc<CacheStats>) -> Self {
        Self { cache, stats }
    }

    /// Creates a new AppState from configuration and a storage backend.
    ///
    /// The cache still needs to be connected.
    pub fn from_config(config: &Config, client: Arc<dyn Client>) -> Self {
        let stats = Arc::new(CacheStats::new());
        let cache = CacheManager::new(config.cache.clone(), client, stats.clone());
        Self::new(Arc::new(cache), stats)
    }
}

/// Handler for PUT /set
///
/// Stores a key-value pair in the cache with optional TTL.
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    // Validate request
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    state
        .cache
        .store(&req.key, req.value.as_bytes(), req.ttl())
        .await?;

    Ok(Json(SetResponse::new(req.key)))
}

/// Handler for GET /get/:key
///
/// Retrieves a value from the cache by key.
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>> {
    let value = state.cache.retrieve(&key).await?;

    Ok(Json(GetResponse::new(
        key,
        String::from_utf8_lossy(&value).into_owned(),
    )))
}

/// Handler for DELETE /del/:key
///
/// Deletes a key from the cache. Deleting an absent key succeeds.
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    state.cache.remove(std::slice::from_ref(&key)).await?;

    Ok(Json(DeleteResponse::new(key)))
}

/// Handler for GET /stats
///
/// Returns current cache statistics.
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let config = state.cache.configuration();
    let stats = state.stats.snapshot();

    Json(StatsResponse::new(config.name, config.provider, &stats))
}

/// Handler for GET /health
///
/// Reports whether the cache is connected.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    if state.cache.is_connected() {
        Json(HealthResponse::healthy())
    } else {
        Json(HealthResponse::disconnected())
    }
}

/// Handler for POST /index/reap
///
/// Runs a reap pass now instead of waiting for the reaper.
pub async fn reap_handler(State(state): State<AppState>) -> Result<Json<IndexResponse>> {
    let index = require_index(&state)?;
    index.reap();

    Ok(Json(IndexResponse::new(index.object_count(), index.cache_size())))
}

/// Handler for POST /index/flush
///
/// Persists the index now if it changed since the last flush.
pub async fn flush_handler(State(state): State<AppState>) -> Result<Json<IndexResponse>> {
    let index = require_index(&state)?;
    let flushed = index.flush().await?;

    Ok(Json(
        IndexResponse::new(index.object_count(), index.cache_size()).with_flushed(flushed),
    ))
}

fn require_index(state: &AppState) -> Result<Index> {
    if !state.cache.is_connected() {
        return Err(CacheError::NotConnected(state.cache.configuration().name));
    }
    state
        .cache
        .index()
        .ok_or_else(|| CacheError::InvalidRequest("cache has no index".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryClient;

    async fn connected_state() -> AppState {
        let state = AppState::from_config(&Config::default(), Arc::new(MemoryClient::new()));
        state.cache.connect().await.unwrap();
        state
    }

    #[tokio::test]
    async fn test_set_and_get_handler() {
        let state = connected_state().await;

        // Set a value
        let req = SetRequest {
            key: "test_key".to_string(),
            value: "test_value".to_string(),
            ttl: None,
        };
        let result = set_handler(State(state.clone()), Json(req)).await;
        assert!(result.is_ok());

        // Get the value
        let result = get_handler(State(state.clone()), Path("test_key".to_string())).await;
        assert!(result.is_ok());
        let response = result.unwrap();
        assert_eq!(response.value, "test_value");
    }

    #[tokio::test]
    async fn test_get_nonexistent_key() {
        let state = connected_state().await;

        let result = get_handler(State(state), Path("nonexistent".to_string())).await;
        assert!(matches!(result, Err(CacheError::KeyNotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_handler() {
        let state = connected_state().await;

        // Set a value first
        let req = SetRequest {
            key: "to_delete".to_string(),
            value: "value".to_string(),
            ttl: None,
        };
        set_handler(State(state.clone()), Json(req)).await.unwrap();

        // Delete it
        let result = delete_handler(State(state.clone()), Path("to_delete".to_string())).await;
        assert!(result.is_ok());

        // Verify it's gone
        let result = get_handler(State(state), Path("to_delete".to_string())).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_stats_handler() {
        let state = connected_state().await;
        let _ = get_handler(State(state.clone()), Path("missing".to_string())).await;

        let response = stats_handler(State(state)).await;
        assert_eq!(response.hits, 0);
        assert_eq!(response.misses, 1);
        assert_eq!(response.cache, "default");
    }

    #[tokio::test]
    async fn test_health_handler() {
        let state = AppState::from_config(&Config::default(), Arc::new(MemoryClient::new()));
        assert_eq!(health_handler(State(state.clone())).await.status, "disconnected");

        state.cache.connect().await.unwrap();
        assert_eq!(health_handler(State(state)).await.status, "healthy");
    }

    #[tokio::test]
    async fn test_reap_and_flush_handlers() {
        let state = connected_state().await;
        let req = SetRequest {
            key: "k".to_string(),
            value: "abc".to_string(),
            ttl: None,
        };
        set_handler(State(state.clone()), Json(req)).await.unwrap();

        let reaped = reap_handler(State(state.clone())).await.unwrap();
        assert_eq!(reaped.objects, 1);
        assert_eq!(reaped.bytes, 3);

        let flushed = flush_handler(State(state.clone())).await.unwrap();
        assert_eq!(flushed.flushed, Some(true));
        let flushed = flush_handler(State(state)).await.unwrap();
        assert_eq!(flushed.flushed, Some(false));
    }

    #[tokio::test]
    async fn test_index_handlers_without_index() {
        let mut config = Config::default();
        config.cache.use_cache_index = false;
        let state = AppState::from_config(&config, Arc::new(MemoryClient::new()));
        assert!(matches!(
            reap_handler(State(state.clone())).await,
            Err(CacheError::NotConnected(_))
        ));

        state.cache.connect().await.unwrap();
        assert!(matches!(
            flush_handler(State(state)).await,
            Err(CacheError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_set_invalid_request() {
        let state = connected_state().await;

        let req = SetRequest {
            key: "".to_string(), // Empty key is invalid
            value: "value".to_string(),
            ttl: None,
        };
        let result = set_handler(State(state), Json(req)).await;
        assert!(matches!(result, Err(CacheError::InvalidRequest(_))));
    }
}
