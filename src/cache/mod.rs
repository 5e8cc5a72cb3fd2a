//! Cache Module
//!
//! Storage contracts, the cache index that enforces TTL and size bounds
//! over them, and the manager that exposes the uniform cache operations.

mod index;
mod indexed;
mod manager;
mod memory;
mod metrics;
mod object;


use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

// Re-export public types
pub use index::Index;
pub(crate) use index::WeakIndex;
pub use indexed::IndexedClient;
pub use manager::CacheManager;
pub use memory::MemoryClient;
pub use metrics::{CacheMetrics, CacheStats, NoopMetrics, Operation, StatsSnapshot};
pub use object::Object;

// == Public Constants ==
/// Reserved key under which the index persists itself
pub const INDEX_KEY: &str = "cache.index";

/// TTL used when persisting the index; long enough to never expire in practice
pub const INDEX_FLUSH_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

// == Lookup Status ==
/// Outcome of a retrieve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupStatus {
    Hit,
    KeyMiss,
    Error,
}

impl LookupStatus {
    /// Derives the status from a retrieve result.
    pub fn of<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => LookupStatus::Hit,
            Err(err) => err.lookup_status(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LookupStatus::Hit => "hit",
            LookupStatus::KeyMiss => "kmiss",
            LookupStatus::Error => "error",
        }
    }
}

// == Reference Object ==
/// A live in-memory value stored by reference. The cache only ever asks it
/// for its approximate size.
pub trait ReferenceObject: Any + Send + Sync {
    /// Approximate size in bytes
    fn size(&self) -> usize;

    /// Allows callers to downcast to the concrete type.
    fn as_any(&self) -> &dyn Any;
}

// == Client ==
/// Contract every storage backend implements.
///
/// `retrieve` reports a miss as [`CacheError::KeyNotFound`](crate::error::CacheError::KeyNotFound).
#[async_trait]
pub trait Client: Send + Sync {
    async fn connect(&self) -> Result<()>;

    async fn store(&self, key: &str, data: &[u8], ttl: Duration) -> Result<()>;

    async fn retrieve(&self, key: &str) -> Result<Vec<u8>>;

    async fn remove(&self, keys: &[String]) -> Result<()>;

    async fn close(&self) -> Result<()>;

    /// Returns the reference storage capability, if the backend has one.
    fn as_reference(&self) -> Option<&dyn ReferenceClient> {
        None
    }
}

// == Reference Client ==
/// Optional capability of backends that can keep live objects by reference.
#[async_trait]
pub trait ReferenceClient: Send + Sync {
    async fn store_reference(
        &self,
        key: &str,
        value: Arc<dyn ReferenceObject>,
        ttl: Duration,
    ) -> Result<()>;

    async fn retrieve_reference(&self, key: &str) -> Result<Arc<dyn ReferenceObject>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;

    #[test]
    fn test_lookup_status_of_result() {
        let hit: Result<Vec<u8>> = Ok(vec![1]);
        let miss: Result<Vec<u8>> = Err(CacheError::KeyNotFound("k".into()));
        let error: Result<Vec<u8>> = Err(CacheError::Serialization("bad".into()));

        assert_eq!(LookupStatus::of(&hit), LookupStatus::Hit);
        assert_eq!(LookupStatus::of(&miss), LookupStatus::KeyMiss);
        assert_eq!(LookupStatus::of(&error), LookupStatus::Error);
        assert_eq!(LookupStatus::KeyMiss.as_str(), "kmiss");
    }
}
