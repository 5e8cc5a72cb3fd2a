//! Memory Client Module
//!
//! In-process storage backend holding serialized values and live reference
//! objects. It has no expiry of its own and relies on the cache index for
//! TTL and size enforcement.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::cache::{Client, Object, ReferenceClient, ReferenceObject};
use crate::error::{CacheError, Result};

// == Memory Client ==
#[derive(Debug, Default)]
pub struct MemoryClient {
    /// Key-value storage
    entries: RwLock<HashMap<String, Object>>,
    connects: AtomicUsize,
    closes: AtomicUsize,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Number of `connect` calls seen.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::Relaxed)
    }

    /// Number of `close` calls seen.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Client for MemoryClient {
    async fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn store(&self, key: &str, data: &[u8], ttl: Duration) -> Result<()> {
        let obj = Object::new(key, data.to_vec(), ttl);
        self.entries.write().insert(key.to_string(), obj);
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> Result<Vec<u8>> {
        self.entries
            .read()
            .get(key)
            .and_then(|obj| obj.value.clone())
            .ok_or_else(|| CacheError::KeyNotFound(key.to_string()))
    }

    async fn remove(&self, keys: &[String]) -> Result<()> {
        let mut entries = self.entries.write();
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn as_reference(&self) -> Option<&dyn ReferenceClient> {
        Some(self)
    }
}

#[async_trait]
impl ReferenceClient for MemoryClient {
    async fn store_reference(
        &self,
        key: &str,
        value: Arc<dyn ReferenceObject>,
        ttl: Duration,
    ) -> Result<()> {
        let obj = Object::with_reference(key, value, ttl);
        self.entries.write().insert(key.to_string(), obj);
        Ok(())
    }

    async fn retrieve_reference(&self, key: &str) -> Result<Arc<dyn ReferenceObject>> {
        self.entries
            .read()
            .get(key)
            .and_then(|obj| obj.reference_value.clone())
            .ok_or_else(|| CacheError::KeyNotFound(key.to_string()))
    }
}
