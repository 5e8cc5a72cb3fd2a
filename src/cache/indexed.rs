//! Indexed Client Module
//!
//! Decorates a raw storage client with a cache index so that backends
//! without native expiration get TTL and size enforcement.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::cache::object::expiration_from_ttl;
use crate::cache::{Client, Index, ReferenceClient, ReferenceObject, INDEX_KEY};
use crate::error::{CacheError, Result};
use crate::tasks::IndexTask;

/// A client whose every mutation is mirrored into an [`Index`].
pub struct IndexedClient {
    inner: Arc<dyn Client>,
    index: Index,
}

impl IndexedClient {
    pub fn new(inner: Arc<dyn Client>, index: Index) -> Self {
        Self { inner, index }
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    fn track(&self, key: &str, size: usize, ttl: Duration) {
        let now = Utc::now();
        self.index
            .update_index(key, size as i64, now, now, expiration_from_ttl(now, ttl));
    }

    fn check_key(&self, key: &str) -> Result<()> {
        if key == INDEX_KEY {
            return Err(CacheError::ReservedKey(key.to_string()));
        }
        Ok(())
    }

    /// Reports expired keys as misses before the reaper gets to them.
    fn check_expired(&self, key: &str) -> Result<()> {
        if self.index.is_expired(key) {
            self.index.expire(key);
            return Err(CacheError::KeyNotFound(key.to_string()));
        }
        Ok(())
    }

    /// Records a hit, or forgets keys the backend no longer has.
    fn observe_lookup<T>(&self, key: &str, result: &Result<T>) {
        match result {
            Ok(_) => self.index.queue(IndexTask::Touch(key.to_string())),
            Err(err) if err.is_not_found() => self.index.remove_object(key),
            Err(_) => {}
        }
    }

    fn unsupported(&self) -> CacheError {
        CacheError::UnsupportedReference(self.index.provider().to_string())
    }
}

#[async_trait]
impl Client for IndexedClient {
    async fn connect(&self) -> Result<()> {
        self.inner.connect().await
    }

    async fn store(&self, key: &str, data: &[u8], ttl: Duration) -> Result<()> {
        self.check_key(key)?;
        self.inner.store(key, data, ttl).await?;
        self.track(key, data.len(), ttl);
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> Result<Vec<u8>> {
        self.check_key(key)?;
        self.check_expired(key)?;
        let result = self.inner.retrieve(key).await;
        self.observe_lookup(key, &result);
        result
    }

    async fn remove(&self, keys: &[String]) -> Result<()> {
        if let Some(key) = keys.iter().find(|key| key.as_str() == INDEX_KEY) {
            return Err(CacheError::ReservedKey(key.clone()));
        }
        self.inner.remove(keys).await?;
        self.index.remove_objects(keys);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.index.close().await;
        self.inner.close().await
    }

    fn as_reference(&self) -> Option<&dyn ReferenceClient> {
        self.inner.as_reference().map(|_| self as &dyn ReferenceClient)
    }
}

#[async_trait]
impl ReferenceClient for IndexedClient {
    async fn store_reference(
        &self,
        key: &str,
        value: Arc<dyn ReferenceObject>,
        ttl: Duration,
    ) -> Result<()> {
        self.check_key(key)?;
        let references = self.inner.as_reference().ok_or_else(|| self.unsupported())?;
        let size = value.size();
        references.store_reference(key, value, ttl).await?;
        self.track(key, size, ttl);
        Ok(())
    }

    async fn retrieve_reference(&self, key: &str) -> Result<Arc<dyn ReferenceObject>> {
        self.check_key(key)?;
        let references = self.inner.as_reference().ok_or_else(|| self.unsupported())?;
        self.check_expired(key)?;
        let result = references.retrieve_reference(key).await;
        self.observe_lookup(key, &result);
        result
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryClient, NoopMetrics};
    use crate::config::IndexOptions;
    use std::any::Any;
    use tracing::Span;

    struct Blob(usize);

    impl ReferenceObject for Blob {
        fn size(&self) -> usize {
            self.0
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn indexed(raw: Arc<MemoryClient>) -> IndexedClient {
        let options = IndexOptions {
            reap_interval: Duration::ZERO,
            flush_interval: Duration::ZERO,
            ..IndexOptions::default()
        };
        let index = Index::new(
            "test",
            "memory",
            None,
            options,
            raw.clone(),
            Arc::new(NoopMetrics),
            Span::none(),
        );
        IndexedClient::new(raw, index)
    }

    #[tokio::test]
    async fn test_store_tracks_object() {
        let client = indexed(Arc::new(MemoryClient::new()));
        client.store("k", b"value", Duration::from_secs(60)).await.unwrap();

        let index = client.index();
        assert_eq!(index.object_count(), 1);
        assert_eq!(index.cache_size(), 5);
        assert!(index.get_expiration("k").is_some());
    }

    #[tokio::test]
    async fn test_expired_key_is_a_miss() {
        let raw = Arc::new(MemoryClient::new());
        let client = indexed(raw.clone());
        client.store("k", b"value", Duration::from_millis(10)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(matches!(
            client.retrieve("k").await,
            Err(CacheError::KeyNotFound(_))
        ));
        assert_eq!(client.index().object_count(), 0);

        // The backend copy goes away in the background
        for _ in 0..50 {
            if !raw.contains("k") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!raw.contains("k"));
    }

    #[tokio::test]
    async fn test_backend_miss_forgets_metadata() {
        let raw = Arc::new(MemoryClient::new());
        let client = indexed(raw.clone());
        client.store("k", b"value", Duration::ZERO).await.unwrap();

        // Lost behind the index's back
        raw.remove(&["k".to_string()]).await.unwrap();

        assert!(client.retrieve("k").await.is_err());
        assert!(!client.index().contains("k"));
    }

    #[tokio::test]
    async fn test_remove_untracks() {
        let client = indexed(Arc::new(MemoryClient::new()));
        client.store("a", b"1", Duration::ZERO).await.unwrap();
        client.store("b", b"22", Duration::ZERO).await.unwrap();

        client.remove(&["a".to_string()]).await.unwrap();
        assert_eq!(client.index().object_count(), 1);
        assert_eq!(client.index().cache_size(), 2);
    }

    #[tokio::test]
    async fn test_reserved_key_rejected() {
        let client = indexed(Arc::new(MemoryClient::new()));
        assert!(matches!(
            client.store(INDEX_KEY, b"x", Duration::ZERO).await,
            Err(CacheError::ReservedKey(_))
        ));
        assert!(matches!(
            client.remove(&[INDEX_KEY.to_string()]).await,
            Err(CacheError::ReservedKey(_))
        ));
    }

    #[tokio::test]
    async fn test_reference_sizes_tracked() {
        let client = indexed(Arc::new(MemoryClient::new()));
        let references = client.as_reference().unwrap();

        references
            .store_reference("blob", Arc::new(Blob(1000)), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(client.index().cache_size(), 1000);

        let value = references.retrieve_reference("blob").await.unwrap();
        assert_eq!(value.size(), 1000);
    }

    #[tokio::test]
    async fn test_close_stops_index() {
        let raw = Arc::new(MemoryClient::new());
        let client = indexed(raw.clone());
        client.close().await.unwrap();

        assert!(client.index().is_closed());
        assert_eq!(raw.close_count(), 1);
    }
}
