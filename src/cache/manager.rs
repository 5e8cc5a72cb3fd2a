//! Cache Manager Module
//!
//! Uniform cache contract over any storage client: per-key locking, optional
//! index wrapping and operation metrics.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info, info_span, warn, Span};

use crate::cache::{
    CacheMetrics, Client, Index, IndexedClient, LookupStatus, Operation, ReferenceObject,
    INDEX_KEY,
};
use crate::config::{CacheConfig, IndexOptions};
use crate::error::{CacheError, Result};
use crate::locks::{lock_name, NamedLock, NamedLocker};

// == Cache Manager ==
pub struct CacheManager {
    config: RwLock<CacheConfig>,
    /// The raw backend as handed in
    client: Arc<dyn Client>,
    metrics: Arc<dyn CacheMetrics>,
    locker: RwLock<NamedLocker>,
    state: RwLock<Option<Connected>>,
    /// Held for the whole of `connect` so only one index is ever built
    connecting: tokio::sync::Mutex<()>,
    span: Span,
}

/// Client actually serving requests after `connect`.
#[derive(Clone)]
struct Connected {
    client: Arc<dyn Client>,
    index: Option<Index>,
}

impl CacheManager {
    // == Constructor ==
    pub fn new(config: CacheConfig, client: Arc<dyn Client>, metrics: Arc<dyn CacheMetrics>) -> Self {
        let span = info_span!("cache", name = %config.name, provider = %config.provider);
        Self {
            config: RwLock::new(config),
            client,
            metrics,
            locker: RwLock::new(NamedLocker::new()),
            state: RwLock::new(None),
            connecting: tokio::sync::Mutex::new(()),
            span,
        }
    }

    // == Connect ==
    /// Connects the backend and, when configured, loads the persisted index
    /// and wraps the backend with it. Connecting twice is a no-op.
    pub async fn connect(&self) -> Result<()> {
        let _connecting = self.connecting.lock().await;
        if self.state.read().is_some() {
            debug!(parent: &self.span, "cache already connected");
            return Ok(());
        }

        let config = self.configuration();
        self.client.connect().await?;

        let connected = if config.use_cache_index {
            let persisted = match self.client.retrieve(INDEX_KEY).await {
                Ok(data) => Some(data),
                Err(err) if err.is_not_found() => None,
                Err(err) => {
                    warn!(parent: &self.span, error = %err, "could not read persisted cache index");
                    None
                }
            };
            let index = Index::new(
                config.name.clone(),
                config.provider.clone(),
                persisted.as_deref(),
                config.index.clone(),
                self.client.clone(),
                self.metrics.clone(),
                self.span.clone(),
            );
            index.set_locker(self.locker());
            Connected {
                client: Arc::new(IndexedClient::new(self.client.clone(), index.clone())),
                index: Some(index),
            }
        } else {
            Connected {
                client: self.client.clone(),
                index: None,
            }
        };

        info!(
            parent: &self.span,
            indexed = connected.index.is_some(),
            "cache connected"
        );
        *self.state.write() = Some(connected);
        Ok(())
    }

    // == Store ==
    /// Stores `data` under `key` for `ttl` (zero = no expiration).
    pub async fn store(&self, key: &str, data: &[u8], ttl: Duration) -> Result<()> {
        let connected = self.prepare(key)?;
        let lock = self.lock(key).await?;
        let result = connected.client.store(key, data, ttl).await;
        lock.release();

        self.observe(Operation::Store, status_of(&result), data.len());
        self.report_usage(&connected);
        result
    }

    // == Retrieve ==
    /// Retrieves the bytes under `key`; a miss is [`CacheError::KeyNotFound`].
    pub async fn retrieve(&self, key: &str) -> Result<Vec<u8>> {
        let connected = self.prepare(key)?;
        let lock = self.rlock(key).await?;
        let result = connected.client.retrieve(key).await;
        lock.rrelease();

        let bytes = result.as_ref().map(Vec::len).unwrap_or(0);
        self.observe_lookup(key, &result, bytes);
        result
    }

    // == Store Reference ==
    /// Stores a live object by reference. Fails with
    /// [`CacheError::UnsupportedReference`] if the backend can't.
    pub async fn store_reference(
        &self,
        key: &str,
        value: Arc<dyn ReferenceObject>,
        ttl: Duration,
    ) -> Result<()> {
        let connected = self.prepare(key)?;
        let references = connected
            .client
            .as_reference()
            .ok_or_else(|| self.unsupported())?;

        let size = value.size();
        let lock = self.lock(key).await?;
        let result = references.store_reference(key, value, ttl).await;
        lock.release();

        self.observe(Operation::Store, status_of(&result), size);
        self.report_usage(&connected);
        result
    }

    // == Retrieve Reference ==
    pub async fn retrieve_reference(&self, key: &str) -> Result<Arc<dyn ReferenceObject>> {
        let connected = self.prepare(key)?;
        let references = connected
            .client
            .as_reference()
            .ok_or_else(|| self.unsupported())?;

        let lock = self.rlock(key).await?;
        let result = references.retrieve_reference(key).await;
        lock.rrelease();

        let bytes = result.as_ref().map(|value| value.size()).unwrap_or(0);
        self.observe_lookup(key, &result, bytes);
        result
    }

    // == Remove ==
    /// Removes `keys`, holding every key's write lock for the duration.
    pub async fn remove(&self, keys: &[String]) -> Result<()> {
        let connected = self.connected()?;
        for key in keys {
            check_key(key)?;
        }

        // Fixed acquisition order so concurrent multi-key removes can't deadlock
        let mut sorted: Vec<&String> = keys.iter().collect();
        sorted.sort();
        sorted.dedup();
        let unique = sorted.len();
        let mut locks: Vec<NamedLock> = Vec::with_capacity(unique);
        for key in sorted {
            locks.push(self.lock(key).await?);
        }

        let result = connected.client.remove(keys).await;
        locks.into_iter().for_each(NamedLock::release);

        for _ in 0..unique {
            self.observe(Operation::Remove, status_of(&result), 0);
        }
        self.report_usage(&connected);
        result
    }

    // == Close ==
    /// Stops the index loops and closes the backend. Later operations fail
    /// with [`CacheError::NotConnected`] until the cache is connected again.
    pub async fn close(&self) -> Result<()> {
        let Some(connected) = self.state.write().take() else {
            return Ok(());
        };
        connected.client.close().await?;
        info!(parent: &self.span, "cache closed");
        Ok(())
    }

    // == Accessors ==
    pub fn configuration(&self) -> CacheConfig {
        self.config.read().clone()
    }

    /// Applies new index settings to the running index (live reload).
    pub fn update_index_options(&self, options: IndexOptions) {
        if let Some(index) = self.index() {
            index.update_options(options.clone());
        }
        self.config.write().index = options;
    }

    pub fn locker(&self) -> NamedLocker {
        self.locker.read().clone()
    }

    /// Replaces the locker, e.g. to share one registry between caches.
    pub fn set_locker(&self, locker: NamedLocker) {
        if let Some(index) = self.index() {
            index.set_locker(locker.clone());
        }
        *self.locker.write() = locker;
    }

    /// The index, when connected with `use_cache_index`.
    pub fn index(&self) -> Option<Index> {
        self.state.read().as_ref().and_then(|c| c.index.clone())
    }

    pub fn is_connected(&self) -> bool {
        self.state.read().is_some()
    }

    // == Internals ==
    fn connected(&self) -> Result<Connected> {
        self.state
            .read()
            .clone()
            .ok_or_else(|| CacheError::NotConnected(self.config.read().name.clone()))
    }

    fn prepare(&self, key: &str) -> Result<Connected> {
        check_key(key)?;
        self.connected()
    }

    fn lock_name(&self, key: &str) -> String {
        let config = self.config.read();
        lock_name(&config.name, &config.provider, key)
    }

    async fn lock(&self, key: &str) -> Result<NamedLock> {
        let name = self.lock_name(key);
        self.locker().acquire(&name).await
    }

    async fn rlock(&self, key: &str) -> Result<NamedLock> {
        let name = self.lock_name(key);
        self.locker().racquire(&name).await
    }

    fn unsupported(&self) -> CacheError {
        CacheError::UnsupportedReference(self.config.read().provider.clone())
    }

    fn observe(&self, operation: Operation, status: Option<LookupStatus>, bytes: usize) {
        let config = self.config.read();
        self.metrics
            .observe(&config.name, &config.provider, operation, status, bytes);
    }

    fn observe_lookup<T>(&self, key: &str, result: &Result<T>, bytes: usize) {
        let status = LookupStatus::of(result);
        match (status, result) {
            (LookupStatus::Error, Err(err)) => {
                warn!(parent: &self.span, key, error = %err, "cache retrieve failed")
            }
            _ => debug!(parent: &self.span, key, status = status.as_str(), "cache retrieve"),
        }
        self.observe(Operation::Retrieve, Some(status), bytes);
    }

    fn report_usage(&self, connected: &Connected) {
        if let Some(index) = &connected.index {
            index.report_usage();
        }
    }
}

fn check_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::InvalidLockName);
    }
    if key == INDEX_KEY {
        return Err(CacheError::ReservedKey(key.to_string()));
    }
    Ok(())
}

fn status_of<T>(result: &Result<T>) -> Option<LookupStatus> {
    result.as_ref().err().map(|_| LookupStatus::Error)
}
