//! Cache Index Module
//!
//! Tracks metadata for every cached key, enforces TTL and size bounds by
//! reaping, and persists itself to the backing store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Span};

use crate::cache::object::expiration_from_ttl;
use crate::cache::{CacheMetrics, Client, Object, Operation, INDEX_FLUSH_TTL, INDEX_KEY};
use crate::config::IndexOptions;
use crate::error::Result;
use crate::locks::{lock_name, NamedLock, NamedLocker};
use crate::tasks::{self, IndexTask};

// == Index ==
/// Metadata table of a cache. Cloning yields another handle to the same index.
#[derive(Clone)]
pub struct Index {
    inner: Arc<IndexInner>,
}

/// Handle held by the background tasks so they never keep a dropped index alive.
#[derive(Clone)]
pub(crate) struct WeakIndex {
    inner: Weak<IndexInner>,
}

struct IndexInner {
    cache_name: String,
    provider: String,
    objects: Mutex<HashMap<String, Object>>,
    cache_size: AtomicI64,
    object_count: AtomicI64,
    /// Bumped on every change; the flusher skips when nothing changed since
    /// the generation it last persisted
    generation: AtomicU64,
    flushed_generation: AtomicU64,
    options: RwLock<IndexOptions>,
    client: Arc<dyn Client>,
    /// Serializes background removals with foreground writes of the same key
    locker: RwLock<NamedLocker>,
    metrics: Arc<dyn CacheMetrics>,
    queue: mpsc::UnboundedSender<IndexTask>,
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    span: Span,
}

#[derive(Serialize)]
struct PersistedIndexRef<'a> {
    objects: &'a HashMap<String, Object>,
}

#[derive(Deserialize)]
struct PersistedIndex {
    objects: HashMap<String, Object>,
}

/// Candidate for size-bound eviction.
struct Remainder {
    key: String,
    size: i64,
    last_access: DateTime<Utc>,
}

impl Index {
    // == Constructor ==
    /// Creates the index, hydrating it from `persisted` when given, and
    /// starts the reaper, flusher and worker tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        cache_name: impl Into<String>,
        provider: impl Into<String>,
        persisted: Option<&[u8]>,
        options: IndexOptions,
        client: Arc<dyn Client>,
        metrics: Arc<dyn CacheMetrics>,
        span: Span,
    ) -> Self {
        let (queue, queue_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);

        let index = Self {
            inner: Arc::new(IndexInner {
                cache_name: cache_name.into(),
                provider: provider.into(),
                objects: Mutex::new(HashMap::new()),
                cache_size: AtomicI64::new(0),
                object_count: AtomicI64::new(0),
                generation: AtomicU64::new(0),
                flushed_generation: AtomicU64::new(0),
                options: RwLock::new(options.clone()),
                client,
                locker: RwLock::new(NamedLocker::new()),
                metrics,
                queue,
                shutdown,
                handles: Mutex::new(Vec::new()),
                span,
            }),
        };

        if let Some(data) = persisted {
            match index.load(data) {
                Ok(count) => {
                    info!(parent: &index.inner.span, objects = count, "cache index hydrated")
                }
                Err(err) => {
                    warn!(parent: &index.inner.span, error = %err, "discarding unreadable cache index")
                }
            }
        }

        index
            .inner
            .metrics
            .set_limits(
                &index.inner.cache_name,
                &index.inner.provider,
                options.max_size_objects,
                options.max_size_bytes,
            );
        index.report_usage();

        let mut handles = vec![tasks::spawn_worker(
            index.downgrade(),
            queue_rx,
            index.inner.shutdown.subscribe(),
            index.inner.span.clone(),
        )];
        handles.extend(tasks::spawn_reaper(
            index.downgrade(),
            index.inner.shutdown.subscribe(),
            options.reap_interval,
            index.inner.span.clone(),
        ));
        handles.extend(tasks::spawn_flusher(
            index.downgrade(),
            index.inner.shutdown.subscribe(),
            options.flush_interval,
            index.inner.span.clone(),
        ));
        *index.inner.handles.lock() = handles;

        index
    }

    pub(crate) fn downgrade(&self) -> WeakIndex {
        WeakIndex {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn cache_name(&self) -> &str {
        &self.inner.cache_name
    }

    pub fn provider(&self) -> &str {
        &self.inner.provider
    }

    /// Replaces the registry background removals lock keys in. Share it with
    /// the writers of this cache.
    pub fn set_locker(&self, locker: NamedLocker) {
        *self.inner.locker.write() = locker;
    }

    // == Totals ==
    /// Sum of the sizes of all tracked objects.
    pub fn cache_size(&self) -> i64 {
        self.inner.cache_size.load(Ordering::Acquire)
    }

    /// Number of tracked objects.
    pub fn object_count(&self) -> i64 {
        self.inner.object_count.load(Ordering::Acquire)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.objects.lock().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.objects.lock().keys().cloned().collect()
    }

    /// Returns a metadata copy of a tracked object.
    pub fn get_object(&self, key: &str) -> Option<Object> {
        self.inner.objects.lock().get(key).map(Object::metadata)
    }

    // == Update Object ==
    /// Inserts or replaces the metadata for `obj.key`. Values are not kept.
    pub fn update_object(&self, obj: &Object) {
        if obj.key.is_empty() || obj.key == INDEX_KEY {
            return;
        }
        {
            let mut objects = self.inner.objects.lock();
            self.insert_locked(&mut objects, obj.metadata());
        }
        self.mark_changed();
    }

    /// Field-wise form of [`Index::update_object`].
    pub fn update_index(
        &self,
        key: &str,
        size: i64,
        last_access: DateTime<Utc>,
        last_write: DateTime<Utc>,
        expiration: Option<DateTime<Utc>>,
    ) {
        self.update_object(&Object {
            key: key.to_string(),
            size,
            expiration,
            last_write,
            last_access,
            value: None,
            reference_value: None,
        });
    }

    /// Sets the last access time of a tracked key to now.
    pub fn update_object_access_time(&self, key: &str) {
        let updated = match self.inner.objects.lock().get_mut(key) {
            Some(obj) => {
                obj.last_access = Utc::now();
                true
            }
            None => false,
        };
        if updated {
            self.mark_changed();
        }
    }

    /// Restarts the TTL of a tracked key from now; zero clears it.
    pub fn update_object_ttl(&self, key: &str, ttl: Duration) {
        let updated = match self.inner.objects.lock().get_mut(key) {
            Some(obj) => {
                obj.expiration = expiration_from_ttl(Utc::now(), ttl);
                true
            }
            None => false,
        };
        if updated {
            self.mark_changed();
        }
    }

    /// Expiration of a tracked key; None if untracked or without TTL.
    pub fn get_expiration(&self, key: &str) -> Option<DateTime<Utc>> {
        self.inner
            .objects
            .lock()
            .get(key)
            .and_then(|obj| obj.expiration)
    }

    /// Returns true if `key` is tracked and its TTL has elapsed.
    pub fn is_expired(&self, key: &str) -> bool {
        self.inner
            .objects
            .lock()
            .get(key)
            .is_some_and(|obj| obj.is_expired(Utc::now()))
    }

    // == Remove ==
    pub fn remove_object(&self, key: &str) {
        self.remove_objects(std::slice::from_ref(&key.to_string()));
    }

    /// Drops metadata for `keys`; untracked keys are ignored.
    pub fn remove_objects(&self, keys: &[String]) {
        let removed = {
            let mut objects = self.inner.objects.lock();
            keys.iter()
                .filter(|key| self.remove_locked(&mut objects, key).is_some())
                .count()
        };
        if removed > 0 {
            self.mark_changed();
        }
    }

    // == Reap ==
    /// Removes expired objects, then evicts least recently accessed objects
    /// while the cache is over its size bounds. Removed keys are deleted
    /// from the backend in the background.
    pub fn reap(&self) {
        let now = Utc::now();
        let options = self.options();

        let (expired, evicted) = {
            let mut objects = self.inner.objects.lock();

            let mut expired = Vec::new();
            let mut remainders = Vec::new();
            for obj in objects.values() {
                if obj.is_expired(now) {
                    expired.push(obj.key.clone());
                } else {
                    remainders.push(Remainder {
                        key: obj.key.clone(),
                        size: obj.size,
                        last_access: obj.last_access,
                    });
                }
            }

            let expired: Vec<(String, i64)> = expired
                .iter()
                .filter_map(|key| self.remove_locked(&mut objects, key))
                .map(|obj| (obj.key, obj.size))
                .collect();

            // Thresholds use the totals left after the TTL pass
            let evicted: Vec<(String, i64)> = self
                .select_evictions(&options, remainders)
                .iter()
                .filter_map(|key| self.remove_locked(&mut objects, key))
                .map(|obj| (obj.key, obj.size))
                .collect();

            (expired, evicted)
        };

        if expired.is_empty() && evicted.is_empty() {
            debug!(parent: &self.inner.span, "reap: nothing to remove");
            return;
        }

        self.mark_changed();
        for (_, size) in expired.iter().chain(evicted.iter()) {
            self.inner.metrics.observe(
                &self.inner.cache_name,
                &self.inner.provider,
                Operation::Evict,
                None,
                *size as usize,
            );
        }
        self.report_usage();

        info!(
            parent: &self.inner.span,
            expired = expired.len(),
            evicted = evicted.len(),
            objects = self.object_count(),
            bytes = self.cache_size(),
            "reap: removed objects"
        );

        let keys = expired
            .into_iter()
            .chain(evicted)
            .map(|(key, _)| key)
            .collect();
        self.queue(IndexTask::Remove(keys));
    }

    fn select_evictions(&self, options: &IndexOptions, mut remainders: Vec<Remainder>) -> Vec<String> {
        let cache_size = self.cache_size();
        let object_count = self.object_count();

        let (needed, by_bytes) = if options.max_size_bytes > 0 && cache_size > options.max_size_bytes
        {
            (
                cache_size - options.max_size_bytes + options.max_size_backoff_bytes.max(0),
                true,
            )
        } else if options.max_size_objects > 0 && object_count > options.max_size_objects {
            (
                object_count - options.max_size_objects + options.max_size_backoff_objects.max(0),
                false,
            )
        } else {
            return Vec::new();
        };

        // Stable sort keeps ties in their scan order
        remainders.sort_by_key(|r| r.last_access);

        let mut freed = 0i64;
        let mut selected = Vec::new();
        for remainder in remainders {
            if freed >= needed {
                break;
            }
            freed += if by_bytes { remainder.size } else { 1 };
            selected.push(remainder.key);
        }

        debug!(
            parent: &self.inner.span,
            by_bytes,
            needed,
            selected = selected.len(),
            "reap: size bound exceeded"
        );
        selected
    }

    // == Flush ==
    /// Persists the index under [`INDEX_KEY`] if it changed since the last
    /// flush. Returns whether a write happened.
    pub async fn flush(&self) -> Result<bool> {
        let generation = self.inner.generation.load(Ordering::Acquire);
        if generation == self.inner.flushed_generation.load(Ordering::Acquire) {
            return Ok(false);
        }

        let data = self.to_bytes()?;
        self.inner
            .client
            .store(INDEX_KEY, &data, INDEX_FLUSH_TTL)
            .await?;
        self.inner
            .flushed_generation
            .store(generation, Ordering::Release);

        debug!(parent: &self.inner.span, bytes = data.len(), "cache index flushed");
        Ok(true)
    }

    // == Serialization ==
    /// Encodes the metadata table in compact binary form.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let objects = self.inner.objects.lock();
        Ok(bincode::serialize(&PersistedIndexRef { objects: &objects })?)
    }

    /// Loads a persisted table, returning the number of objects it tracks
    /// afterwards. Entries are merged into the current table.
    fn load(&self, data: &[u8]) -> Result<usize> {
        let persisted: PersistedIndex = bincode::deserialize(data)?;
        let mut objects = self.inner.objects.lock();
        for (key, mut obj) in persisted.objects {
            if key.is_empty() || key == INDEX_KEY {
                continue;
            }
            obj.key = key;
            self.insert_locked(&mut objects, obj);
        }
        Ok(objects.len())
    }

    // == Options ==
    pub fn options(&self) -> IndexOptions {
        self.inner.options.read().clone()
    }

    /// Replaces the reap/flush/size settings. Running loops pick up the new
    /// intervals on their next cycle; loops disabled at construction stay off.
    pub fn update_options(&self, options: IndexOptions) {
        self.inner.metrics.set_limits(
            &self.inner.cache_name,
            &self.inner.provider,
            options.max_size_objects,
            options.max_size_bytes,
        );
        info!(parent: &self.inner.span, ?options, "cache index options updated");
        *self.inner.options.write() = options;
    }

    // == Close ==
    /// Stops the background loops and waits for them to exit. Pending
    /// background removals may be dropped. No final flush is made.
    pub async fn close(&self) {
        self.inner.shutdown.send_replace(true);
        let handles = std::mem::take(&mut *self.inner.handles.lock());
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(parent: &self.inner.span, error = %err, "cache index task failed");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// Reports current usage to the metrics observer.
    pub fn report_usage(&self) {
        self.inner.metrics.set_usage(
            &self.inner.cache_name,
            &self.inner.provider,
            self.object_count(),
            self.cache_size(),
        );
    }

    // == Background Queue ==
    /// Drops `key` from the index now and from the backend in the background.
    pub(crate) fn expire(&self, key: &str) {
        self.remove_object(key);
        self.queue(IndexTask::Remove(vec![key.to_string()]));
    }

    /// Deletes `keys` from the backend unless they were stored again after
    /// leaving the index. Each key's write lock is held across the check and
    /// the delete, so a concurrent store of the key is never lost. Returns
    /// the number of keys deleted.
    pub(crate) async fn remove_stale(&self, mut keys: Vec<String>) -> Result<usize> {
        keys.sort();
        keys.dedup();
        let locker = self.inner.locker.read().clone();

        let mut locks = Vec::with_capacity(keys.len());
        let mut stale = Vec::with_capacity(keys.len());
        for key in keys {
            let name = lock_name(&self.inner.cache_name, &self.inner.provider, &key);
            let lock = locker.acquire(&name).await?;
            if self.contains(&key) {
                debug!(parent: &self.inner.span, key, "key stored again; background removal skipped");
                continue;
            }
            locks.push(lock);
            stale.push(key);
        }

        if !stale.is_empty() {
            self.inner.client.remove(&stale).await?;
        }
        locks.into_iter().for_each(NamedLock::release);
        Ok(stale.len())
    }

    pub(crate) fn queue(&self, task: IndexTask) {
        if self.inner.queue.send(task).is_err() {
            debug!(parent: &self.inner.span, "index worker stopped; task dropped");
        }
    }

    // == Internals ==
    fn insert_locked(&self, objects: &mut HashMap<String, Object>, obj: Object) {
        let size = obj.size;
        match objects.insert(obj.key.clone(), obj) {
            Some(previous) => {
                self.inner
                    .cache_size
                    .fetch_add(size - previous.size, Ordering::AcqRel);
            }
            None => {
                self.inner.cache_size.fetch_add(size, Ordering::AcqRel);
                self.inner.object_count.fetch_add(1, Ordering::AcqRel);
            }
        }
    }

    fn remove_locked(&self, objects: &mut HashMap<String, Object>, key: &str) -> Option<Object> {
        let removed = objects.remove(key)?;
        self.inner
            .cache_size
            .fetch_sub(removed.size, Ordering::AcqRel);
        self.inner.object_count.fetch_sub(1, Ordering::AcqRel);
        Some(removed)
    }

    fn mark_changed(&self) {
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
    }
}

impl WeakIndex {
    pub(crate) fn upgrade(&self) -> Option<Index> {
        self.inner.upgrade().map(|inner| Index { inner })
    }
}
