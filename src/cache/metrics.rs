//! Cache Metrics Module
//!
//! Observer contract for cache operations plus a counter-based implementation.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use serde::Serialize;

use crate::cache::LookupStatus;

/// Cache operation being observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Store,
    Retrieve,
    Remove,
    Evict,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Store => "set",
            Operation::Retrieve => "get",
            Operation::Remove => "del",
            Operation::Evict => "evict",
        }
    }
}

// == Cache Metrics ==
/// Receives observations from the manager and the index. Purely observational.
pub trait CacheMetrics: Send + Sync {
    /// Counts one operation with its outcome and the bytes it moved.
    fn observe(
        &self,
        cache: &str,
        provider: &str,
        operation: Operation,
        status: Option<LookupStatus>,
        bytes: usize,
    );

    /// Reports current usage.
    fn set_usage(&self, cache: &str, provider: &str, objects: i64, bytes: i64);

    /// Reports configured maxima.
    fn set_limits(&self, cache: &str, provider: &str, max_objects: i64, max_bytes: i64);
}

/// Discards every observation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl CacheMetrics for NoopMetrics {
    fn observe(&self, _: &str, _: &str, _: Operation, _: Option<LookupStatus>, _: usize) {}

    fn set_usage(&self, _: &str, _: &str, _: i64, _: i64) {}

    fn set_limits(&self, _: &str, _: &str, _: i64, _: i64) {}
}

// == Cache Stats ==
/// Tracks cache performance counters with atomics.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    stores: AtomicU64,
    removes: AtomicU64,
    evictions: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    objects: AtomicI64,
    bytes: AtomicI64,
    max_objects: AtomicI64,
    max_bytes: AtomicI64,
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub stores: u64,
    pub removes: u64,
    pub evictions: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub objects: i64,
    pub bytes: i64,
    pub max_objects: i64,
    pub max_bytes: i64,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            objects: self.objects.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            max_objects: self.max_objects.load(Ordering::Relaxed),
            max_bytes: self.max_bytes.load(Ordering::Relaxed),
        }
    }
}

impl StatsSnapshot {
    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 if no lookups have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl CacheMetrics for CacheStats {
    fn observe(
        &self,
        _cache: &str,
        _provider: &str,
        operation: Operation,
        status: Option<LookupStatus>,
        bytes: usize,
    ) {
        let bytes = bytes as u64;
        if status == Some(LookupStatus::Error) {
            self.errors.fetch_add(1, Ordering::Relaxed);
            return;
        }
        match operation {
            Operation::Retrieve => match status {
                Some(LookupStatus::Hit) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
                }
                _ => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                }
            },
            Operation::Store => {
                self.stores.fetch_add(1, Ordering::Relaxed);
                self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
            }
            Operation::Remove => {
                self.removes.fetch_add(1, Ordering::Relaxed);
            }
            Operation::Evict => {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn set_usage(&self, _cache: &str, _provider: &str, objects: i64, bytes: i64) {
        self.objects.store(objects, Ordering::Relaxed);
        self.bytes.store(bytes, Ordering::Relaxed);
    }

    fn set_limits(&self, _cache: &str, _provider: &str, max_objects: i64, max_bytes: i64) {
        self.max_objects.store(max_objects, Ordering::Relaxed);
        self.max_bytes.store(max_bytes, Ordering::Relaxed);
    }
}
