//! Cache Index - caching core of a reverse-proxy accelerator
//!
//! Provides named per-key locks, a cache index with TTL and size-bounded LRU
//! eviction that persists itself, and a manager that exposes the uniform
//! cache operations over pluggable storage backends.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod locks;
pub mod models;
mod tasks;

pub use api::AppState;
pub use cache::{CacheManager, Client, Index, ReferenceClient, ReferenceObject};
pub use config::{CacheConfig, Config, IndexOptions};
pub use error::{CacheError, Result};
pub use locks::{NamedLock, NamedLocker};
