//! Configuration Module
//!
//! Handles loading and managing server and cache configuration from
//! environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub server_port: u16,
    /// Cache configuration
    pub cache: CacheConfig,
}

/// Configuration of a single named cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// The cache name, used in lock names and metrics
    pub name: String,
    /// The storage provider backing the cache (e.g. `memory`)
    pub provider: String,
    /// Wrap the backend with the index for TTL and size enforcement.
    /// Backends with native expiration leave this off.
    pub use_cache_index: bool,
    /// Index reap/flush/size settings
    pub index: IndexOptions,
}

/// Settings consumed by the cache index and its background loops.
///
/// A zero interval disables the corresponding loop; a zero maximum
/// disables that eviction bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexOptions {
    /// Time between reap passes (zero disables the reaper)
    pub reap_interval: Duration,
    /// Time between index flushes (zero disables the flusher)
    pub flush_interval: Duration,
    /// Byte bound on the cache (zero disables it)
    pub max_size_bytes: i64,
    /// Bytes freed below the byte bound once it is exceeded
    pub max_size_backoff_bytes: i64,
    /// Object bound on the cache (zero disables it)
    pub max_size_objects: i64,
    /// Objects freed below the object bound once it is exceeded
    pub max_size_backoff_objects: i64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `CACHE_NAME` - Cache name (default: default)
    /// - `CACHE_PROVIDER` - Storage provider (default: memory)
    /// - `USE_CACHE_INDEX` - Enable the index (default: true)
    /// - `REAP_INTERVAL_MS` / `FLUSH_INTERVAL_MS` - Loop intervals
    /// - `MAX_SIZE_BYTES`, `MAX_SIZE_BACKOFF_BYTES`,
    ///   `MAX_SIZE_OBJECTS`, `MAX_SIZE_BACKOFF_OBJECTS` - Eviction bounds
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let index = defaults.cache.index;
        Self {
            server_port: env_or("SERVER_PORT", defaults.server_port),
            cache: CacheConfig {
                name: env::var("CACHE_NAME").unwrap_or(defaults.cache.name),
                provider: env::var("CACHE_PROVIDER").unwrap_or(defaults.cache.provider),
                use_cache_index: env_or("USE_CACHE_INDEX", defaults.cache.use_cache_index),
                index: IndexOptions {
                    reap_interval: env_duration_ms("REAP_INTERVAL_MS", index.reap_interval),
                    flush_interval: env_duration_ms("FLUSH_INTERVAL_MS", index.flush_interval),
                    max_size_bytes: env_or("MAX_SIZE_BYTES", index.max_size_bytes),
                    max_size_backoff_bytes: env_or(
                        "MAX_SIZE_BACKOFF_BYTES",
                        index.max_size_backoff_bytes,
                    ),
                    max_size_objects: env_or("MAX_SIZE_OBJECTS", index.max_size_objects),
                    max_size_backoff_objects: env_or(
                        "MAX_SIZE_BACKOFF_OBJECTS",
                        index.max_size_backoff_objects,
                    ),
                },
            },
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_duration_ms(name: &str, default: Duration) -> Duration {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            cache: CacheConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            provider: "memory".to_string(),
            use_cache_index: true,
            index: IndexOptions::default(),
        }
    }
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            reap_interval: Duration::from_secs(3),
            flush_interval: Duration::from_secs(5),
            max_size_bytes: 512 * 1024 * 1024,
            max_size_backoff_bytes: 16 * 1024 * 1024,
            max_size_objects: 0,
            max_size_backoff_objects: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.cache.name, "default");
        assert_eq!(config.cache.provider, "memory");
        assert!(config.cache.use_cache_index);
        assert_eq!(config.cache.index.reap_interval, Duration::from_secs(3));
        assert_eq!(config.cache.index.max_size_objects, 0);
    }

    #[test]
    fn test_config_from_env() {
        // Single test mutates the environment to avoid races between tests
        for name in [
            "SERVER_PORT",
            "CACHE_NAME",
            "CACHE_PROVIDER",
            "USE_CACHE_INDEX",
            "REAP_INTERVAL_MS",
            "FLUSH_INTERVAL_MS",
            "MAX_SIZE_BYTES",
            "MAX_SIZE_BACKOFF_BYTES",
            "MAX_SIZE_OBJECTS",
            "MAX_SIZE_BACKOFF_OBJECTS",
        ] {
            env::remove_var(name);
        }

        let config = Config::from_env();
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.cache.index, IndexOptions::default());

        env::set_var("CACHE_NAME", "tsdb");
        env::set_var("USE_CACHE_INDEX", "false");
        env::set_var("REAP_INTERVAL_MS", "250");
        env::set_var("MAX_SIZE_OBJECTS", "not-a-number");

        let config = Config::from_env();
        assert_eq!(config.cache.name, "tsdb");
        assert!(!config.cache.use_cache_index);
        assert_eq!(config.cache.index.reap_interval, Duration::from_millis(250));
        assert_eq!(config.cache.index.max_size_objects, 0);

        env::remove_var("CACHE_NAME");
        env::remove_var("USE_CACHE_INDEX");
        env::remove_var("REAP_INTERVAL_MS");
        env::remove_var("MAX_SIZE_OBJECTS");
    }
}
