//! Locks Module
//!
//! Per-key reader/writer locks used to serialize cache operations on the same key.

mod named;

pub use named::{NamedLock, NamedLocker};

/// Builds the lock name for a cache key.
pub fn lock_name(cache_name: &str, provider: &str, key: &str) -> String {
    format!("{}.{}.{}", cache_name, provider, key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_name_format() {
        assert_eq!(lock_name("default", "memory", "k1"), "default.memory.k1");
    }
}
