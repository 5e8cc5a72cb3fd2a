//! Cache Object Module
//!
//! Defines the index entry tracked for every cached key.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::ReferenceObject;
use crate::error::Result;

// == Object ==
/// Metadata of a single cached key, optionally carrying its value.
///
/// The value and reference value stay owned by the storage backend; the
/// index only keeps the metadata.
#[derive(Clone, Serialize, Deserialize)]
pub struct Object {
    pub key: String,
    /// Size in bytes
    pub size: i64,
    /// Absolute expiration, None = no TTL
    pub expiration: Option<DateTime<Utc>>,
    pub last_write: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    /// Serialized value, if carried
    #[serde(default)]
    pub value: Option<Vec<u8>>,
    /// Live object stored by reference; never serialized
    #[serde(skip)]
    pub reference_value: Option<Arc<dyn ReferenceObject>>,
}

impl Object {
    // == Constructor ==
    /// Creates an object carrying `value`, expiring after `ttl` (zero = never).
    pub fn new(key: impl Into<String>, value: Vec<u8>, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            size: value.len() as i64,
            expiration: expiration_from_ttl(now, ttl),
            last_write: now,
            last_access: now,
            value: Some(value),
            reference_value: None,
        }
    }

    /// Creates an object holding a live reference; its size is whatever the
    /// reference reports.
    pub fn with_reference(
        key: impl Into<String>,
        reference: Arc<dyn ReferenceObject>,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            size: reference.size() as i64,
            expiration: expiration_from_ttl(now, ttl),
            last_write: now,
            last_access: now,
            value: None,
            reference_value: Some(reference),
        }
    }

    // == Metadata ==
    /// Returns a copy without the value or reference.
    pub fn metadata(&self) -> Self {
        Self {
            key: self.key.clone(),
            size: self.size,
            expiration: self.expiration,
            last_write: self.last_write,
            last_access: self.last_access,
            value: None,
            reference_value: None,
        }
    }

    // == Is Expired ==
    /// An object is expired once its expiration lies strictly before `now`.
    /// Objects without a TTL never expire.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration.is_some_and(|expiration| expiration < now)
    }

    /// Remaining time to live, None if the object has no TTL.
    pub fn ttl_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expiration
            .map(|expiration| (expiration - now).to_std().unwrap_or(Duration::ZERO))
    }

    // == Serialization ==
    /// Encodes the object (without reference value) in compact binary form.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(data)?)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("key", &self.key)
            .field("size", &self.size)
            .field("expiration", &self.expiration)
            .field("last_write", &self.last_write)
            .field("last_access", &self.last_access)
            .field("has_value", &self.value.is_some())
            .field("has_reference", &self.reference_value.is_some())
            .finish()
    }
}

// == Utility Functions ==
/// Absolute expiration for a TTL starting at `now`; a zero TTL has none.
pub fn expiration_from_ttl(now: DateTime<Utc>, ttl: Duration) -> Option<DateTime<Utc>> {
    if ttl.is_zero() {
        return None;
    }
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;

    struct Blob(usize);

    impl ReferenceObject for Blob {
        fn size(&self) -> usize {
            self.0
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_object_no_ttl() {
        let obj = Object::new("k", b"value".to_vec(), Duration::ZERO);

        assert_eq!(obj.size, 5);
        assert!(obj.expiration.is_none());
        assert!(!obj.is_expired(Utc::now() + chrono::Duration::days(365)));
        assert!(obj.ttl_remaining(Utc::now()).is_none());
    }

    #[test]
    fn test_object_with_ttl() {
        let obj = Object::new("k", b"value".to_vec(), Duration::from_secs(10));
        let now = Utc::now();

        assert!(!obj.is_expired(now));
        assert!(obj.is_expired(now + chrono::Duration::seconds(11)));

        let remaining = obj.ttl_remaining(now).unwrap();
        assert!(remaining <= Duration::from_secs(10));
        assert!(remaining >= Duration::from_secs(9));
    }

    #[test]
    fn test_expiration_boundary_is_strict() {
        let mut obj = Object::new("k", Vec::new(), Duration::ZERO);
        let now = Utc::now();
        obj.expiration = Some(now);

        // Expiring exactly now is not yet before now
        assert!(!obj.is_expired(now));
        assert!(obj.is_expired(now + chrono::Duration::milliseconds(1)));
        assert_eq!(obj.ttl_remaining(now + chrono::Duration::seconds(1)), Some(Duration::ZERO));
    }

    #[test]
    fn test_reference_size() {
        let obj = Object::with_reference("k", Arc::new(Blob(4096)), Duration::ZERO);
        assert_eq!(obj.size, 4096);
        assert!(obj.value.is_none());
        assert!(obj.reference_value.is_some());
    }

    #[test]
    fn test_metadata_drops_payload() {
        let obj = Object::with_reference("k", Arc::new(Blob(10)), Duration::from_secs(5));
        let meta = obj.metadata();
        assert_eq!(meta.size, 10);
        assert_eq!(meta.expiration, obj.expiration);
        assert!(meta.reference_value.is_none());
    }

    #[test]
    fn test_object_bytes_skip_reference() {
        let obj = Object::with_reference("k", Arc::new(Blob(10)), Duration::ZERO);
        let decoded = Object::from_bytes(&obj.to_bytes().unwrap()).unwrap();

        assert_eq!(decoded.key, "k");
        assert_eq!(decoded.size, 10);
        assert!(decoded.reference_value.is_none());
    }

    #[test]
    fn test_object_from_garbage() {
        assert!(Object::from_bytes(&[0xff, 0x01]).is_err());
    }
}
