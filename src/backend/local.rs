//! Local bounded store capability and its moka-backed implementation.

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::Expiry;
use moka::sync::Cache;

use crate::config::Expiration;

/// A value as kept by local backends: native, type-erased, never serialized.
pub type NativeValue = Arc<dyn Any + Send + Sync>;

/// One stored value plus the policy that governs its lifetime.
#[derive(Clone)]
pub struct LocalEntry {
    pub value: NativeValue,
    pub expiration: Expiration,
}

/// In-process bounded key/value store. Implementations own eviction and
/// expiration; the adapter only hands them the per-entry policy.
pub trait LocalStore: Send + Sync {
    fn set(&self, key: String, value: NativeValue, expiration: Expiration);
    fn get(&self, key: &str) -> Option<NativeValue>;
    fn remove(&self, key: &str);
}

/// Per-entry expiry: absolute policies run out from creation, sliding ones
/// are refreshed on every read.
struct PolicyExpiry;

impl Expiry<String, LocalEntry> for PolicyExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &LocalEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(entry.expiration.window())
    }

    fn expire_after_read(
        &self,
        _key: &String,
        entry: &LocalEntry,
        _read_at: Instant,
        duration_until_expiry: Option<Duration>,
        _last_modified_at: Instant,
    ) -> Option<Duration> {
        if entry.expiration.is_sliding() {
            Some(entry.expiration.window())
        } else {
            duration_until_expiry
        }
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &LocalEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.expiration.window())
    }
}

/// Default local store backed by `moka::sync::Cache`.
///
/// Cloning is cheap and shares the underlying cache.
#[derive(Clone)]
pub struct MokaStore {
    inner: Cache<String, LocalEntry>,
}

impl MokaStore {
    pub fn new(capacity: u64) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(capacity)
                .expire_after(PolicyExpiry)
                .build(),
        }
    }
}

impl LocalStore for MokaStore {
    fn set(&self, key: String, value: NativeValue, expiration: Expiration) {
        self.inner.insert(key, LocalEntry { value, expiration });
    }

    fn get(&self, key: &str) -> Option<NativeValue> {
        self.inner.get(key).map(|entry| entry.value)
    }

    fn remove(&self, key: &str) {
        self.inner.invalidate(key);
    }
}
