//! Distributed byte-store capability.
//!
//! The physical store (redis-alike, memcached-alike, whatever the host
//! runs) is injected behind [`DistributedStore`]; connections and pooling
//! belong to the implementation, not the engine. Failures are transient by
//! classification - the adapter answers them with retries and the circuit
//! breaker, never by surfacing the error.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;

use crate::config::Expiration;

/// Transient failure talking to a distributed store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Shared byte store reached over the network.
#[async_trait]
pub trait DistributedStore: Send + Sync {
    async fn set(&self, key: &str, value: Vec<u8>, expiration: Expiration)
    -> Result<(), StoreError>;
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

struct StoredBytes {
    bytes: Vec<u8>,
    deadline: Instant,
    expiration: Expiration,
}

/// In-memory [`DistributedStore`] for tests and single-process deployments.
/// Expiration is enforced lazily on read; sliding entries get their deadline
/// pushed out by each read.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, StoredBytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .values()
            .filter(|e| e.deadline > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DistributedStore for MemoryStore {
    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        expiration: Expiration,
    ) -> Result<(), StoreError> {
        self.entries.write().insert(
            key.to_string(),
            StoredBytes {
                bytes: value,
                deadline: Instant::now() + expiration.window(),
                expiration,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(key) else {
            return Ok(None);
        };

        if entry.deadline <= Instant::now() {
            entries.remove(key);
            return Ok(None);
        }

        if entry.expiration.is_sliding() {
            entry.deadline = Instant::now() + entry.expiration.window();
        }
        Ok(Some(entry.bytes.clone()))
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_remove_round_trip() {
        let store = MemoryStore::new();
        store
            .set("pages:start", vec![1, 2, 3], Expiration::Absolute(60))
            .await
            .unwrap();

        assert_eq!(store.get("pages:start").await.unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(store.len(), 1);

        store.remove("pages:start").await.unwrap();
        assert_eq!(store.get("pages:start").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn missing_key_is_a_clean_none() {
        let store = MemoryStore::new();
        assert_eq!(store.get("nope").await.unwrap(), None);
    }
}
