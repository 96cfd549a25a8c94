//! Cache engine facade.
//!
//! Wires the region registry, one backend adapter per config, and the
//! key-lock table into a single object the host application builds once and
//! clones everywhere. Cache-level failures never escape the public surface;
//! factory failures inside `get_or_add` always do.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::backend::{BackendAdapter, DistributedStore};
use crate::codec::CacheValue;
use crate::config::{BackendKind, CacheSettings};
use crate::error::{ConfigError, Lookup};
use crate::keys;
use crate::lock::KeyLockTable;
use crate::registry::RegionRegistry;

/// Region-aware multi-backend cache. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct CacheEngine {
    registry: Arc<RegionRegistry>,
    adapters: Arc<HashMap<String, Arc<BackendAdapter>>>,
    locks: KeyLockTable,
}

impl std::fmt::Debug for CacheEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEngine")
            .field("backends", &self.adapters.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Assembles a [`CacheEngine`] from settings plus injected distributed
/// stores.
pub struct CacheEngineBuilder {
    settings: CacheSettings,
    stores: HashMap<String, Arc<dyn DistributedStore>>,
}

impl CacheEngineBuilder {
    /// Provide the store capability for a distributed backend config of the
    /// same name.
    #[must_use]
    pub fn distributed_store(
        mut self,
        backend: impl Into<String>,
        store: Arc<dyn DistributedStore>,
    ) -> Self {
        self.stores.insert(backend.into(), store);
        self
    }

    /// Validate the settings and assemble the engine.
    pub fn build(self) -> Result<CacheEngine, ConfigError> {
        let registry = Arc::new(RegionRegistry::from_settings(&self.settings)?);

        let mut adapters = HashMap::new();
        for backend in registry.backends() {
            let adapter = match backend.kind {
                BackendKind::Local => BackendAdapter::local(backend.clone()),
                BackendKind::Distributed => {
                    let store = self
                        .stores
                        .get(&backend.name)
                        .cloned()
                        .ok_or_else(|| ConfigError::MissingStore(backend.name.clone()))?;
                    BackendAdapter::distributed(backend.clone(), store)
                }
            };
            adapters.insert(backend.name.clone(), Arc::new(adapter));
        }

        info!("cache engine ready: {} backends", adapters.len());
        Ok(CacheEngine {
            registry,
            adapters: Arc::new(adapters),
            locks: KeyLockTable::new(),
        })
    }
}

impl CacheEngine {
    pub fn builder(settings: CacheSettings) -> CacheEngineBuilder {
        CacheEngineBuilder {
            settings,
            stores: HashMap::new(),
        }
    }

    /// The registry this engine routes through.
    pub fn registry(&self) -> &RegionRegistry {
        &self.registry
    }

    /// False while a region's backend is held disabled by its breaker.
    pub fn backend_enabled(&self, region: &str) -> bool {
        self.adapter(region).circuit_enabled()
    }

    /// Read a value; degraded reads fold into `None`.
    pub async fn try_get<T: CacheValue>(&self, key: &str, region: &str) -> Option<T> {
        match self.lookup(key, region).await {
            Lookup::Hit(value) => Some(value),
            Lookup::Miss => None,
            Lookup::Error(e) => {
                debug!("cache read degraded to a miss for '{}/{}': {}", region, key, e);
                None
            }
        }
    }

    /// Read a value, keeping the failure kind visible.
    pub async fn lookup<T: CacheValue>(&self, key: &str, region: &str) -> Lookup<T> {
        self.adapter(region).try_get(key, region).await
    }

    /// Store a value under the region's expiration policy. Write failures
    /// are logged and absorbed.
    pub async fn store<T: CacheValue>(&self, key: &str, region: &str, value: T) {
        self.store_with(key, region, value, &[]).await;
    }

    /// Store a value and register it as a dependent of the given master
    /// keys (local backends).
    pub async fn store_with<T: CacheValue>(
        &self,
        key: &str,
        region: &str,
        value: T,
        deps: &[&str],
    ) {
        let expiration = self.registry.expiration(region);
        if let Err(e) = self
            .adapter(region)
            .store_with(key, region, value, deps, expiration)
            .await
        {
            warn!("cache write skipped for '{}/{}': {}", region, key, e);
        }
    }

    /// Store raw bytes (image renditions, compiled fragments) under the
    /// Native wire flag.
    pub async fn store_raw(&self, key: &str, region: &str, bytes: &[u8]) {
        let expiration = self.registry.expiration(region);
        if let Err(e) = self
            .adapter(region)
            .store_raw(key, region, bytes, expiration)
            .await
        {
            warn!("cache write skipped for '{}/{}': {}", region, key, e);
        }
    }

    /// Read raw bytes; degraded reads fold into `None`.
    pub async fn try_get_raw(&self, key: &str, region: &str) -> Option<Vec<u8>> {
        self.adapter(region).try_get_raw(key, region).await.into_option()
    }

    /// Remove an entry (and, on local backends, its registered dependents).
    pub async fn remove(&self, key: &str, region: &str) {
        if let Err(e) = self.adapter(region).remove(key, region).await {
            debug!("cache removal skipped for '{}/{}': {}", region, key, e);
        }
    }

    /// Get the cached value, or populate it with at most one concurrent
    /// `factory` call per key.
    ///
    /// Factory errors propagate unchanged; a `None` from the factory is
    /// returned without being stored. Re-entrant populations (a factory that
    /// itself calls into the cache) must go through
    /// [`CacheEngine::get_or_add_at`] with a greater depth.
    pub async fn get_or_add<T, F, Fut>(
        &self,
        key: &str,
        region: &str,
        factory: F,
    ) -> anyhow::Result<Option<T>>
    where
        T: CacheValue,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Option<T>>>,
    {
        self.get_or_add_at(key, region, 0, factory).await
    }

    /// [`CacheEngine::get_or_add`] at an explicit re-entrancy depth.
    ///
    /// Each depth takes its own lock, so a factory at depth `n` may populate
    /// other keys at depth `n + 1` without deadlocking on itself. The price
    /// is that populations of the same key at different depths are not
    /// deduplicated against each other.
    pub async fn get_or_add_at<T, F, Fut>(
        &self,
        key: &str,
        region: &str,
        depth: u32,
        factory: F,
    ) -> anyhow::Result<Option<T>>
    where
        T: CacheValue,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Option<T>>>,
    {
        if let Some(value) = self.try_get(key, region).await {
            return Ok(Some(value));
        }

        let handle = keys::lock_handle(region, key, depth);
        let _guard = self.locks.acquire(handle).await;

        // Double-check: another caller may have populated while we waited.
        if let Some(value) = self.try_get(key, region).await {
            return Ok(Some(value));
        }

        debug!("populating '{}/{}' (depth {})", region, key, depth);
        let produced = factory().await?;
        if let Some(value) = &produced {
            self.store(key, region, value.clone()).await;
        }
        Ok(produced)
    }

    fn adapter(&self, region: &str) -> &Arc<BackendAdapter> {
        let backend = self.registry.resolve_backend(region);
        self.adapters
            .get(&backend.name)
            .expect("an adapter is built for every registered backend")
    }
}
