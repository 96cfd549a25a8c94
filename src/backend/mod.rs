//! Backend adapter - uniform store/get/remove over both backend kinds.
//!
//! One adapter per backend config. Local backends keep native values and
//! support dependency cascades; distributed backends run every value through
//! the serialization pipeline and sit behind a circuit breaker with
//! configurable retries.

mod breaker;
mod distributed;
mod local;

pub use breaker::CircuitBreaker;
pub use distributed::{DistributedStore, MemoryStore, StoreError};
pub use local::{LocalEntry, LocalStore, MokaStore, NativeValue};

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::codec::{CacheValue, SerializationPipeline};
use crate::config::{BackendSettings, Expiration};
use crate::error::{CacheFailure, Lookup};
use crate::keys;

enum Route {
    Local {
        store: Arc<dyn LocalStore>,
        /// master physical key -> physical keys evicted along with it
        dependents: DashMap<String, Vec<String>>,
    },
    Distributed {
        store: Arc<dyn DistributedStore>,
        pipeline: SerializationPipeline,
        breaker: CircuitBreaker,
    },
}

/// Routes cache traffic for one backend config.
pub struct BackendAdapter {
    settings: Arc<BackendSettings>,
    route: Route,
}

impl BackendAdapter {
    /// Local adapter with the default moka store.
    pub fn local(settings: Arc<BackendSettings>) -> Self {
        let store = Arc::new(MokaStore::new(settings.capacity));
        Self::local_with_store(settings, store)
    }

    /// Local adapter over a custom store implementation.
    pub fn local_with_store(settings: Arc<BackendSettings>, store: Arc<dyn LocalStore>) -> Self {
        Self {
            settings,
            route: Route::Local {
                store,
                dependents: DashMap::new(),
            },
        }
    }

    /// Distributed adapter over an injected byte store.
    pub fn distributed(settings: Arc<BackendSettings>, store: Arc<dyn DistributedStore>) -> Self {
        let pipeline = SerializationPipeline::from_settings(&settings);
        let breaker = CircuitBreaker::new(settings.disable_duration());
        Self {
            settings,
            route: Route::Distributed {
                store,
                pipeline,
                breaker,
            },
        }
    }

    pub fn settings(&self) -> &BackendSettings {
        &self.settings
    }

    /// False while the circuit breaker holds the backend disabled. Local
    /// backends are always enabled.
    pub fn circuit_enabled(&self) -> bool {
        match &self.route {
            Route::Local { .. } => true,
            Route::Distributed { breaker, .. } => breaker.enabled(),
        }
    }

    /// Store a value under `(region, key)`.
    pub async fn store<T: CacheValue>(
        &self,
        key: &str,
        region: &str,
        value: T,
        expiration: Expiration,
    ) -> Result<(), CacheFailure> {
        self.store_with(key, region, value, &[], expiration).await
    }

    /// Store a value, registering it as a dependent of the given master
    /// keys: removing a master also removes this entry. Local backends only;
    /// distributed backends ignore the dependency list.
    pub async fn store_with<T: CacheValue>(
        &self,
        key: &str,
        region: &str,
        value: T,
        deps: &[&str],
        expiration: Expiration,
    ) -> Result<(), CacheFailure> {
        let physical = self.physical(region, key);
        match &self.route {
            Route::Local { store, dependents } => {
                for dep in deps {
                    dependents
                        .entry(self.physical(region, dep))
                        .or_default()
                        .push(physical.clone());
                }
                let native: NativeValue = Arc::new(value);
                store.set(physical, native, expiration);
                Ok(())
            }
            Route::Distributed {
                store,
                pipeline,
                breaker,
            } => {
                if !deps.is_empty() {
                    debug!(
                        "dependency tracking is local-only; ignoring {} deps for '{}'",
                        deps.len(),
                        physical
                    );
                }
                let bytes = pipeline.encode(&value)?;
                self.write_bytes(store, breaker, &physical, bytes, expiration)
                    .await
            }
        }
    }

    /// Store raw bytes under the Native wire flag.
    pub async fn store_raw(
        &self,
        key: &str,
        region: &str,
        bytes: &[u8],
        expiration: Expiration,
    ) -> Result<(), CacheFailure> {
        let physical = self.physical(region, key);
        match &self.route {
            Route::Local { store, .. } => {
                let native: NativeValue = Arc::new(bytes.to_vec());
                store.set(physical, native, expiration);
                Ok(())
            }
            Route::Distributed {
                store,
                pipeline,
                breaker,
            } => {
                let framed = pipeline.encode_raw(bytes);
                self.write_bytes(store, breaker, &physical, framed, expiration)
                    .await
            }
        }
    }

    /// Read a value. The explicit [`Lookup`] keeps degraded reads
    /// distinguishable from plain misses.
    pub async fn try_get<T: CacheValue>(&self, key: &str, region: &str) -> Lookup<T> {
        let physical = self.physical(region, key);
        match &self.route {
            Route::Local { store, .. } => match store.get(&physical) {
                Some(native) => match native.downcast_ref::<T>() {
                    Some(value) => Lookup::Hit(value.clone()),
                    None => {
                        debug!("stored type mismatch for '{}', treating as miss", physical);
                        Lookup::Miss
                    }
                },
                None => Lookup::Miss,
            },
            Route::Distributed {
                store,
                pipeline,
                breaker,
            } => match self.read_bytes(store, breaker, &physical).await {
                Lookup::Hit(bytes) => match pipeline.decode(&bytes) {
                    Ok(value) => Lookup::Hit(value),
                    Err(e) => Lookup::Error(e),
                },
                Lookup::Miss => Lookup::Miss,
                Lookup::Error(e) => Lookup::Error(e),
            },
        }
    }

    /// Read raw bytes stored with [`BackendAdapter::store_raw`].
    pub async fn try_get_raw(&self, key: &str, region: &str) -> Lookup<Vec<u8>> {
        let physical = self.physical(region, key);
        match &self.route {
            Route::Local { store, .. } => match store.get(&physical) {
                Some(native) => match native.downcast_ref::<Vec<u8>>() {
                    Some(bytes) => Lookup::Hit(bytes.clone()),
                    None => Lookup::Miss,
                },
                None => Lookup::Miss,
            },
            Route::Distributed {
                store,
                pipeline,
                breaker,
            } => match self.read_bytes(store, breaker, &physical).await {
                Lookup::Hit(framed) => match pipeline.decode_raw(&framed) {
                    Ok(bytes) => Lookup::Hit(bytes),
                    Err(e) => Lookup::Error(e),
                },
                Lookup::Miss => Lookup::Miss,
                Lookup::Error(e) => Lookup::Error(e),
            },
        }
    }

    /// Remove an entry. On local backends the removal cascades to every key
    /// registered as a dependent of the removed one.
    pub async fn remove(&self, key: &str, region: &str) -> Result<(), CacheFailure> {
        let physical = self.physical(region, key);
        match &self.route {
            Route::Local { store, dependents } => {
                let mut stack = vec![physical];
                while let Some(k) = stack.pop() {
                    store.remove(&k);
                    if let Some((_, deps)) = dependents.remove(&k) {
                        stack.extend(deps);
                    }
                }
                Ok(())
            }
            Route::Distributed { store, breaker, .. } => {
                if !breaker.enabled() {
                    return Err(self.disabled_failure());
                }
                match self.retry(|| store.remove(&physical)).await {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        breaker.trip();
                        Err(CacheFailure::Backend(e.to_string()))
                    }
                }
            }
        }
    }

    fn physical(&self, region: &str, key: &str) -> String {
        keys::physical_key(region, key, self.settings.hash_keys)
    }

    fn disabled_failure(&self) -> CacheFailure {
        CacheFailure::Backend(format!("backend '{}' is disabled", self.settings.name))
    }

    async fn write_bytes(
        &self,
        store: &Arc<dyn DistributedStore>,
        breaker: &CircuitBreaker,
        key: &str,
        bytes: Vec<u8>,
        expiration: Expiration,
    ) -> Result<(), CacheFailure> {
        if !breaker.enabled() {
            return Err(self.disabled_failure());
        }
        match self
            .retry(|| store.set(key, bytes.clone(), expiration))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                breaker.trip();
                Err(CacheFailure::Backend(e.to_string()))
            }
        }
    }

    async fn read_bytes(
        &self,
        store: &Arc<dyn DistributedStore>,
        breaker: &CircuitBreaker,
        key: &str,
    ) -> Lookup<Vec<u8>> {
        if !breaker.enabled() {
            return Lookup::Error(self.disabled_failure());
        }
        match self.retry(|| store.get(key)).await {
            Ok(Some(bytes)) => Lookup::Hit(bytes),
            Ok(None) => Lookup::Miss,
            Err(e) => {
                breaker.trip();
                Lookup::Error(CacheFailure::Backend(e.to_string()))
            }
        }
    }

    async fn retry<T, F, Fut>(&self, op: F) -> Result<T, StoreError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.settings.retries => {
                    attempt += 1;
                    debug!(
                        "backend '{}' attempt {} failed, retrying: {}",
                        self.settings.name, attempt, e
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}
