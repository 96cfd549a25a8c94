//! Region registry - maps logical cache regions to backend configs.
//!
//! Built once at startup, validated eagerly, then shared immutably. A region
//! either names a registered backend or falls back to the designated
//! default; the same fallback covers lookups against the empty region.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::{BackendSettings, CacheSettings, Expiration, RegionSettings};
use crate::error::ConfigError;

/// A region's resolved binding.
#[derive(Debug, Clone)]
struct RegionBinding {
    backend: String,
    expiration: Expiration,
}

/// Registry of backend configs and region mappings. Immutable after setup;
/// share it with `Arc`.
#[derive(Debug)]
pub struct RegionRegistry {
    backends: HashMap<String, Arc<BackendSettings>>,
    regions: HashMap<String, RegionBinding>,
    default_backend: String,
}

impl RegionRegistry {
    /// An empty registry whose unmapped regions will resolve to
    /// `default_backend`. The default must be registered before the first
    /// resolve; [`RegionRegistry::from_settings`] enforces this.
    pub fn new(default_backend: impl Into<String>) -> Self {
        Self {
            backends: HashMap::new(),
            regions: HashMap::new(),
            default_backend: default_backend.into(),
        }
    }

    /// Build and validate a registry from the full settings tree.
    pub fn from_settings(settings: &CacheSettings) -> Result<Self, ConfigError> {
        let mut registry = Self::new(settings.default_backend.clone());

        for backend in &settings.backends {
            registry.register_backend(backend.clone())?;
        }

        if !registry.backends.contains_key(&registry.default_backend) {
            return Err(ConfigError::UnknownDefault(registry.default_backend));
        }

        for region in &settings.regions {
            registry.register_region(region.clone())?;
        }

        info!(
            "region registry ready: {} backends, {} regions, default '{}'",
            registry.backends.len(),
            registry.regions.len(),
            registry.default_backend
        );
        Ok(registry)
    }

    /// Register a backend config.
    pub fn register_backend(&mut self, settings: BackendSettings) -> Result<(), ConfigError> {
        if self.backends.contains_key(&settings.name) {
            return Err(ConfigError::DuplicateBackend(settings.name));
        }
        debug!("registered backend '{}' ({:?})", settings.name, settings.kind);
        self.backends
            .insert(settings.name.clone(), Arc::new(settings));
        Ok(())
    }

    /// Register a region mapping. Fails when the named backend was never
    /// registered.
    pub fn register_region(&mut self, region: RegionSettings) -> Result<(), ConfigError> {
        let backend = region
            .backend
            .unwrap_or_else(|| self.default_backend.clone());

        if !self.backends.contains_key(&backend) {
            return Err(ConfigError::UnknownBackend {
                region: region.name,
                backend,
            });
        }

        debug!("registered region '{}' -> '{}'", region.name, backend);
        self.regions.insert(
            region.name,
            RegionBinding {
                backend,
                expiration: region.expiration.unwrap_or_default(),
            },
        );
        Ok(())
    }

    /// The backend config serving a region. Unmapped regions (and the empty
    /// region) resolve to the default.
    pub fn resolve_backend(&self, region: &str) -> &Arc<BackendSettings> {
        self.regions
            .get(region)
            .and_then(|binding| self.backends.get(&binding.backend))
            .unwrap_or_else(|| {
                self.backends
                    .get(&self.default_backend)
                    .expect("default backend is validated at setup")
            })
    }

    /// The expiration policy for a region; unmapped regions get the 300s
    /// absolute default.
    pub fn expiration(&self, region: &str) -> Expiration {
        self.regions
            .get(region)
            .map(|binding| binding.expiration)
            .unwrap_or_default()
    }

    /// All registered backend configs.
    pub fn backends(&self) -> impl Iterator<Item = &Arc<BackendSettings>> {
        self.backends.values()
    }

    /// The designated default backend name.
    pub fn default_backend(&self) -> &str {
        &self.default_backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;

    fn settings() -> CacheSettings {
        CacheSettings::single(BackendSettings::local("memory"))
            .backend(BackendSettings::distributed("shared"))
            .region(
                RegionSettings::new("pages")
                    .backend("shared")
                    .expiration(Expiration::Sliding(120)),
            )
    }

    #[test]
    fn mapped_region_resolves_to_its_backend() {
        let registry = RegionRegistry::from_settings(&settings()).unwrap();
        let backend = registry.resolve_backend("pages");
        assert_eq!(backend.name, "shared");
        assert_eq!(backend.kind, BackendKind::Distributed);
        assert_eq!(registry.expiration("pages"), Expiration::Sliding(120));
    }

    #[test]
    fn unmapped_region_falls_back_to_the_default() {
        let registry = RegionRegistry::from_settings(&settings()).unwrap();
        assert_eq!(registry.resolve_backend("never-mapped").name, "memory");
        assert_eq!(registry.resolve_backend("").name, "memory");
        assert_eq!(
            registry.expiration("never-mapped"),
            Expiration::Absolute(300)
        );
    }

    #[test]
    fn region_against_unknown_backend_fails_setup() {
        let bad = settings().region(RegionSettings::new("broken").backend("nope"));
        let err = RegionRegistry::from_settings(&bad).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownBackend { .. }));
    }

    #[test]
    fn unknown_default_backend_fails_setup() {
        let mut bad = settings();
        bad.default_backend = "missing".into();
        let err = RegionRegistry::from_settings(&bad).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownDefault(_)));
    }

    #[test]
    fn duplicate_backend_name_fails_setup() {
        let bad = settings().backend(BackendSettings::local("memory"));
        let err = RegionRegistry::from_settings(&bad).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateBackend(_)));
    }

    #[test]
    fn region_without_backend_binds_to_the_default() {
        let with_default_region = settings().region(RegionSettings::new("blocks"));
        let registry = RegionRegistry::from_settings(&with_default_region).unwrap();
        assert_eq!(registry.resolve_backend("blocks").name, "memory");
    }
}
