//! Configuration surface for the caching engine.
//!
//! The host application deserializes a [`CacheSettings`] tree (JSON, TOML,
//! whatever its config loader speaks) and hands it to the engine builder
//! once at startup. Everything here is plain data and immutable after setup.

use std::time::Duration;

use serde::Deserialize;

/// Default time-to-live applied when a region specifies no policy.
pub const DEFAULT_TTL_SECS: u64 = 300;

/// Default cooldown after a backend failure.
pub const DEFAULT_DISABLE_SECS: u64 = 30;

/// Kind of store backing a backend config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process bounded store; values kept native, no serialization.
    Local,
    /// Shared byte store reached over the network.
    Distributed,
}

/// Expiration policy for a region: sliding or absolute, never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expiration {
    /// TTL refreshed on every read.
    Sliding(u64),
    /// Fixed deadline, seconds from the moment of the write.
    Absolute(u64),
}

impl Default for Expiration {
    fn default() -> Self {
        Self::Absolute(DEFAULT_TTL_SECS)
    }
}

impl Expiration {
    /// The policy's window as a `Duration`.
    pub fn window(&self) -> Duration {
        match self {
            Self::Sliding(secs) | Self::Absolute(secs) => Duration::from_secs(*secs),
        }
    }

    /// True for sliding policies.
    pub fn is_sliding(&self) -> bool {
        matches!(self, Self::Sliding(_))
    }
}

/// Configuration for a single backend. Immutable after setup.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendSettings {
    /// Unique backend name, referenced by region mappings.
    pub name: String,

    /// Local or distributed.
    pub kind: BackendKind,

    /// Opaque connection string for distributed backends. The engine never
    /// interprets it; it is for whoever constructs the store capability.
    #[serde(default)]
    pub connection: Option<String>,

    /// Maximum number of entries (local backends).
    #[serde(default = "default_capacity")]
    pub capacity: u64,

    /// Compress distributed payloads larger than the threshold.
    #[serde(default)]
    pub compression: bool,

    /// Minimum serialized size, in bytes, before compression kicks in.
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: usize,

    /// Replace logical keys with their 32-bit hash before hitting the store.
    #[serde(default)]
    pub hash_keys: bool,

    /// Extra attempts for distributed I/O before the breaker trips.
    #[serde(default)]
    pub retries: u32,

    /// Seconds the backend stays disabled after a failure.
    #[serde(default = "default_disable_secs")]
    pub disable_secs: u64,
}

fn default_capacity() -> u64 {
    10_000
}

fn default_compression_threshold() -> usize {
    1_024
}

fn default_disable_secs() -> u64 {
    DEFAULT_DISABLE_SECS
}

impl BackendSettings {
    /// A local backend with default capacity.
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: BackendKind::Local,
            connection: None,
            capacity: default_capacity(),
            compression: false,
            compression_threshold: default_compression_threshold(),
            hash_keys: false,
            retries: 0,
            disable_secs: DEFAULT_DISABLE_SECS,
        }
    }

    /// A distributed backend; the matching store capability is injected at
    /// engine build time under the same name.
    pub fn distributed(name: impl Into<String>) -> Self {
        Self {
            kind: BackendKind::Distributed,
            ..Self::local(name)
        }
    }

    /// Set the bounded capacity (builder pattern).
    #[must_use]
    pub fn capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }

    /// Enable compression above the given byte threshold.
    #[must_use]
    pub fn compression(mut self, threshold: usize) -> Self {
        self.compression = true;
        self.compression_threshold = threshold;
        self
    }

    /// Hash logical keys before they reach the store.
    #[must_use]
    pub fn hash_keys(mut self) -> Self {
        self.hash_keys = true;
        self
    }

    /// Extra attempts for distributed I/O.
    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Cooldown after a backend failure.
    #[must_use]
    pub fn disable_secs(mut self, secs: u64) -> Self {
        self.disable_secs = secs;
        self
    }

    /// The cooldown as a `Duration`.
    pub fn disable_duration(&self) -> Duration {
        Duration::from_secs(self.disable_secs)
    }
}

/// A region → backend mapping with its expiration policy.
#[derive(Debug, Clone, Deserialize)]
pub struct RegionSettings {
    /// Region name.
    pub name: String,

    /// Backend config name; `None` means the designated default.
    #[serde(default)]
    pub backend: Option<String>,

    /// Expiration policy; `None` means absolute 300s.
    #[serde(default)]
    pub expiration: Option<Expiration>,
}

impl RegionSettings {
    /// A region on the default backend with the default policy.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backend: None,
            expiration: None,
        }
    }

    /// Pin the region to a named backend (builder pattern).
    #[must_use]
    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    /// Set the expiration policy.
    #[must_use]
    pub fn expiration(mut self, expiration: Expiration) -> Self {
        self.expiration = Some(expiration);
        self
    }
}

/// The full settings tree consumed by the engine builder.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    /// Name of the backend used by unmapped regions.
    pub default_backend: String,

    /// All backend configs.
    pub backends: Vec<BackendSettings>,

    /// All region mappings.
    #[serde(default)]
    pub regions: Vec<RegionSettings>,
}

impl CacheSettings {
    /// Settings with a single backend that is also the default.
    pub fn single(backend: BackendSettings) -> Self {
        Self {
            default_backend: backend.name.clone(),
            backends: vec![backend],
            regions: Vec::new(),
        }
    }

    /// Add a backend (builder pattern).
    #[must_use]
    pub fn backend(mut self, backend: BackendSettings) -> Self {
        self.backends.push(backend);
        self
    }

    /// Add a region mapping (builder pattern).
    #[must_use]
    pub fn region(mut self, region: RegionSettings) -> Self {
        self.regions.push(region);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiration_defaults_to_absolute_300() {
        let exp = Expiration::default();
        assert_eq!(exp, Expiration::Absolute(300));
        assert_eq!(exp.window(), Duration::from_secs(300));
        assert!(!exp.is_sliding());
    }

    #[test]
    fn settings_deserialize_from_json() {
        let json = r#"{
            "default_backend": "memory",
            "backends": [
                { "name": "memory", "kind": "local", "capacity": 500 },
                {
                    "name": "shared",
                    "kind": "distributed",
                    "connection": "cache.internal:6380",
                    "compression": true,
                    "compression_threshold": 2048,
                    "hash_keys": true,
                    "retries": 2,
                    "disable_secs": 60
                }
            ],
            "regions": [
                { "name": "pages", "backend": "shared", "expiration": { "sliding": 120 } },
                { "name": "blocks" }
            ]
        }"#;

        let settings: CacheSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.default_backend, "memory");
        assert_eq!(settings.backends.len(), 2);
        assert_eq!(settings.backends[0].capacity, 500);
        assert_eq!(settings.backends[1].kind, BackendKind::Distributed);
        assert_eq!(settings.backends[1].retries, 2);
        assert!(settings.backends[1].hash_keys);
        assert_eq!(settings.regions[0].expiration, Some(Expiration::Sliding(120)));
        assert_eq!(settings.regions[1].backend, None);
    }

    #[test]
    fn builder_methods_compose() {
        let settings = CacheSettings::single(BackendSettings::local("memory"))
            .backend(BackendSettings::distributed("shared").compression(512).retries(1))
            .region(
                RegionSettings::new("pages")
                    .backend("shared")
                    .expiration(Expiration::Absolute(60)),
            );

        assert_eq!(settings.backends.len(), 2);
        assert!(settings.backends[1].compression);
        assert_eq!(settings.regions[0].backend.as_deref(), Some("shared"));
    }
}
