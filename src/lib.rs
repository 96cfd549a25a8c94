//! Cairn - Region-Aware Caching Engine
//!
//! A multi-backend cache for content delivery services: named regions route
//! to local or distributed backends, population is stampede-protected, and
//! failing backends degrade to recomputation instead of request failures.
//!
//! ## Architecture
//!
//! - `config` - Settings surface (backends, regions, expiration policies)
//! - `registry` - Region -> backend resolution with a designated default
//! - `backend` - Uniform adapter over local (moka) and distributed stores,
//!   with per-backend circuit breaking and retries
//! - `codec` - Format-negotiating serialization with gzip compression
//! - `lock` - Per-key mutual exclusion for cache population
//! - `engine` - The `CacheEngine` facade applications build and clone
//! - `pager` - Offset -> cursor translation for paginated upstream queries
//! - `keys` - Keyed 32-bit hashing for key normalization and lock handles
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cairn::backend::MemoryStore;
//! use cairn::config::{BackendSettings, CacheSettings, Expiration, RegionSettings};
//! use cairn::engine::CacheEngine;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let settings = CacheSettings::single(BackendSettings::local("memory"))
//!     .backend(BackendSettings::distributed("shared").compression(1024))
//!     .region(RegionSettings::new("pages").backend("shared").expiration(Expiration::Sliding(120)));
//!
//! let engine = CacheEngine::builder(settings)
//!     .distributed_store("shared", Arc::new(MemoryStore::new()))
//!     .build()?;
//!
//! let page: Option<String> = engine
//!     .get_or_add("start", "pages", || async {
//!         Ok(Some("rendered page".to_string()))
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod keys;
pub mod lock;
pub mod pager;
pub mod registry;

pub use backend::{BackendAdapter, DistributedStore, LocalStore, MemoryStore, StoreError};
pub use codec::{CacheValue, SerializationPipeline};
pub use config::{BackendKind, BackendSettings, CacheSettings, Expiration, RegionSettings};
pub use engine::{CacheEngine, CacheEngineBuilder};
pub use error::{CacheFailure, ConfigError, Lookup};
pub use pager::{CursorIndex, MemorySessionStore, SessionStore};
pub use registry::RegionRegistry;
