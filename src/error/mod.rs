//! Error taxonomy for the caching engine.
//!
//! Setup problems (`ConfigError`) are fatal and returned to the caller of
//! registration. Runtime cache failures (`CacheFailure`) are absorbed at the
//! public boundary: lower layers report them through [`Lookup`] and the
//! engine degrades to a miss.

use thiserror::Error;

/// Fatal configuration problem, raised while the engine is being assembled.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A region mapping names a backend that was never registered.
    #[error("region '{region}' references unknown backend '{backend}'")]
    UnknownBackend { region: String, backend: String },

    /// Two backend configs share a name.
    #[error("backend '{0}' is already registered")]
    DuplicateBackend(String),

    /// The designated default backend was never registered.
    #[error("default backend '{0}' is not registered")]
    UnknownDefault(String),

    /// A distributed backend config has no injected store to talk to.
    #[error("no distributed store was provided for backend '{0}'")]
    MissingStore(String),
}

/// A cache-level failure. Never surfaced from the public read/write surface;
/// carried inside [`Lookup::Error`] so callers that want to distinguish a
/// degraded cache from a plain miss still can.
#[derive(Debug, Clone, Error)]
pub enum CacheFailure {
    /// The value could not be encoded by any supported format.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Stored bytes were corrupt or incompatible with the requested type.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// The backend could not be reached; the circuit breaker has been
    /// notified.
    #[error("backend unavailable: {0}")]
    Backend(String),
}

/// Outcome of a cache read.
///
/// `Error` carries the failure kind so the caller can make a policy decision
/// instead of the engine silently folding everything into a boolean.
#[derive(Debug, Clone)]
pub enum Lookup<T> {
    /// The key was present and decoded to a value.
    Hit(T),
    /// The key was absent (or expired).
    Miss,
    /// The read failed; treat as a miss unless the caller cares why.
    Error(CacheFailure),
}

impl<T> Lookup<T> {
    /// Fold the lookup into an `Option`, discarding the failure kind.
    pub fn into_option(self) -> Option<T> {
        match self {
            Lookup::Hit(value) => Some(value),
            Lookup::Miss | Lookup::Error(_) => None,
        }
    }

    /// True when the lookup produced a value.
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }

    /// Map the hit value, leaving miss/error untouched.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Lookup::Hit(value) => Lookup::Hit(f(value)),
            Lookup::Miss => Lookup::Miss,
            Lookup::Error(e) => Lookup::Error(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_into_option() {
        assert_eq!(Lookup::Hit(1).into_option(), Some(1));
        assert_eq!(Lookup::<i32>::Miss.into_option(), None);
        assert_eq!(
            Lookup::<i32>::Error(CacheFailure::Backend("down".into())).into_option(),
            None
        );
    }

    #[test]
    fn config_error_display_names_the_region() {
        let err = ConfigError::UnknownBackend {
            region: "pages".into(),
            backend: "redis-main".into(),
        };
        assert!(err.to_string().contains("pages"));
        assert!(err.to_string().contains("redis-main"));
    }
}
