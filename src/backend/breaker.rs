//! Circuit breaker for failing backends.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

/// Per-backend breaker: a failure disables the backend for a cooldown, during
/// which every call short-circuits to a miss without touching the store.
///
/// Transitions are best-effort; a few concurrent callers observing a stale
/// healthy state before the first of them trips the breaker is tolerated.
pub struct CircuitBreaker {
    disable_for: Duration,
    disabled_until: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(disable_for: Duration) -> Self {
        Self {
            disable_for,
            disabled_until: Mutex::new(None),
        }
    }

    /// True when the backend may be called. Flips back to healthy on the
    /// first check after the cooldown has elapsed.
    pub fn enabled(&self) -> bool {
        let mut state = self.disabled_until.lock();
        match *state {
            None => true,
            Some(until) if Instant::now() >= until => {
                info!("backend re-enabled after cooldown");
                *state = None;
                true
            }
            Some(_) => false,
        }
    }

    /// Record a backend failure and start the cooldown.
    pub fn trip(&self) {
        warn!(
            "backend failure, disabling for {:?}",
            self.disable_for
        );
        *self.disabled_until.lock() = Some(Instant::now() + self.disable_for);
    }
}
