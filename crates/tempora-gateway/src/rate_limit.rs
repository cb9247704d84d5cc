//! Login attempt throttling.

use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};

/// Checks between sweeps of idle identifiers.
const SWEEP_EVERY: u64 = 1024;

/// Per-identifier limiter on login attempts.
///
/// Identifiers whose quota has fully replenished are dropped every
/// `SWEEP_EVERY` checks, so state stays bounded by the identifiers seen
/// within one quota window.
pub struct LoginRateLimiter {
    limiter: RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>,
    attempts_per_minute: u32,
    checks: AtomicU64,
    sweep_every: u64,
}

impl LoginRateLimiter {
    /// Create a limiter allowing `attempts_per_minute` per identifier.
    #[must_use]
    pub fn new(attempts_per_minute: u32) -> Self {
        let quota =
            Quota::per_minute(NonZeroU32::new(attempts_per_minute).unwrap_or(NonZeroU32::MIN));
        Self {
            limiter: RateLimiter::keyed(quota),
            attempts_per_minute,
            checks: AtomicU64::new(0),
            sweep_every: SWEEP_EVERY,
        }
    }

    /// Record an attempt for `identifier`. Returns whether it is allowed.
    #[must_use]
    pub fn check(&self, identifier: &str) -> bool {
        if (self.checks.fetch_add(1, Ordering::Relaxed) + 1) % self.sweep_every == 0 {
            self.retain_recent();
        }
        self.limiter.check_key(&identifier.to_string()).is_ok()
    }

    /// Drop identifiers whose quota has fully replenished.
    pub fn retain_recent(&self) {
        let before = self.limiter.len();
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
        tracing::debug!(before, after = self.limiter.len(), "Login limiter swept");
    }

    /// Number of identifiers currently tracked.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.limiter.len()
    }
}

impl Default for LoginRateLimiter {
    fn default() -> Self {
        Self::new(10)
    }
}

impl std::fmt::Debug for LoginRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRateLimiter")
            .field("attempts_per_minute", &self.attempts_per_minute)
            .finish_non_exhaustive()
    }
}
