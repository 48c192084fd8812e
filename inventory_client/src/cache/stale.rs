//! Expiry computation for cache entries.

use std::{sync::Arc, time::Duration};

use inventory_time::{Time, TimeProvider};
use parking_lot::RwLock;
use rand::Rng;

/// Computes expiry instants as `now + base TTL + jitter`.
///
/// The jitter is drawn uniformly from `[0, base TTL / 10]` so that entries stored together by many
/// clients do not all expire at the same instant.
#[derive(Debug)]
pub struct StaleClock {
    base_ttl: RwLock<Duration>,
    time_provider: Arc<dyn TimeProvider>,
}

impl StaleClock {
    /// Create clock with the given base TTL.
    pub fn new(base_ttl: Duration, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            base_ttl: RwLock::new(base_ttl),
            time_provider,
        }
    }

    /// Current time.
    pub fn now(&self) -> Time {
        self.time_provider.now()
    }

    /// Base TTL applied to newly stored entries.
    pub fn base_ttl(&self) -> Duration {
        *self.base_ttl.read()
    }

    /// Change the base TTL. Expiry instants handed out earlier are unaffected.
    pub fn set_base_ttl(&self, base_ttl: Duration) {
        *self.base_ttl.write() = base_ttl;
    }

    /// Upper bound of the jitter for a base TTL; never below one nanosecond.
    pub fn max_jitter(base_ttl: Duration) -> Duration {
        (base_ttl / 10).max(Duration::from_nanos(1))
    }

    /// Expiry instant for an entry stored now.
    pub fn expiry(&self) -> Time {
        let now = self.now();
        let base_ttl = self.base_ttl();
        let max_jitter = u64::try_from(Self::max_jitter(base_ttl).as_nanos()).unwrap_or(u64::MAX);
        let jitter = Duration::from_nanos(rand::rng().random_range(0..=max_jitter));

        now.checked_add(base_ttl.saturating_add(jitter)).unwrap_or(now)
    }
}
