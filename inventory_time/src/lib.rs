//! Time abstractions for the inventory client.
//!
//! All expiry decisions go through a [`TimeProvider`] so that tests can drive time with a
//! [`MockProvider`] instead of sleeping.
#![warn(missing_docs)]

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use std::{
    fmt::{Debug, Display},
    ops::Add,
    time::Duration,
};

/// A UTC timestamp with nanosecond precision.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Time(DateTime<Utc>);

impl Add<Duration> for Time {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        self.checked_add(rhs).expect("overflow adding duration to time")
    }
}

impl Display for Time {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl Time {
    /// Makes a new `Time` from the number of non-leap nanoseconds
    /// since January 1, 1970 0:00:00 UTC (aka "UNIX timestamp").
    pub fn from_timestamp_nanos(nanos: i64) -> Self {
        Self(Utc.timestamp_nanos(nanos))
    }

    /// Returns `self + duration`, or `None` on overflow.
    pub fn checked_add(&self, duration: Duration) -> Option<Self> {
        let duration = chrono::Duration::from_std(duration).ok()?;
        self.0.checked_add_signed(duration).map(Self)
    }

    /// Returns the amount of time elapsed from another time to this one,
    /// or `None` if that time is later than this one.
    pub fn checked_duration_since(&self, other: Self) -> Option<Duration> {
        (self.0 - other.0).to_std().ok()
    }
}

/// Source of the current time.
pub trait TimeProvider: Debug + Send + Sync + 'static {
    /// Returns the current `Time`. No guarantees are made about monotonicity
    fn now(&self) -> Time;
}

/// A [`TimeProvider`] that uses [`Utc::now`] as a clock source
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProvider {}

impl SystemProvider {
    /// Create new system time provider.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TimeProvider for SystemProvider {
    fn now(&self) -> Time {
        Time(Utc::now())
    }
}

/// A [`TimeProvider`] that returns a fixed `Time` that is advanced by [`MockProvider::inc`].
#[derive(Debug)]
pub struct MockProvider {
    now: RwLock<Time>,
}

impl MockProvider {
    /// Create a new [`MockProvider`] that returns the provided `Time`
    pub fn new(start: Time) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Increments the time returned by [`TimeProvider::now`] by the provided duration
    pub fn inc(&self, duration: Duration) -> Time {
        let mut now = self.now.write();
        *now = *now + duration;
        *now
    }
}

impl TimeProvider for MockProvider {
    fn now(&self) -> Time {
        *self.now.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_provider() {
        let start = Time::from_timestamp_nanos(0);
        let provider = MockProvider::new(start);
        assert_eq!(provider.now(), start);

        let t = provider.inc(Duration::from_secs(1));
        assert_eq!(t, provider.now());
        assert_eq!(t.checked_duration_since(start), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_duration_since() {
        let a = Time::from_timestamp_nanos(1_000);
        let b = a + Duration::from_nanos(500);

        assert_eq!(b.checked_duration_since(a), Some(Duration::from_nanos(500)));
        assert_eq!(a.checked_duration_since(b), None);
    }

    #[test]
    fn test_overflow() {
        let t = Time::from_timestamp_nanos(0);
        assert_eq!(t.checked_add(Duration::MAX), None);
    }

    #[test]
    fn test_system_provider_advances() {
        let provider = SystemProvider::new();
        let a = provider.now();
        let b = provider.now();
        assert!(b >= a);
    }
}
