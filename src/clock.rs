//! Time source abstraction used for all expiry math.
//!
//! The engine never reads the system clock directly; everything goes
//! through a [`Clock`] so expiry behavior is testable and simulatable.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

/// Provides the current time to the engine, store and parser.
pub trait Clock: Send + Sync {
    /// Current wall-clock time in UTC.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Deterministic clock for tests and host-driven simulation.
///
/// Holds a unix timestamp that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    unix_seconds: AtomicI64,
}

impl ManualClock {
    /// Create a clock pinned to the given unix timestamp.
    #[must_use]
    pub fn new(unix_seconds: i64) -> Self {
        Self {
            unix_seconds: AtomicI64::new(unix_seconds),
        }
    }

    /// Create a clock starting at the current system time.
    #[must_use]
    pub fn starting_now() -> Self {
        Self::new(Utc::now().timestamp())
    }

    /// Advance the clock by `seconds` (may be negative).
    pub fn advance(&self, seconds: i64) {
        self.unix_seconds.fetch_add(seconds, Ordering::SeqCst);
    }

    /// Pin the clock to an absolute unix timestamp.
    pub fn set(&self, unix_seconds: i64) {
        self.unix_seconds.store(unix_seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.unix_seconds.load(Ordering::SeqCst), 0)
            .unwrap_or_else(Utc::now)
    }
}
