//! Clock port for injectable time sources.
//!
//! The summarisation recency window, session TTL, and quota reset dates all
//! depend on wall-clock time. Components take an `Arc<dyn Clock>` so tests can
//! pin time deterministically.

use std::sync::Arc;

use super::Timestamp;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Returns the current moment.
    fn now(&self) -> Timestamp;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Test clock that returns a fixed, manually advanced instant.
#[derive(Debug, Default)]
pub struct FixedClock {
    now: std::sync::Mutex<Option<Timestamp>>,
}

impl FixedClock {
    /// Creates a clock pinned at the given instant.
    pub fn at(ts: Timestamp) -> Arc<Self> {
        Arc::new(Self {
            now: std::sync::Mutex::new(Some(ts)),
        })
    }

    /// Moves the clock to a new instant.
    pub fn set(&self, ts: Timestamp) {
        *self.now.lock().unwrap() = Some(ts);
    }

    /// Advances the clock by the given number of seconds.
    pub fn advance_secs(&self, secs: u64) {
        let mut guard = self.now.lock().unwrap();
        let current = guard.unwrap_or_else(Timestamp::now);
        *guard = Some(current.plus_secs(secs));
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        self.now.lock().unwrap().unwrap_or_else(Timestamp::now)
    }
}
