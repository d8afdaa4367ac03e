//! Process-wide "last interaction" timestamp.
//!
//! Written by every turn and read by the idle scheduler with plain atomic
//! loads and stores, so the turn path never waits on a lock.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

#[derive(Debug)]
pub struct ActivityClock {
    /// Unix nanoseconds
    last_interaction_ns: AtomicI64,
}

impl ActivityClock {
    /// Start the clock as if an interaction just happened
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(at: DateTime<Utc>) -> Self {
        Self {
            last_interaction_ns: AtomicI64::new(to_nanos(at)),
        }
    }

    /// Record an interaction now
    pub fn touch(&self) {
        self.touch_at(Utc::now());
    }

    /// Overwrite the last interaction time
    pub fn touch_at(&self, at: DateTime<Utc>) {
        self.last_interaction_ns.store(to_nanos(at), Ordering::Release);
    }

    pub fn last_interaction(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.last_interaction_ns.load(Ordering::Acquire))
    }

    /// Time since the last interaction; zero if the clock is ahead of `now`
    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_interaction()).to_std().unwrap_or_default()
    }
}

/// Full-precision timestamp, saturating outside 1677..2262
fn to_nanos(at: DateTime<Utc>) -> i64 {
    at.timestamp_nanos_opt().unwrap_or(if at.timestamp() < 0 {
        i64::MIN
    } else {
        i64::MAX
    })
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}
