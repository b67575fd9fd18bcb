//! Wall-clock sources.
//!
//! The engine never counts pulses; it asks a [`Clock`] for the current wall
//! time and derives the remaining time from the stored anchor. Production
//! uses [`SystemClock`]; tests and simulations use [`ManualClock`] and move
//! time explicitly.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

/// Source of wall-clock time.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// Real wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock. Clones share the same instant, so several
/// engines in one test observe the same "now".
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Clock frozen at the current system time.
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance(Duration::seconds(secs));
    }

    pub fn advance_ms(&self, ms: i64) {
        self.advance(Duration::milliseconds(ms));
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// `max(0, initial - floor((now - start) / 1s))`.
///
/// A start time in the future (clock skew between instances) counts as zero
/// elapsed time, so the projection never exceeds `initial`.
pub fn project_remaining(initial: u64, start: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let elapsed_ms = (now - start).num_milliseconds().max(0);
    let elapsed_secs = (elapsed_ms / 1000) as u64;
    initial.saturating_sub(elapsed_secs)
}
