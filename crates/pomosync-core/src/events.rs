use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timer::Mode;

/// Every state change in an engine produces an Event.
/// The session driver broadcasts them; the CLI prints them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Initialized {
        record_id: String,
        mode: Mode,
        is_running: bool,
        time_remaining: u64,
        at: DateTime<Utc>,
    },
    TimerStarted {
        mode: Mode,
        time_remaining: u64,
        at: DateTime<Utc>,
    },
    TimerPaused {
        mode: Mode,
        time_remaining: u64,
        at: DateTime<Utc>,
    },
    TimerReset {
        mode: Mode,
        time_remaining: u64,
        at: DateTime<Utc>,
    },
    TimerSkipped {
        from: Mode,
        to: Mode,
        sessions_completed: u64,
        at: DateTime<Utc>,
    },
    ModeChanged {
        mode: Mode,
        time_remaining: u64,
        at: DateTime<Utc>,
    },
    /// The running interval reached zero. Followed by an automatic skip
    /// after the grace delay.
    TimerCompleted {
        mode: Mode,
        sessions_completed: u64,
        at: DateTime<Utc>,
    },
    DurationsUpdated {
        work: u64,
        short_break: u64,
        long_break: u64,
        at: DateTime<Utc>,
    },
    /// The watchdog found the cached remaining time off by more than the
    /// tolerance and replaced it.
    DriftCorrected {
        cached: u64,
        derived: u64,
        at: DateTime<Utc>,
    },
    /// A notification from another instance was merged.
    RemoteApplied {
        revision: u64,
        mode: Mode,
        is_running: bool,
        time_remaining: u64,
        kept_local_running: bool,
        at: DateTime<Utc>,
    },
    StateSnapshot {
        mode: Mode,
        is_running: bool,
        time_remaining: u64,
        sessions_completed: u64,
        total: u64,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Initialized { .. } => "initialized",
            Event::TimerStarted { .. } => "timer_started",
            Event::TimerPaused { .. } => "timer_paused",
            Event::TimerReset { .. } => "timer_reset",
            Event::TimerSkipped { .. } => "timer_skipped",
            Event::ModeChanged { .. } => "mode_changed",
            Event::TimerCompleted { .. } => "timer_completed",
            Event::DurationsUpdated { .. } => "durations_updated",
            Event::DriftCorrected { .. } => "drift_corrected",
            Event::RemoteApplied { .. } => "remote_applied",
            Event::StateSnapshot { .. } => "state_snapshot",
        }
    }
}
