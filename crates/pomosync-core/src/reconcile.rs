//! Reconciliation policy.
//!
//! Decides how a remote notification is merged into the local projection,
//! and when the watchdog should overwrite a cached remaining time.
//!
//! ## Rules
//!
//! ```text
//! remote.revision <= last applied          -> Ignore (echo / reordered delivery)
//! local running, anchor valid, remote idle -> KeepLocalRunning (if enabled)
//! anything else                            -> Adopt (expired remote clamps to idle at 0)
//! ```

use chrono::{DateTime, Utc};

use crate::timer::TimerRecord;

/// Tunables for [`resolve`] and [`drift_exceeds`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilePolicy {
    /// A running instance ignores a remote "stopped" that it did not cause.
    pub local_wins_while_running: bool,
    /// Seconds the cached remaining time may differ from the derived one
    /// before the watchdog corrects it.
    pub drift_tolerance_secs: u64,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            local_wins_while_running: true,
            drift_tolerance_secs: 2,
        }
    }
}

/// Outcome of merging one notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Already applied or older than what we have.
    Ignore,
    /// Keep the local anchor; take everything else from `merged`.
    KeepLocalRunning { merged: TimerRecord, time_remaining: u64 },
    /// Replace local state with `record`.
    Adopt { record: TimerRecord, time_remaining: u64 },
}

/// Merge `remote` into `local` at `now`.
pub fn resolve(
    local: Option<&TimerRecord>,
    last_applied_revision: u64,
    remote: &TimerRecord,
    now: DateTime<Utc>,
    policy: ReconcilePolicy,
) -> Decision {
    if remote.revision <= last_applied_revision {
        return Decision::Ignore;
    }

    if let Some(local) = local {
        let local_remaining = local.remaining_at(now);
        let anchor_valid = local.is_running && local.start_time.is_some() && local_remaining > 0;
        if policy.local_wins_while_running && anchor_valid && !remote.is_running {
            let merged = TimerRecord {
                mode: remote.mode,
                sessions_completed: remote.sessions_completed,
                durations: remote.durations,
                revision: remote.revision,
                updated_by: remote.updated_by.clone(),
                updated: remote.updated,
                ..local.clone()
            };
            return Decision::KeepLocalRunning {
                merged,
                time_remaining: local_remaining,
            };
        }
    }

    let mut record = remote.clone();
    let time_remaining = record.remaining_at(now);
    if record.is_running && time_remaining == 0 {
        record.is_running = false;
        record.start_time = None;
        record.initial_time_remaining = 0;
    }
    Decision::Adopt {
        record,
        time_remaining,
    }
}

/// True when `cached` is off from `derived` by more than the tolerance.
pub fn drift_exceeds(cached: u64, derived: u64, policy: ReconcilePolicy) -> bool {
    cached.abs_diff(derived) > policy.drift_tolerance_secs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::{Durations, Mode};
    use chrono::Duration;

    fn base(now: DateTime<Utc>) -> TimerRecord {
        TimerRecord::seeded("rec".into(), "alice".into(), Durations::default(), now)
    }

    fn running(now: DateTime<Utc>, started_secs_ago: i64, initial: u64, revision: u64) -> TimerRecord {
        TimerRecord {
            is_running: true,
            start_time: Some(now - Duration::seconds(started_secs_ago)),
            initial_time_remaining: initial,
            revision,
            ..base(now)
        }
    }

    #[test]
    fn older_or_equal_revisions_are_ignored() {
        let now = Utc::now();
        let local = running(now, 10, 1500, 5);
        let mut remote = base(now);
        remote.revision = 5;
        assert_eq!(
            resolve(Some(&local), 5, &remote, now, ReconcilePolicy::default()),
            Decision::Ignore
        );
        remote.revision = 3;
        assert_eq!(
            resolve(Some(&local), 5, &remote, now, ReconcilePolicy::default()),
            Decision::Ignore
        );
    }

    #[test]
    fn running_local_keeps_anchor_against_remote_stop() {
        let now = Utc::now();
        let local = running(now, 100, 1500, 2);
        let remote = TimerRecord {
            sessions_completed: 7,
            revision: 3,
            ..base(now)
        };
        match resolve(Some(&local), 2, &remote, now, ReconcilePolicy::default()) {
            Decision::KeepLocalRunning {
                merged,
                time_remaining,
            } => {
                assert!(merged.is_running);
                assert_eq!(merged.start_time, local.start_time);
                assert_eq!(merged.sessions_completed, 7);
                assert_eq!(merged.revision, 3);
                assert_eq!(time_remaining, 1400);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn local_wins_can_be_disabled() {
        let now = Utc::now();
        let local = running(now, 100, 1500, 2);
        let remote = TimerRecord {
            revision: 3,
            initial_time_remaining: 900,
            ..base(now)
        };
        let policy = ReconcilePolicy {
            local_wins_while_running: false,
            ..Default::default()
        };
        match resolve(Some(&local), 2, &remote, now, policy) {
            Decision::Adopt {
                record,
                time_remaining,
            } => {
                assert!(!record.is_running);
                assert_eq!(time_remaining, 900);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn expired_local_anchor_does_not_win() {
        let now = Utc::now();
        let local = running(now, 2000, 1500, 2);
        let remote = TimerRecord {
            mode: Mode::ShortBreak,
            initial_time_remaining: 300,
            revision: 4,
            ..base(now)
        };
        assert!(matches!(
            resolve(Some(&local), 2, &remote, now, ReconcilePolicy::default()),
            Decision::Adopt { time_remaining: 300, .. }
        ));
    }

    #[test]
    fn expired_remote_is_clamped_to_idle() {
        let now = Utc::now();
        let remote = running(now, 60, 30, 9);
        match resolve(None, 0, &remote, now, ReconcilePolicy::default()) {
            Decision::Adopt {
                record,
                time_remaining,
            } => {
                assert_eq!(time_remaining, 0);
                assert!(!record.is_running);
                assert!(record.start_time.is_none());
                assert_eq!(record.initial_time_remaining, 0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn drift_tolerance_is_exclusive() {
        let policy = ReconcilePolicy::default();
        assert!(!drift_exceeds(100, 102, policy));
        assert!(!drift_exceeds(102, 100, policy));
        assert!(drift_exceeds(100, 97, policy));
    }
}
