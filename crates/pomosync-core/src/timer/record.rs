//! The durable timer record and the partial updates applied to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::clock::project_remaining;
use super::schedule::{Durations, Mode};

/// Authoritative timer state, one per user.
///
/// Invariant: `is_running == start_time.is_some()`. While running,
/// `initial_time_remaining` is the remaining time as of `start_time`; the
/// live value is always derived with [`TimerRecord::remaining_at`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerRecord {
    pub id: String,
    pub user: String,
    pub mode: Mode,
    pub is_running: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub initial_time_remaining: u64,
    pub sessions_completed: u64,
    pub durations: Durations,
    /// Bumped by the store on every write.
    pub revision: u64,
    /// Instance that issued the last write.
    #[serde(default)]
    pub updated_by: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl TimerRecord {
    /// Fresh record: idle, in `work`, full work duration, revision 1.
    pub fn seeded(id: String, user: String, durations: Durations, now: DateTime<Utc>) -> Self {
        Self {
            id,
            user,
            mode: Mode::Work,
            is_running: false,
            start_time: None,
            initial_time_remaining: durations.work(),
            sessions_completed: 0,
            durations,
            revision: 1,
            updated_by: String::new(),
            created: now,
            updated: now,
        }
    }

    /// Remaining seconds at `now`, derived from the record's own anchor.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> u64 {
        match (self.is_running, self.start_time) {
            (true, Some(start)) => project_remaining(self.initial_time_remaining, start, now),
            _ => self.initial_time_remaining,
        }
    }

    /// Apply the fields present in `patch`. Revision and bookkeeping are the
    /// store's responsibility.
    pub fn apply(&mut self, patch: &RecordPatch) {
        if let Some(mode) = patch.mode {
            self.mode = mode;
        }
        if let Some(is_running) = patch.is_running {
            self.is_running = is_running;
        }
        if let Some(start_time) = patch.start_time {
            self.start_time = start_time;
        }
        if let Some(initial) = patch.initial_time_remaining {
            self.initial_time_remaining = initial;
        }
        if let Some(sessions) = patch.sessions_completed {
            self.sessions_completed = sessions;
        }
        if let Some(durations) = patch.durations {
            self.durations = durations;
        }
        if let Some(ref origin) = patch.updated_by {
            self.updated_by = origin.clone();
        }
    }
}

/// Partial update of a [`TimerRecord`]. `None` leaves a field untouched;
/// `start_time: Some(None)` clears the anchor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<Mode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_running: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<Option<DateTime<Utc>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_time_remaining: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sessions_completed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub durations: Option<Durations>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    /// Compare-and-set precondition: only apply if the stored revision
    /// still equals this value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_revision: Option<u64>,
}

impl RecordPatch {
    /// `{is_running: true, start_time, initial_time_remaining}`.
    pub fn started(start: DateTime<Utc>, initial: u64) -> Self {
        Self {
            is_running: Some(true),
            start_time: Some(Some(start)),
            initial_time_remaining: Some(initial),
            ..Default::default()
        }
    }

    /// `{is_running: false, start_time: null, initial_time_remaining}`.
    pub fn stopped(initial: u64) -> Self {
        Self {
            is_running: Some(false),
            start_time: Some(None),
            initial_time_remaining: Some(initial),
            ..Default::default()
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_sessions(mut self, sessions_completed: u64) -> Self {
        self.sessions_completed = Some(sessions_completed);
        self
    }

    pub fn with_durations(mut self, durations: Durations) -> Self {
        self.durations = Some(durations);
        self
    }

    pub fn by(mut self, origin: &str) -> Self {
        self.updated_by = Some(origin.to_string());
        self
    }

    pub fn if_revision(mut self, revision: u64) -> Self {
        self.if_revision = Some(revision);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.mode.is_none()
            && self.is_running.is_none()
            && self.start_time.is_none()
            && self.initial_time_remaining.is_none()
            && self.sessions_completed.is_none()
            && self.durations.is_none()
    }
}

/// What the presentation layer observes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Projection {
    pub mode: Mode,
    pub is_running: bool,
    pub time_remaining: u64,
    pub sessions_completed: u64,
    pub durations: Durations,
    /// False until a record has been fetched or created.
    pub initialized: bool,
}

impl Default for Projection {
    fn default() -> Self {
        let durations = Durations::default();
        Self {
            mode: Mode::Work,
            is_running: false,
            time_remaining: durations.work(),
            sessions_completed: 0,
            durations,
            initialized: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record() -> TimerRecord {
        TimerRecord::seeded("rec-1".into(), "alice".into(), Durations::default(), Utc::now())
    }

    #[test]
    fn seeded_record_is_idle_work() {
        let rec = record();
        assert_eq!(rec.mode, Mode::Work);
        assert!(!rec.is_running);
        assert!(rec.start_time.is_none());
        assert_eq!(rec.initial_time_remaining, 1500);
        assert_eq!(rec.revision, 1);
    }

    #[test]
    fn apply_started_then_stopped_keeps_invariant() {
        let mut rec = record();
        let start = Utc::now();
        rec.apply(&RecordPatch::started(start, 1200));
        assert!(rec.is_running);
        assert_eq!(rec.start_time, Some(start));
        assert_eq!(rec.remaining_at(start + Duration::seconds(200)), 1000);

        rec.apply(&RecordPatch::stopped(1000).with_mode(Mode::ShortBreak));
        assert!(!rec.is_running);
        assert!(rec.start_time.is_none());
        assert_eq!(rec.mode, Mode::ShortBreak);
        assert_eq!(rec.remaining_at(start + Duration::hours(1)), 1000);
    }

    #[test]
    fn empty_patch_changes_nothing() {
        let mut rec = record();
        let before = rec.clone();
        let patch = RecordPatch::default().if_revision(1);
        assert!(patch.is_empty());
        rec.apply(&patch);
        assert_eq!(rec, before);
    }

    #[test]
    fn patch_json_omits_untouched_fields() {
        let json = serde_json::to_value(RecordPatch::stopped(42)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"isRunning": false, "startTime": null, "initialTimeRemaining": 42})
        );
    }
}
