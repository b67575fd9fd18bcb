//! Clock engine.
//!
//! The engine owns one user's timer record and derives the remaining time
//! from the record's wall-clock anchor. It has no threads or timers of its
//! own: the session driver calls `tick()` on every pulse, `watchdog_check()`
//! on a slower interval and `finish_completion()` once the grace delay after
//! an expiry has elapsed.
//!
//! ## State Transitions
//!
//! ```text
//! Idle --start--> Running --pause--> Idle
//! Idle --reset--> Idle(full)
//! {Idle, Running} --skip--> Idle(next mode, full)
//! Idle --change_mode--> Idle(new mode, full)
//! Running --tick @ 0--> Idle(0) --grace--> skip
//! ```
//!
//! Every action persists first and then applies locally. A failed write is
//! logged, the optimistic local state is kept and the engine is marked
//! dirty; the next successful write (or `flush_if_dirty`) sends the whole
//! local state.

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::clock::Clock;
use super::record::{Projection, RecordPatch, TimerRecord};
use super::schedule::{Durations, Mode, DEFAULT_CYCLE_LENGTH};
use crate::error::{StoreError, ValidationError};
use crate::events::Event;
use crate::hooks::CompletionHook;
use crate::reconcile::{self, Decision, ReconcilePolicy};
use crate::store::RemoteStore;

/// Per-instance engine settings.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub user: String,
    /// Durations for a record created on first use.
    pub defaults: Durations,
    /// Work sessions per long break.
    pub cycle_length: u32,
    pub policy: ReconcilePolicy,
    /// Stamped into `updated_by` on every write.
    pub instance_id: String,
}

impl EngineOptions {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            ..Default::default()
        }
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            user: "local".to_string(),
            defaults: Durations::default(),
            cycle_length: DEFAULT_CYCLE_LENGTH,
            policy: ReconcilePolicy::default(),
            instance_id: format!("pomosync-{}", Uuid::new_v4()),
        }
    }
}

/// An expiry that has paused the timer and is waiting for its grace skip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingAdvance {
    /// Revision written by the pause; the skip only applies on top of it.
    revision: u64,
    mode: Mode,
}

pub struct ClockEngine<S, C> {
    store: S,
    clock: C,
    options: EngineOptions,
    /// Local copy of the record. `None` until `initialize()` succeeds.
    record: Option<TimerRecord>,
    /// Cached projection; authoritative only while idle.
    time_remaining: u64,
    last_applied_revision: u64,
    /// A write failed; local state is ahead of the store.
    dirty: bool,
    pending: Option<PendingAdvance>,
    hook: Option<CompletionHook>,
}

impl<S: RemoteStore, C: Clock> ClockEngine<S, C> {
    pub fn new(store: S, clock: C, options: EngineOptions) -> Self {
        let time_remaining = options.defaults.work();
        Self {
            store,
            clock,
            options,
            record: None,
            time_remaining,
            last_applied_revision: 0,
            dirty: false,
            pending: None,
            hook: None,
        }
    }

    pub fn with_completion_hook(mut self, hook: CompletionHook) -> Self {
        self.hook = Some(hook);
        self
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn record(&self) -> Option<&TimerRecord> {
        self.record.as_ref()
    }

    pub fn record_id(&self) -> Option<&str> {
        self.record.as_ref().map(|r| r.id.as_str())
    }

    pub fn is_initialized(&self) -> bool {
        self.record.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.record.as_ref().is_some_and(|r| r.is_running)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mode(&self) -> Mode {
        self.record.as_ref().map_or(Mode::Work, |r| r.mode)
    }

    /// Mode waiting for its grace skip, if an expiry is pending.
    pub fn pending_advance(&self) -> Option<Mode> {
        self.pending.map(|p| p.mode)
    }

    /// Cached remaining time, as last applied.
    pub fn time_remaining(&self) -> u64 {
        self.time_remaining
    }

    /// Remaining seconds now: the cached value while idle, the projection of
    /// the anchor while running.
    pub fn calculate_time_remaining(&self) -> u64 {
        match &self.record {
            Some(record) if record.is_running => record.remaining_at(self.clock.now()),
            _ => self.time_remaining,
        }
    }

    pub fn projection(&self) -> Projection {
        match &self.record {
            Some(record) => Projection {
                mode: record.mode,
                is_running: record.is_running,
                time_remaining: self.time_remaining,
                sessions_completed: record.sessions_completed,
                durations: record.durations,
                initialized: true,
            },
            None => Projection {
                time_remaining: self.time_remaining,
                durations: self.options.defaults,
                ..Projection::default()
            },
        }
    }

    /// Build a full state snapshot event.
    pub fn snapshot(&self) -> Event {
        let projection = self.projection();
        Event::StateSnapshot {
            mode: projection.mode,
            is_running: projection.is_running,
            time_remaining: self.calculate_time_remaining(),
            sessions_completed: projection.sessions_completed,
            total: projection.durations.for_mode(projection.mode),
            at: self.now(),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Fetch (or create) the user's record and rebuild local state from it.
    ///
    /// A record found running past its deadline is written back as paused
    /// at zero; nobody was around to complete it.
    pub async fn initialize(&mut self) -> Result<Event, StoreError> {
        let fetched = match self
            .store
            .fetch_or_create(&self.options.user, self.options.defaults)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                error!(user = %self.options.user, error = %e, "failed to load timer state");
                return Err(e);
            }
        };
        let now = self.now();
        let expired = fetched.is_running && fetched.remaining_at(now) == 0;
        self.adopt(fetched, now);
        self.dirty = false;
        self.pending = None;

        if expired {
            info!("stored interval expired while no instance was running; pausing at 0");
            let patch = RecordPatch::stopped(0);
            self.persist(patch).await;
        }

        let record = self.record_ref()?;
        info!(
            record = %record.id,
            mode = %record.mode,
            running = record.is_running,
            remaining = self.time_remaining,
            "timer state initialized"
        );
        Ok(Event::Initialized {
            record_id: record.id.clone(),
            mode: record.mode,
            is_running: record.is_running,
            time_remaining: self.time_remaining,
            at: now,
        })
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub async fn start(&mut self) -> Option<Event> {
        let record = self.record.as_ref()?;
        if record.is_running || self.time_remaining == 0 {
            return None;
        }
        let mode = record.mode;
        let now = self.now();
        let remaining = self.time_remaining;
        self.persist(RecordPatch::started(now, remaining)).await;
        self.pending = None;
        info!(%mode, remaining, "timer started");
        Some(Event::TimerStarted {
            mode,
            time_remaining: remaining,
            at: now,
        })
    }

    pub async fn pause(&mut self) -> Option<Event> {
        if !self.is_running() {
            return None;
        }
        let remaining = self.calculate_time_remaining();
        self.persist(RecordPatch::stopped(remaining)).await;
        info!(remaining, "timer paused");
        Some(Event::TimerPaused {
            mode: self.mode(),
            time_remaining: self.time_remaining,
            at: self.now(),
        })
    }

    pub async fn reset(&mut self) -> Option<Event> {
        let record = self.record.as_ref()?;
        let full = record.durations.for_mode(record.mode);
        self.pending = None;
        self.persist(RecordPatch::stopped(full)).await;
        info!(mode = %self.mode(), "timer reset");
        Some(Event::TimerReset {
            mode: self.mode(),
            time_remaining: self.time_remaining,
            at: self.now(),
        })
    }

    pub async fn skip(&mut self) -> Option<Event> {
        self.record.as_ref()?;
        self.pending = None;
        match self.skip_with(None).await {
            Ok(event) => Some(event),
            Err(_) => None,
        }
    }

    pub async fn change_mode(&mut self, mode: Mode) -> Option<Event> {
        let record = self.record.as_ref()?;
        if record.is_running {
            return None;
        }
        let full = record.durations.for_mode(mode);
        self.pending = None;
        self.persist(RecordPatch::stopped(full).with_mode(mode)).await;
        info!(%mode, "mode changed");
        Some(Event::ModeChanged {
            mode,
            time_remaining: self.time_remaining,
            at: self.now(),
        })
    }

    /// Recompute from the anchor; on reaching zero fire the completion hook
    /// and pause. The caller schedules [`finish_completion`](Self::finish_completion).
    pub async fn tick(&mut self) -> Option<Event> {
        if !self.is_running() {
            return None;
        }
        self.time_remaining = self.calculate_time_remaining();
        if self.time_remaining > 0 {
            return None;
        }
        Some(self.complete().await)
    }

    /// Validate and store new durations. Rejected while running. If the
    /// current mode's duration changed, the idle remaining time is reset to
    /// the new value.
    pub async fn update_durations(
        &mut self,
        work: i64,
        short_break: i64,
        long_break: i64,
    ) -> Result<Option<Event>, ValidationError> {
        let durations = Durations::new(work, short_break, long_break)?;
        if self.is_running() {
            return Err(ValidationError::TimerRunning);
        }
        let Some(record) = self.record.as_ref() else {
            return Ok(None);
        };
        let mut patch = RecordPatch::default().with_durations(durations);
        let mode = record.mode;
        if record.durations.for_mode(mode) != durations.for_mode(mode) {
            patch.initial_time_remaining = Some(durations.for_mode(mode));
        }
        self.persist(patch).await;
        info!(
            work = durations.work(),
            short_break = durations.short_break(),
            long_break = durations.long_break(),
            "durations updated"
        );
        Ok(Some(Event::DurationsUpdated {
            work: durations.work(),
            short_break: durations.short_break(),
            long_break: durations.long_break(),
            at: self.now(),
        }))
    }

    /// Grace-delay follow-up of an expiry: skip to the next mode, unless
    /// another instance already moved the record on.
    pub async fn finish_completion(&mut self) -> Option<Event> {
        let pending = self.pending.take()?;
        if self.is_running() || self.mode() != pending.mode {
            debug!("pending advance superseded");
            return None;
        }
        let guard = (!self.dirty).then_some(pending.revision);
        match self.skip_with(guard).await {
            Ok(event) => Some(event),
            Err(StoreError::RevisionConflict { actual, .. }) => {
                info!(actual, "record moved on before the grace skip; refetching");
                self.refetch().await
            }
            Err(_) => None,
        }
    }

    // ── Background checks ────────────────────────────────────────────

    /// Slow safety net behind the pulse: retry a dirty flush, correct drift
    /// beyond tolerance and catch an expiry the pulse missed.
    pub async fn watchdog_check(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        if self.record.is_none() {
            return events;
        }
        self.flush_if_dirty().await;
        if !self.is_running() {
            return events;
        }
        let derived = self.calculate_time_remaining();
        let cached = self.time_remaining;
        if reconcile::drift_exceeds(cached, derived, self.options.policy) {
            warn!(cached, derived, "timer drift corrected");
            events.push(Event::DriftCorrected {
                cached,
                derived,
                at: self.now(),
            });
        }
        self.time_remaining = derived;
        if derived == 0 {
            events.push(self.complete().await);
        }
        events
    }

    /// Write the whole local state if an earlier write failed. Returns true
    /// when the store is in sync afterwards.
    pub async fn flush_if_dirty(&mut self) -> bool {
        if !self.dirty {
            return true;
        }
        let Some(record) = self.record.as_ref() else {
            return false;
        };
        let id = record.id.clone();
        let patch = full_state_patch(record).by(&self.options.instance_id);
        match self.store.update(&id, patch).await {
            Ok(stored) => {
                info!(revision = stored.revision, "local state flushed");
                let now = self.now();
                self.adopt(stored, now);
                self.dirty = false;
                true
            }
            Err(e) => {
                warn!(error = %e, "flush failed; will retry");
                false
            }
        }
    }

    /// Merge a change notification from the store.
    pub fn reconcile(&mut self, remote: TimerRecord) -> Option<Event> {
        if let Some(record) = &self.record {
            if record.id != remote.id {
                debug!(record = %remote.id, "notification for another record ignored");
                return None;
            }
        }
        let now = self.now();
        let decision = reconcile::resolve(
            self.record.as_ref(),
            self.last_applied_revision,
            &remote,
            now,
            self.options.policy,
        );
        let kept_local_running = match decision {
            Decision::Ignore => {
                debug!(revision = remote.revision, last = self.last_applied_revision, "stale notification ignored");
                return None;
            }
            Decision::KeepLocalRunning {
                merged,
                time_remaining,
            } => {
                info!(revision = merged.revision, by = %merged.updated_by, "remote stop ignored; local interval keeps running");
                self.last_applied_revision = merged.revision;
                self.record = Some(merged);
                self.time_remaining = time_remaining;
                true
            }
            Decision::Adopt {
                record,
                time_remaining,
            } => {
                debug!(revision = record.revision, by = %record.updated_by, "remote state adopted");
                if let Some(pending) = self.pending {
                    if record.is_running || record.mode != pending.mode {
                        debug!("pending advance cancelled by remote change");
                        self.pending = None;
                    }
                }
                self.last_applied_revision = record.revision;
                self.record = Some(record);
                self.time_remaining = time_remaining;
                self.dirty = false;
                false
            }
        };
        let record = self.record.as_ref()?;
        Some(Event::RemoteApplied {
            revision: record.revision,
            mode: record.mode,
            is_running: record.is_running,
            time_remaining: self.time_remaining,
            kept_local_running,
            at: now,
        })
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn record_ref(&self) -> Result<&TimerRecord, StoreError> {
        self.record
            .as_ref()
            .ok_or_else(|| StoreError::NotFound(self.options.user.clone()))
    }

    async fn complete(&mut self) -> Event {
        let mode = self.mode();
        let now = self.now();
        info!(%mode, "interval complete");
        if let Some(hook) = &self.hook {
            hook.fire(mode);
        }
        self.persist(RecordPatch::stopped(0)).await;
        let revision = self.record.as_ref().map_or(0, |r| r.revision);
        self.pending = Some(PendingAdvance { revision, mode });
        Event::TimerCompleted {
            mode,
            sessions_completed: self.record.as_ref().map_or(0, |r| r.sessions_completed),
            at: now,
        }
    }

    async fn skip_with(&mut self, if_revision: Option<u64>) -> Result<Event, StoreError> {
        let record = self.record_ref()?;
        let from = record.mode;
        let to = from.next(record.sessions_completed, self.options.cycle_length);
        let sessions = record.sessions_completed + u64::from(from == Mode::Work);
        let full = record.durations.for_mode(to);
        let patch = RecordPatch::stopped(full).with_mode(to).with_sessions(sessions);
        match if_revision {
            Some(revision) => self.persist_if(patch, revision).await?,
            None => self.persist(patch).await,
        }
        info!(%from, %to, sessions, "timer skipped");
        Ok(Event::TimerSkipped {
            from,
            to,
            sessions_completed: sessions,
            at: self.now(),
        })
    }

    /// Read the stored record once and merge it like a notification.
    /// Covers writes that landed before a subscription was in place.
    pub async fn refetch(&mut self) -> Option<Event> {
        match self
            .store
            .fetch_or_create(&self.options.user, self.options.defaults)
            .await
        {
            Ok(record) => self.reconcile(record),
            Err(e) => {
                warn!(error = %e, "refetch failed");
                None
            }
        }
    }

    /// Unguarded write. Cannot conflict; a failed write is applied locally
    /// and leaves the engine dirty.
    async fn persist(&mut self, patch: RecordPatch) {
        let patch = RecordPatch {
            if_revision: None,
            ..patch
        };
        if let Err(e) = self.write(patch).await {
            warn!(error = %e, "unguarded write rejected");
        }
    }

    /// Compare-and-set write on `revision`. A conflict is returned and
    /// nothing is applied.
    async fn persist_if(&mut self, patch: RecordPatch, revision: u64) -> Result<(), StoreError> {
        self.write(patch.if_revision(revision)).await
    }

    /// Write `patch` (the full local state instead, if dirty) and adopt the
    /// stored result. Only a revision conflict is returned; any other
    /// failure applies the patch locally and marks the engine dirty.
    async fn write(&mut self, patch: RecordPatch) -> Result<(), StoreError> {
        let Some(record) = self.record.as_ref() else {
            return Ok(());
        };
        let id = record.id.clone();
        let patch = patch.by(&self.options.instance_id);
        let outgoing = if self.dirty {
            let mut local = record.clone();
            local.apply(&patch);
            let mut full = full_state_patch(&local).by(&self.options.instance_id);
            full.if_revision = patch.if_revision;
            full
        } else {
            patch.clone()
        };

        match self.store.update(&id, outgoing).await {
            Ok(stored) => {
                let now = self.now();
                self.adopt(stored, now);
                self.dirty = false;
                Ok(())
            }
            Err(e @ StoreError::RevisionConflict { .. }) => Err(e),
            Err(e) => {
                warn!(record = %id, error = %e, "persist failed; keeping local state");
                let now = self.now();
                if let Some(record) = self.record.as_mut() {
                    record.apply(&patch);
                    self.time_remaining = record.remaining_at(now);
                }
                self.dirty = true;
                Ok(())
            }
        }
    }

    /// Replace local state with a record read from (or written to) the store.
    fn adopt(&mut self, record: TimerRecord, now: DateTime<Utc>) {
        self.time_remaining = record.remaining_at(now);
        self.last_applied_revision = self.last_applied_revision.max(record.revision);
        self.record = Some(record);
    }
}

fn full_state_patch(record: &TimerRecord) -> RecordPatch {
    RecordPatch {
        mode: Some(record.mode),
        is_running: Some(record.is_running),
        start_time: Some(record.start_time),
        initial_time_remaining: Some(record.initial_time_remaining),
        sessions_completed: Some(record.sessions_completed),
        durations: Some(record.durations),
        ..Default::default()
    }
}
