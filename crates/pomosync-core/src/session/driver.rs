use std::future::pending;
use std::pin::Pin;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior, Sleep};
use tracing::{debug, info, warn};

use super::{Command, SessionHandle, SessionOptions};
use crate::events::Event;
use crate::hooks::{Keepalive, NoopKeepalive};
use crate::pulse::{IntervalPulse, PulseReceiver, PulseSource};
use crate::store::{RemoteStore, Subscription};
use crate::timer::{Clock, ClockEngine, Projection, TimerRecord};

const COMMAND_QUEUE: usize = 32;
const EVENT_QUEUE: usize = 64;

/// Owns one engine and serializes everything that touches it.
pub struct SessionDriver<S, C> {
    engine: ClockEngine<S, C>,
    options: SessionOptions,
    pulse: Box<dyn PulseSource>,
    pulses: PulseReceiver,
    keepalive: Box<dyn Keepalive>,
    keepalive_held: bool,
    commands: mpsc::Receiver<Command>,
    projection: watch::Sender<Projection>,
    events: broadcast::Sender<Event>,
    subscription: Option<Subscription>,
    grace: Option<Pin<Box<Sleep>>>,
}

impl<S: RemoteStore, C: Clock> SessionDriver<S, C> {
    /// Driver with an [`IntervalPulse`] and no keepalive.
    pub fn new(engine: ClockEngine<S, C>, options: SessionOptions) -> (Self, SessionHandle) {
        let (pulse, pulses) = IntervalPulse::new(options.pulse_interval);
        let (commands_tx, commands) = mpsc::channel(COMMAND_QUEUE);
        let (projection, projection_rx) = watch::channel(engine.projection());
        let (events, _) = broadcast::channel(EVENT_QUEUE);
        let handle = SessionHandle {
            commands: commands_tx,
            projection: projection_rx,
            events: events.clone(),
        };
        let driver = Self {
            engine,
            options,
            pulse: Box::new(pulse),
            pulses,
            keepalive: Box::new(NoopKeepalive),
            keepalive_held: false,
            commands,
            projection,
            events,
            subscription: None,
            grace: None,
        };
        (driver, handle)
    }

    /// Replace the pulse source. `pulses` must be the receiver paired with it.
    pub fn with_pulse(mut self, pulse: impl PulseSource, pulses: PulseReceiver) -> Self {
        self.pulse.stop_pulse();
        self.pulse = Box::new(pulse);
        self.pulses = pulses;
        self
    }

    pub fn with_keepalive(mut self, keepalive: impl Keepalive + 'static) -> Self {
        self.keepalive = Box::new(keepalive);
        self
    }

    /// Spawn the driver on the current runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until [`SessionHandle::shutdown`] or until every handle is dropped.
    pub async fn run(mut self) {
        self.try_initialize().await;
        self.sync_side_effects();

        let period = Some(self.options.watchdog_interval)
            .filter(|p| !p.is_zero())
            .unwrap_or(SessionOptions::default().watchdog_interval);
        let mut watchdog = interval_at(Instant::now() + period, period);
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown(reply)) => {
                        self.teardown();
                        let _ = reply.send(());
                        return;
                    }
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                Some(pulse) = self.pulses.recv() => {
                    debug!(generation = pulse.generation, "pulse");
                    let event = self.engine.tick().await;
                    self.emit(event);
                }
                _ = watchdog.tick() => self.on_watchdog().await,
                notification = next_notification(&mut self.subscription) => match notification {
                    Some(record) => self.on_notification(record),
                    None => {
                        warn!("store subscription closed; will resubscribe");
                        self.subscription = None;
                    }
                },
                _ = grace_elapsed(&mut self.grace) => {
                    self.grace = None;
                    let event = self.engine.finish_completion().await;
                    self.emit(event);
                }
            }
            self.sync_side_effects();
        }

        self.teardown();
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Start(reply) => {
                let event = self.engine.start().await;
                let _ = reply.send(self.emit(event));
            }
            Command::Pause(reply) => {
                let event = self.engine.pause().await;
                let _ = reply.send(self.emit(event));
            }
            Command::Reset(reply) => {
                let event = self.engine.reset().await;
                let _ = reply.send(self.emit(event));
            }
            Command::Skip(reply) => {
                let event = self.engine.skip().await;
                let _ = reply.send(self.emit(event));
            }
            Command::ChangeMode(mode, reply) => {
                let event = self.engine.change_mode(mode).await;
                let _ = reply.send(self.emit(event));
            }
            Command::UpdateDurations {
                work,
                short_break,
                long_break,
                reply,
            } => {
                let outcome = self
                    .engine
                    .update_durations(work, short_break, long_break)
                    .await
                    .map(|event| self.emit(event));
                let _ = reply.send(outcome);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.engine.snapshot());
            }
            Command::Wake(reply) => {
                debug!("wake requested");
                self.on_watchdog().await;
                let _ = reply.send(());
            }
            Command::Shutdown(reply) => {
                let _ = reply.send(());
            }
        }
    }

    async fn on_watchdog(&mut self) {
        if !self.engine.is_initialized() {
            self.try_initialize().await;
            return;
        }
        if self.subscription.is_none() {
            self.try_subscribe().await;
        }
        for event in self.engine.watchdog_check().await {
            self.emit(Some(event));
        }
    }

    fn on_notification(&mut self, record: TimerRecord) {
        debug!(revision = record.revision, by = %record.updated_by, "store notification");
        let event = self.engine.reconcile(record);
        self.emit(event);
    }

    async fn try_initialize(&mut self) {
        match self.engine.initialize().await {
            Ok(event) => {
                self.emit(Some(event));
                self.try_subscribe().await;
            }
            Err(e) => warn!(error = %e, "initialization failed; retrying on next watchdog tick"),
        }
    }

    /// Subscribe, then read the record once so a write that landed since
    /// the last fetch is not lost.
    async fn try_subscribe(&mut self) {
        let Some(id) = self.engine.record_id() else {
            return;
        };
        match self.engine.store().subscribe(id) {
            Ok(subscription) => {
                debug!(record = %subscription.record_id(), "subscribed to store");
                self.subscription = Some(subscription);
            }
            Err(e) => {
                warn!(error = %e, "subscribe failed");
                return;
            }
        }
        let event = self.engine.refetch().await;
        self.emit(event);
    }

    /// Bring the pulse, keepalive, grace timer and projection in line with
    /// the engine.
    fn sync_side_effects(&mut self) {
        if self.engine.is_running() {
            if !self.pulse.is_pulsing() {
                self.pulse.start_pulse();
            }
            if !self.keepalive_held {
                self.keepalive.acquire();
                self.keepalive_held = true;
            }
        } else {
            if self.pulse.is_pulsing() {
                self.pulse.stop_pulse();
            }
            self.release_keepalive();
        }

        match (self.engine.pending_advance(), self.grace.is_some()) {
            (Some(mode), false) => {
                debug!(%mode, delay = ?self.options.grace_delay, "grace skip armed");
                self.grace = Some(Box::pin(tokio::time::sleep(self.options.grace_delay)));
            }
            (None, true) => {
                debug!("grace skip cancelled");
                self.grace = None;
            }
            _ => {}
        }

        let current = self.engine.projection();
        self.projection.send_if_modified(|projection| {
            if *projection == current {
                return false;
            }
            *projection = current;
            true
        });
    }

    fn release_keepalive(&mut self) {
        if self.keepalive_held {
            self.keepalive.release();
            self.keepalive_held = false;
        }
    }

    fn emit(&self, event: Option<Event>) -> Option<Event> {
        if let Some(event) = &event {
            debug!(kind = event.kind(), "event");
            let _ = self.events.send(event.clone());
        }
        event
    }

    fn teardown(&mut self) {
        self.pulse.stop_pulse();
        self.grace = None;
        self.subscription = None;
        self.release_keepalive();
        info!("session stopped");
    }
}

async fn next_notification(subscription: &mut Option<Subscription>) -> Option<TimerRecord> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => pending().await,
    }
}

async fn grace_elapsed(grace: &mut Option<Pin<Box<Sleep>>>) {
    match grace {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}
