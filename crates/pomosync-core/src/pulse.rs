//! Pulse source: a "time advanced" signal roughly once per interval.
//!
//! Pulses only prompt the engine to recompute from wall-clock time, so a
//! throttled or suspended source loses nothing but latency. Every pulse
//! carries the generation of the `start_pulse()` that produced it; the
//! [`PulseReceiver`] drops pulses from any generation other than the active
//! one, so nothing is observed after `stop_pulse()` returns.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

pub const DEFAULT_PULSE_INTERVAL: Duration = Duration::from_secs(1);

/// Start/stop control of a pulse generator. Both calls are idempotent.
pub trait PulseSource: Send + 'static {
    fn start_pulse(&mut self);
    fn stop_pulse(&mut self);
    fn is_pulsing(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pulse {
    pub generation: u64,
    pub at: Instant,
}

/// Generation bookkeeping shared by a source and its receiver.
#[derive(Debug, Default)]
struct Gate {
    /// Active generation; 0 while stopped.
    active: AtomicU64,
    issued: AtomicU64,
}

impl Gate {
    fn open(&self) -> u64 {
        let generation = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        self.active.store(generation, Ordering::SeqCst);
        generation
    }

    fn close(&self) {
        self.active.store(0, Ordering::SeqCst);
    }

    fn admits(&self, pulse: &Pulse) -> bool {
        let active = self.active.load(Ordering::SeqCst);
        active != 0 && active == pulse.generation
    }
}

/// Sending end of a pulse channel, for implementing a [`PulseSource`].
#[derive(Debug, Clone)]
pub struct PulseSender {
    tx: mpsc::Sender<Pulse>,
    gate: Arc<Gate>,
}

impl PulseSender {
    /// Start a new generation; pulses of older generations are dropped.
    pub fn begin(&self) -> u64 {
        self.gate.open()
    }

    /// Stop admitting pulses until the next [`begin`](Self::begin).
    pub fn end(&self) {
        self.gate.close();
    }

    /// Send one pulse without waiting. Returns false once the receiver is
    /// gone; a full buffer just drops the pulse.
    pub fn emit(&self, generation: u64) -> bool {
        match self.tx.try_send(Pulse {
            generation,
            at: Instant::now(),
        }) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Receiving end of a pulse source.
#[derive(Debug)]
pub struct PulseReceiver {
    rx: mpsc::Receiver<Pulse>,
    gate: Arc<Gate>,
}

impl PulseReceiver {
    /// Next pulse of the active generation. Pending forever while stopped.
    pub async fn recv(&mut self) -> Option<Pulse> {
        loop {
            let pulse = self.rx.recv().await?;
            if self.gate.admits(&pulse) {
                return Some(pulse);
            }
            trace!(generation = pulse.generation, "stale pulse dropped");
        }
    }

    pub fn try_recv(&mut self) -> Option<Pulse> {
        while let Ok(pulse) = self.rx.try_recv() {
            if self.gate.admits(&pulse) {
                return Some(pulse);
            }
        }
        None
    }
}

/// At most one pulse is buffered.
pub fn pulse_channel() -> (PulseSender, PulseReceiver) {
    let (tx, rx) = mpsc::channel(1);
    let gate = Arc::new(Gate::default());
    (
        PulseSender {
            tx,
            gate: Arc::clone(&gate),
        },
        PulseReceiver { rx, gate },
    )
}

/// Pulse source backed by a tokio interval task on the runtime's worker
/// pool. Ticks that find the buffer full are dropped.
#[derive(Debug)]
pub struct IntervalPulse {
    period: Duration,
    sender: PulseSender,
    task: Option<JoinHandle<()>>,
}

impl IntervalPulse {
    pub fn new(period: Duration) -> (Self, PulseReceiver) {
        let (sender, rx) = pulse_channel();
        let source = Self {
            period: if period.is_zero() { DEFAULT_PULSE_INTERVAL } else { period },
            sender,
            task: None,
        };
        (source, rx)
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl PulseSource for IntervalPulse {
    fn start_pulse(&mut self) {
        if self.is_pulsing() {
            return;
        }
        let generation = self.sender.begin();
        let sender = self.sender.clone();
        let period = self.period;
        debug!(generation, ?period, "pulse started");
        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !sender.emit(generation) {
                    break;
                }
            }
        }));
    }

    fn stop_pulse(&mut self) {
        self.sender.end();
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("pulse stopped");
        }
    }

    fn is_pulsing(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for IntervalPulse {
    fn drop(&mut self) {
        self.stop_pulse();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn pulses_roughly_once_per_period() {
        let (mut source, mut pulses) = IntervalPulse::new(Duration::from_secs(1));
        source.start_pulse();
        let first = pulses.recv().await.unwrap();
        let second = pulses.recv().await.unwrap();
        assert_eq!(first.generation, second.generation);
        assert_eq!(second.at - first.at, Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn start_and_stop_are_idempotent() {
        let (mut source, _pulses) = IntervalPulse::new(Duration::from_secs(1));
        source.start_pulse();
        source.start_pulse();
        assert!(source.is_pulsing());
        source.stop_pulse();
        source.stop_pulse();
        assert!(!source.is_pulsing());
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_is_observed_after_stop() {
        let (mut source, mut pulses) = IntervalPulse::new(Duration::from_millis(100));
        source.start_pulse();
        tokio::time::sleep(Duration::from_millis(150)).await;
        // One pulse is buffered but not yet consumed.
        source.stop_pulse();
        assert!(pulses.try_recv().is_none());

        source.start_pulse();
        let pulse = tokio::time::timeout(Duration::from_secs(1), pulses.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pulse.generation, 2);
    }
}
