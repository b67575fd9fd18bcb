//! # Pomosync Core Library
//!
//! Core logic of a Pomodoro timer whose state is shared by any number of
//! instances (tabs, windows, processes) through one persisted record.
//!
//! ## Architecture
//!
//! - **Clock Engine**: derives the remaining time from a wall-clock anchor
//!   (`start_time`, `initial_time_remaining`); pulses only prompt a recompute
//! - **Pulse Source**: an interval task emitting generation-tagged pulses
//! - **Remote State Mirror**: the [`RemoteStore`] trait with in-memory and
//!   SQLite backends, relaying every write to every subscriber
//! - **Reconciliation**: merges remote notifications into the local state
//! - **Session Driver**: one task per instance serializing all of the above
//!
//! ## Key Components
//!
//! - [`ClockEngine`]: timer state machine over a record store
//! - [`SessionDriver`] / [`SessionHandle`]: the running instance and its front
//! - [`SqliteStore`], [`MemoryStore`]: record store backends
//! - [`Config`]: application configuration management

pub mod error;
pub mod events;
pub mod hooks;
pub mod pulse;
pub mod reconcile;
pub mod session;
pub mod storage;
pub mod store;
pub mod timer;

pub use error::{ConfigError, CoreError, StoreError, ValidationError};
pub use events::Event;
pub use hooks::{CompletionHook, CompletionNotifier, Keepalive, NoopKeepalive};
pub use pulse::{IntervalPulse, PulseSource};
pub use reconcile::ReconcilePolicy;
pub use session::{SessionDriver, SessionHandle, SessionOptions};
pub use storage::Config;
pub use store::{MemoryStore, RemoteStore, SqliteStore, Subscription};
pub use timer::{ClockEngine, Durations, EngineOptions, Mode, Projection, SystemClock, TimerRecord};
