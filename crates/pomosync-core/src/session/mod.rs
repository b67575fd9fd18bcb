//! Session driver.
//!
//! One tokio task per instance owns the [`ClockEngine`](crate::timer::ClockEngine)
//! and is the only thing that mutates it. Handle commands, pulses, the
//! watchdog, store notifications and the grace timer are all `select!`ed in
//! that task's loop, so every action runs to completion before the next one
//! starts.
//!
//! ```text
//! SessionHandle --cmd--> +--------------------+ --watch--> Projection
//! PulseSource --pulse--> |   SessionDriver    | --broadcast--> Event
//! watchdog interval ---> |  (owns the engine) | --acquire/release--> Keepalive
//! Subscription --rec---> +--------------------+
//! ```

mod driver;
mod handle;

use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::ValidationError;
use crate::events::Event;
use crate::timer::Mode;

pub use driver::SessionDriver;
pub use handle::SessionHandle;

/// Timing of the driver's background sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub pulse_interval: Duration,
    pub watchdog_interval: Duration,
    /// Delay between an expiry and the automatic skip.
    pub grace_delay: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            pulse_interval: Duration::from_secs(1),
            watchdog_interval: Duration::from_secs(3),
            grace_delay: Duration::from_secs(3),
        }
    }
}

type Reply<T> = oneshot::Sender<T>;

#[derive(Debug)]
enum Command {
    Start(Reply<Option<Event>>),
    Pause(Reply<Option<Event>>),
    Reset(Reply<Option<Event>>),
    Skip(Reply<Option<Event>>),
    ChangeMode(Mode, Reply<Option<Event>>),
    UpdateDurations {
        work: i64,
        short_break: i64,
        long_break: i64,
        reply: Reply<Result<Option<Event>, ValidationError>>,
    },
    Snapshot(Reply<Event>),
    Wake(Reply<()>),
    Shutdown(Reply<()>),
}
