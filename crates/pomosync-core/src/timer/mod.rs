mod clock;
mod engine;
mod record;
mod schedule;

pub use clock::{project_remaining, Clock, ManualClock, SystemClock};
pub use engine::{ClockEngine, EngineOptions};
pub use record::{Projection, RecordPatch, TimerRecord};
pub use schedule::{Durations, Mode, DEFAULT_CYCLE_LENGTH};
