use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Default number of work sessions per cycle; the last one is followed by a
/// long break.
pub const DEFAULT_CYCLE_LENGTH: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Mode {
    Work,
    ShortBreak,
    LongBreak,
}

impl Mode {
    pub fn is_break(self) -> bool {
        !matches!(self, Mode::Work)
    }

    /// Mode that follows `self` when an interval is skipped or completes.
    ///
    /// `sessions_completed` is the count *before* the outgoing interval is
    /// credited, so with a cycle of 4 the completions 4, 8, 12, ... route to
    /// a long break.
    pub fn next(self, sessions_completed: u64, cycle_length: u32) -> Mode {
        match self {
            Mode::Work => {
                let cycle = u64::from(cycle_length.max(1));
                if sessions_completed % cycle == cycle - 1 {
                    Mode::LongBreak
                } else {
                    Mode::ShortBreak
                }
            }
            Mode::ShortBreak | Mode::LongBreak => Mode::Work,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Work => "work",
            Mode::ShortBreak => "shortBreak",
            Mode::LongBreak => "longBreak",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "work" => Ok(Mode::Work),
            "shortBreak" | "short-break" | "short_break" => Ok(Mode::ShortBreak),
            "longBreak" | "long-break" | "long_break" => Ok(Mode::LongBreak),
            other => Err(ValidationError::UnknownMode(other.to_string())),
        }
    }
}

/// Per-user session configuration, in seconds.
///
/// Always positive: the only constructor is [`Durations::new`], which
/// rejects zero and negative values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawDurations")]
pub struct Durations {
    work: u64,
    short_break: u64,
    long_break: u64,
}

impl Durations {
    pub fn new(work: i64, short_break: i64, long_break: i64) -> Result<Self, ValidationError> {
        Ok(Self {
            work: positive("work", work)?,
            short_break: positive("shortBreak", short_break)?,
            long_break: positive("longBreak", long_break)?,
        })
    }

    /// Build from minutes, as stored in the `[schedule]` config section.
    pub fn from_minutes(work: u32, short_break: u32, long_break: u32) -> Result<Self, ValidationError> {
        Self::new(
            i64::from(work) * 60,
            i64::from(short_break) * 60,
            i64::from(long_break) * 60,
        )
    }

    pub fn for_mode(&self, mode: Mode) -> u64 {
        match mode {
            Mode::Work => self.work,
            Mode::ShortBreak => self.short_break,
            Mode::LongBreak => self.long_break,
        }
    }

    pub fn work(&self) -> u64 {
        self.work
    }

    pub fn short_break(&self) -> u64 {
        self.short_break
    }

    pub fn long_break(&self) -> u64 {
        self.long_break
    }
}

impl Default for Durations {
    /// 25 / 5 / 15 minutes.
    fn default() -> Self {
        Self {
            work: 25 * 60,
            short_break: 5 * 60,
            long_break: 15 * 60,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDurations {
    work: i64,
    short_break: i64,
    long_break: i64,
}

impl TryFrom<RawDurations> for Durations {
    type Error = ValidationError;

    fn try_from(raw: RawDurations) -> Result<Self, Self::Error> {
        Durations::new(raw.work, raw.short_break, raw.long_break)
    }
}

fn positive(field: &'static str, value: i64) -> Result<u64, ValidationError> {
    if value <= 0 {
        return Err(ValidationError::NonPositiveDuration { field, value });
    }
    Ok(value as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_rotates_to_short_break_except_every_fourth() {
        for sessions in 0..12u64 {
            let expected = if sessions % 4 == 3 {
                Mode::LongBreak
            } else {
                Mode::ShortBreak
            };
            assert_eq!(Mode::Work.next(sessions, 4), expected, "sessions={sessions}");
        }
    }

    #[test]
    fn breaks_always_return_to_work() {
        for sessions in 0..8u64 {
            assert_eq!(Mode::ShortBreak.next(sessions, 4), Mode::Work);
            assert_eq!(Mode::LongBreak.next(sessions, 4), Mode::Work);
        }
    }

    #[test]
    fn custom_cycle_length() {
        assert_eq!(Mode::Work.next(1, 2), Mode::LongBreak);
        assert_eq!(Mode::Work.next(2, 2), Mode::ShortBreak);
        // A cycle of one means every work session earns a long break.
        assert_eq!(Mode::Work.next(0, 1), Mode::LongBreak);
        assert_eq!(Mode::Work.next(0, 0), Mode::LongBreak);
    }

    #[test]
    fn mode_serializes_camel_case() {
        assert_eq!(serde_json::to_string(&Mode::ShortBreak).unwrap(), "\"shortBreak\"");
        assert_eq!(serde_json::from_str::<Mode>("\"longBreak\"").unwrap(), Mode::LongBreak);
        assert_eq!("short-break".parse::<Mode>().unwrap(), Mode::ShortBreak);
        assert!("nap".parse::<Mode>().is_err());
    }

    #[test]
    fn durations_reject_non_positive() {
        assert!(Durations::new(0, 300, 900).is_err());
        assert!(Durations::new(1500, -1, 900).is_err());
        assert_eq!(
            Durations::new(1500, 300, 0),
            Err(ValidationError::NonPositiveDuration { field: "longBreak", value: 0 })
        );
        let d = Durations::new(1500, 300, 900).unwrap();
        assert_eq!(d.for_mode(Mode::Work), 1500);
        assert_eq!(d.for_mode(Mode::ShortBreak), 300);
        assert_eq!(d.for_mode(Mode::LongBreak), 900);
    }

    #[test]
    fn durations_deserialize_validates() {
        let ok: Durations =
            serde_json::from_str(r#"{"work":60,"shortBreak":30,"longBreak":90}"#).unwrap();
        assert_eq!(ok.work(), 60);
        assert!(serde_json::from_str::<Durations>(r#"{"work":0,"shortBreak":30,"longBreak":90}"#).is_err());
    }

    #[test]
    fn durations_from_minutes() {
        let d = Durations::from_minutes(25, 5, 15).unwrap();
        assert_eq!(d, Durations::default());
    }
}
