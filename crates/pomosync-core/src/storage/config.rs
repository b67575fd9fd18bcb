//! TOML-based application configuration.
//!
//! Stores:
//! - The default durations and cycle length for new records
//! - The completion notification command
//! - Sync tuning (pulse/watchdog intervals, drift tolerance, backend)
//!
//! Configuration is stored at `~/.config/pomosync/config.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::data_dir;
use crate::error::{ConfigError, ValidationError};
use crate::hooks::CompletionHook;
use crate::reconcile::ReconcilePolicy;
use crate::session::SessionOptions;
use crate::timer::{Durations, EngineOptions};

/// Schedule-specific configuration, in minutes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_focus_duration")]
    pub focus_duration: u32,
    #[serde(default = "default_short_break")]
    pub short_break: u32,
    #[serde(default = "default_long_break")]
    pub long_break: u32,
    #[serde(default = "default_pomodoros_before_long_break")]
    pub pomodoros_before_long_break: u32,
}

/// Notification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Shell command run when an interval completes (e.g. a sound player).
    /// Empty means the terminal bell.
    #[serde(default)]
    pub command: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Sqlite,
    Memory,
}

/// Synchronization tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Record owner. Empty means `$USER`.
    #[serde(default)]
    pub user_id: String,
    #[serde(default = "default_backend")]
    pub backend: Backend,
    #[serde(default = "default_pulse_interval_ms")]
    pub pulse_interval_ms: u64,
    #[serde(default = "default_watchdog_interval_secs")]
    pub watchdog_interval_secs: u64,
    #[serde(default = "default_drift_tolerance_secs")]
    pub drift_tolerance_secs: u64,
    #[serde(default = "default_grace_delay_secs")]
    pub grace_delay_secs: u64,
    /// How often the SQLite backend checks for writes from other processes.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_true")]
    pub local_wins_while_running: bool,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/pomosync/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

// Default functions
fn default_focus_duration() -> u32 {
    25
}
fn default_short_break() -> u32 {
    5
}
fn default_long_break() -> u32 {
    15
}
fn default_pomodoros_before_long_break() -> u32 {
    4
}
fn default_true() -> bool {
    true
}
fn default_backend() -> Backend {
    Backend::Sqlite
}
fn default_pulse_interval_ms() -> u64 {
    1000
}
fn default_watchdog_interval_secs() -> u64 {
    3
}
fn default_drift_tolerance_secs() -> u64 {
    2
}
fn default_grace_delay_secs() -> u64 {
    3
}
fn default_poll_interval_ms() -> u64 {
    500
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            focus_duration: default_focus_duration(),
            short_break: default_short_break(),
            long_break: default_long_break(),
            pomodoros_before_long_break: default_pomodoros_before_long_break(),
        }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: String::new(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            backend: default_backend(),
            pulse_interval_ms: default_pulse_interval_ms(),
            watchdog_interval_secs: default_watchdog_interval_secs(),
            drift_tolerance_secs: default_drift_tolerance_secs(),
            grace_delay_secs: default_grace_delay_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            local_wins_while_running: true,
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };
        let mut parts = key.split('.').peekable();
        if key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_some() {
                current = current.get_mut(part).ok_or_else(unknown)?;
                continue;
            }
            let obj = current.as_object_mut().ok_or_else(unknown)?;
            let existing = obj.get(part).ok_or_else(unknown)?;
            let new_value = match existing {
                serde_json::Value::Bool(_) => serde_json::Value::Bool(
                    value
                        .parse::<bool>()
                        .map_err(|e| invalid(e.to_string()))?,
                ),
                serde_json::Value::Number(_) => serde_json::Value::Number(
                    value
                        .parse::<u64>()
                        .map_err(|_| invalid(format!("cannot parse '{value}' as number")))?
                        .into(),
                ),
                serde_json::Value::Object(_) => return Err(unknown()),
                _ => serde_json::Value::String(value.into()),
            };
            obj.insert(part.to_string(), new_value);
            return Ok(());
        }

        Err(unknown())
    }

    pub fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from the data directory, writing the defaults on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let cfg: Config = toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?;
                cfg.validate().map_err(|e| ConfigError::LoadFailed {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?;
                Ok(cfg)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(e) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    /// Persist to the data directory.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| failed(e.to_string()))
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by dot-separated key. Does not save.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value does not parse
    /// or validate; `self` is unchanged in that case.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };
        let mut json = serde_json::to_value(&*self).map_err(|e| invalid(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Config = serde_json::from_value(json).map_err(|e| invalid(e.to_string()))?;
        updated.validate().map_err(|e| invalid(e.to_string()))?;
        *self = updated;
        Ok(())
    }

    /// Dot-path keys of every leaf setting, sorted within each section.
    pub fn keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        if let Ok(serde_json::Value::Object(sections)) = serde_json::to_value(self) {
            for (section, fields) in sections {
                if let serde_json::Value::Object(fields) = fields {
                    keys.extend(fields.keys().map(|field| format!("{section}.{field}")));
                }
            }
        }
        keys
    }

    fn validate(&self) -> Result<(), ValidationError> {
        self.durations()?;
        if self.schedule.pomodoros_before_long_break == 0 {
            return Err(ValidationError::InvalidValue {
                field: "schedule.pomodoros_before_long_break".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.sync.watchdog_interval_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "sync.watchdog_interval_secs".into(),
                message: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Default durations for new records.
    pub fn durations(&self) -> Result<Durations, ValidationError> {
        Durations::from_minutes(
            self.schedule.focus_duration,
            self.schedule.short_break,
            self.schedule.long_break,
        )
    }

    /// Record owner: `sync.user_id`, else `$USER`/`$USERNAME`, else `local`.
    pub fn user_id(&self) -> String {
        let configured = self.sync.user_id.trim();
        if !configured.is_empty() {
            return configured.to_string();
        }
        std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .ok()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| "local".to_string())
    }

    pub fn engine_options(&self) -> Result<EngineOptions, ValidationError> {
        Ok(EngineOptions {
            user: self.user_id(),
            defaults: self.durations()?,
            cycle_length: self.schedule.pomodoros_before_long_break.max(1),
            policy: ReconcilePolicy {
                local_wins_while_running: self.sync.local_wins_while_running,
                drift_tolerance_secs: self.sync.drift_tolerance_secs,
            },
            ..EngineOptions::default()
        })
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            pulse_interval: Duration::from_millis(self.sync.pulse_interval_ms),
            watchdog_interval: Duration::from_secs(self.sync.watchdog_interval_secs),
            grace_delay: Duration::from_secs(self.sync.grace_delay_secs),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.sync.poll_interval_ms)
    }

    /// `None` when notifications are disabled.
    pub fn completion_hook(&self) -> Option<CompletionHook> {
        self.notifications
            .enabled
            .then(|| CompletionHook::from_command(Some(&self.notifications.command)))
    }

    /// Load from disk, returning default on error.
    /// This is a convenience method that never fails.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }
}
