//! Core error types for pomosync-core.
//!
//! None of these are fatal to a running session: the engine logs store
//! failures and keeps its optimistic local state, and validation errors are
//! returned to the caller before anything is mutated.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for pomosync-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Record store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The session driver is gone (shut down or panicked).
    #[error("Session closed")]
    SessionClosed,

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by a [`RemoteStore`](crate::store::RemoteStore) backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backend cannot be reached right now.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// No record with this id.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// A compare-and-set patch lost against a newer write.
    #[error("Revision conflict on {id}: expected {expected}, found {actual}")]
    RevisionConflict { id: String, expected: u64, actual: u64 },

    /// Failed to open the database file
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// A stored row could not be decoded.
    #[error("Corrupt record {id}: {message}")]
    Corrupt { id: String, message: String },
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Unknown dot-path key
    #[error("Unknown config key: {0}")]
    UnknownKey(String),

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// The data directory could not be created.
    #[error("Cannot prepare data directory {path}: {source}")]
    DataDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A duration was zero or negative.
    #[error("Duration for '{field}' must be positive, got {value}")]
    NonPositiveDuration { field: &'static str, value: i64 },

    /// Durations cannot change under a running interval.
    #[error("Durations cannot be changed while the timer is running")]
    TimerRunning,

    /// Unrecognized mode name.
    #[error("Unknown mode '{0}' (expected work, shortBreak or longBreak)")]
    UnknownMode(String),

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(err, _msg) => {
                if err.code == rusqlite::ErrorCode::DatabaseBusy
                    || err.code == rusqlite::ErrorCode::DatabaseLocked
                {
                    StoreError::Locked
                } else {
                    StoreError::QueryFailed(err.to_string())
                }
            }
            _ => StoreError::QueryFailed(err.to_string()),
        }
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
