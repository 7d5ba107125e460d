use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while loading, saving or editing the rule configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The persisted file exists but is not valid config JSON.
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Config not loaded")]
    NotLoaded,

    #[error("Rule index {index} out of range (have {len} rules)")]
    IndexOutOfRange { index: usize, len: usize },
}

/// A failed foreground-window query. Always transient: the monitor drops the
/// tick and tries again on the next one.
#[derive(Debug, Error)]
pub enum ObservationError {
    #[error("Active window query is not supported on {0}")]
    Unsupported(&'static str),

    #[error("No active application found")]
    NoActiveWindow,

    #[error("Window query command failed: {0}")]
    Command(String),

    #[error("Unexpected window query output: {0}")]
    Parse(String),
}

/// A failed input-method switch.
#[derive(Debug, Error)]
pub enum SwitchError {
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Input switch exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("Input switch timed out after {after:?}")]
    TimedOut { after: Duration },

    #[error("Input switching is not supported on {0}")]
    Unsupported(&'static str),

    #[error("Switch task aborted: {0}")]
    Aborted(String),
}

/// Failures inside the action log. These are reported on the diagnostic
/// channel and never propagate past the log's public producers.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("Log I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to rotate {path}: {source}")]
    Rotate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
