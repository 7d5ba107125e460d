use serde::{Deserialize, Serialize};
use std::path::Path;

/// Current operational state of the daemon.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "lowercase")]
pub enum DaemonState {
    /// The window monitor is running and rules are being applied.
    Watching,
    /// The monitor is stopped (startup failure or shutdown).
    Stopped,
}

/// Runtime status written by the daemon to `~/.switch-input/status.toml`.
/// Anything that wants to show the daemon's state (a tray icon, a shell
/// prompt) reads this file.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DaemonStatus {
    /// Daemon binary version (set from Cargo.toml at compile time).
    pub version: String,
    pub state: DaemonState,
    /// App that currently has focus, as last observed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_application: Option<String>,
    /// Input method selected by the most recent successful switch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_input: Option<String>,
    /// RFC 3339 timestamp of the most recent successful switch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_switch_timestamp: Option<String>,
    /// Human-readable message for the last non-fatal error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonStatus {
    /// Constructs the initial status on daemon startup.
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: DaemonState::Stopped,
            active_application: None,
            current_input: None,
            last_switch_timestamp: None,
            error: None,
        }
    }
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializes `status` to TOML and writes it to `path`, creating the parent
/// directory if needed. Failures are logged, never returned: a status write
/// must not take the daemon down.
pub fn write_status(path: &Path, status: &DaemonStatus) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::error!("[status] Failed to create directory {}: {e}", parent.display());
            return;
        }
    }
    match toml::to_string_pretty(status) {
        Ok(content) => {
            if let Err(e) = std::fs::write(path, content) {
                tracing::error!("[status] Failed to write status file: {e}");
            }
        }
        Err(e) => tracing::error!("[status] Failed to serialize status: {e}"),
    }
}
