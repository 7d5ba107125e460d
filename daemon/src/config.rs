use anyhow::Result;
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

use crate::error::ConfigError;
use crate::event::DaemonEvent;

pub const DEFAULT_CHECK_INTERVAL_MS: u64 = 500;
pub const DEFAULT_SWITCH_DELAY_MS: u64 = 100;
pub const DEFAULT_LOG_LEVEL: &str = "info";

pub const PINYIN_INPUT: &str = "com.tencent.inputmethod.wetype.pinyin";
pub const ABC_INPUT: &str = "com.apple.keylayout.ABC";

/// Root configuration structure. Persisted as pretty-printed JSON at
/// `~/.switch-input/config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub general: GeneralSettings,
    /// Local RFC 3339 time of the last successful save.
    #[serde(default)]
    pub last_modified: String,
}

/// A single app → input method mapping. Rules are addressed by their
/// position in [`Config::rules`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Application name or bundle id. Comma-separated alternatives allowed.
    #[serde(rename = "app", default)]
    pub app_pattern: String,
    /// Window title pattern; empty matches every window.
    #[serde(rename = "window", default)]
    pub window_pattern: String,
    /// Input method identifier handed to the switch command.
    #[serde(rename = "input", default)]
    pub target_input: String,
    #[serde(default)]
    pub enabled: bool,
    /// Lower value wins.
    #[serde(default)]
    pub priority: i32,
}

impl Rule {
    pub fn new(app_pattern: &str, target_input: &str, priority: i32) -> Self {
        Self {
            app_pattern: app_pattern.to_string(),
            window_pattern: String::new(),
            target_input: target_input.to_string(),
            enabled: true,
            priority,
        }
    }

    pub fn with_window(mut self, window_pattern: &str) -> Self {
        self.window_pattern = window_pattern.to_string();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneralSettings {
    #[serde(default)]
    pub auto_start: bool,
    /// Window poll interval in milliseconds.
    #[serde(default)]
    pub check_interval: u64,
    /// Pause between a rule match and the switch, in milliseconds.
    #[serde(default)]
    pub switch_delay: u64,
    #[serde(default)]
    pub enable_logging: bool,
    #[serde(default)]
    pub log_level: String,
    #[serde(default)]
    pub show_notifications: bool,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            auto_start: false,
            check_interval: DEFAULT_CHECK_INTERVAL_MS,
            switch_delay: DEFAULT_SWITCH_DELAY_MS,
            enable_logging: true,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            show_notifications: true,
        }
    }
}

impl GeneralSettings {
    /// Replaces unset (zero / empty) fields with their defaults.
    pub fn fill_defaults(&mut self) {
        if self.check_interval == 0 {
            self.check_interval = DEFAULT_CHECK_INTERVAL_MS;
        }
        if self.switch_delay == 0 {
            self.switch_delay = DEFAULT_SWITCH_DELAY_MS;
        }
        if self.log_level.trim().is_empty() {
            self.log_level = DEFAULT_LOG_LEVEL.to_string();
        }
    }
}

/// Built-in rule set written on first launch.
pub fn default_config() -> Config {
    Config {
        rules: vec![
            Rule::new("com.apple.Safari", PINYIN_INPUT, 1),
            Rule::new("com.google.Chrome", PINYIN_INPUT, 1),
            Rule::new("com.apple.Terminal", ABC_INPUT, 1),
            Rule::new("com.microsoft.VSCode", ABC_INPUT, 1),
        ],
        general: GeneralSettings::default(),
        last_modified: String::new(),
    }
}

/// Reads and parses the config at `path`, filling defaults for unset general
/// settings. Returns `Ok(None)` if the file does not exist.
pub fn read_config(path: &Path) -> Result<Option<Config>, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let mut config: Config =
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    config.general.fill_defaults();
    Ok(Some(config))
}

/// Overwrites `path` with `config` as pretty-printed JSON, creating the
/// parent directory if needed.
pub fn write_config(path: &Path, config: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let data = serde_json::to_string_pretty(config).map_err(ConfigError::Serialize)?;
    std::fs::write(path, data).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Spawns a file watcher on the parent directory of `path`. Whenever the
/// config file is created or modified, sends a `ConfigChanged` event; the
/// receiver decides whether the new contents are usable.
pub async fn watch_config(path: PathBuf, tx: mpsc::Sender<DaemonEvent>) -> Result<()> {
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Event>(16);

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = watch_tx.blocking_send(event);
            }
        },
        NotifyConfig::default(),
    )?;

    // Editors often save via write-new + rename, which only shows up on the
    // directory.
    let watch_dir = path
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| anyhow::anyhow!("Config path has no parent directory"))?;
    watcher.watch(&watch_dir, RecursiveMode::NonRecursive)?;

    while let Some(event) = watch_rx.recv().await {
        let affects_config = event.paths.iter().any(|p| p == path.as_path());
        let is_write = matches!(
            event.kind,
            notify::EventKind::Create(_) | notify::EventKind::Modify(_)
        );

        if affects_config && is_write && tx.send(DaemonEvent::ConfigChanged).await.is_err() {
            break;
        }
    }
    Ok(())
}
