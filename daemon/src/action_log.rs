/// Structured action log: every observed focus change, rule match and switch
/// attempt, one JSON object per line in `~/.switch-input/logs/app.log`.
///
/// Entries are buffered in memory and written out when the buffer reaches
/// its capacity, when the periodic flush timer fires, or on `stop`. Before
/// each write the live file is rotated if it has grown past the size limit:
///
///   app.log → app.1.log → app.2.log → … → app.N.log (dropped)
///
/// Failures here are reported through `tracing` and never reach the code
/// that produced the entry.
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::error::{LogError, SwitchError};

pub const DEFAULT_MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;
pub const DEFAULT_MAX_LOG_FILES: usize = 5;
pub const DEFAULT_BUFFER_CAPACITY: usize = 100;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum LogLevel {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl LogLevel {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Debug,
            1 => LogLevel::Info,
            2 => LogLevel::Warn,
            _ => LogLevel::Error,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogAction {
    WindowChange,
    RuleMatch,
    SwitchSuccess,
    SwitchFailed,
}

/// One line of the action log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<LogAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            level,
            message: message.into(),
            app_name: None,
            input: None,
            action: None,
            error: None,
        }
    }

    pub fn with_app(mut self, app_name: &str) -> Self {
        self.app_name = Some(app_name.to_string());
        self
    }

    pub fn with_input(mut self, input: &str) -> Self {
        self.input = Some(input.to_string());
        self
    }

    pub fn with_action(mut self, action: LogAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct LogSettings {
    /// Live file size at which the next flush rotates first.
    pub max_size: u64,
    /// Number of rotated generations kept.
    pub max_files: usize,
    /// Buffered entries that trigger an immediate flush.
    pub buffer_capacity: usize,
    pub flush_interval: Duration,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_LOG_SIZE,
            max_files: DEFAULT_MAX_LOG_FILES,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LogStats {
    pub total_entries: u64,
    pub debug_count: u64,
    pub info_count: u64,
    pub warn_count: u64,
    pub error_count: u64,
    /// Size of the live file in bytes.
    pub file_size: u64,
}

struct LogState {
    buffer: Vec<LogEntry>,
    file: Option<File>,
}

struct Flusher {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct ActionLog {
    path: PathBuf,
    settings: LogSettings,
    state: Mutex<LogState>,
    enabled: AtomicBool,
    min_level: AtomicU8,
    flusher: Mutex<Option<Flusher>>,
}

impl ActionLog {
    pub fn new(path: impl Into<PathBuf>, settings: LogSettings) -> Self {
        let capacity = settings.buffer_capacity;
        Self {
            path: path.into(),
            settings,
            state: Mutex::new(LogState {
                buffer: Vec::with_capacity(capacity),
                file: None,
            }),
            enabled: AtomicBool::new(true),
            min_level: AtomicU8::new(LogLevel::Debug as u8),
            flusher: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_state(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── lifecycle ─────────────────────────────────────────────────────────────

    /// Opens (or creates) the live file and starts the periodic flush timer.
    pub fn start(self: &Arc<Self>) -> Result<(), LogError> {
        {
            let mut state = self.lock_state();
            open_into(&self.path, &mut state.file)?;
        }

        let mut flusher = self.flusher.lock().unwrap_or_else(PoisonError::into_inner);
        if flusher.is_some() {
            return Ok(());
        }
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let log = Arc::clone(self);
        let period = self.settings.flush_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        let log = Arc::clone(&log);
                        if let Err(e) = tokio::task::spawn_blocking(move || log.flush_and_report()).await {
                            tracing::error!("[log] Flush task panicked: {e}");
                        }
                    }
                }
            }
        });
        *flusher = Some(Flusher { stop_tx, handle });
        Ok(())
    }

    /// Cancels the flush timer, writes out whatever is buffered and closes
    /// the file.
    pub async fn stop(&self) {
        let flusher = self
            .flusher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(flusher) = flusher {
            let _ = flusher.stop_tx.send(true);
            if let Err(e) = flusher.handle.await {
                tracing::error!("[log] Flush timer ended abnormally: {e}");
            }
        }

        let mut state = self.lock_state();
        if let Err(e) = self.flush_locked(&mut state) {
            tracing::error!("[log] Final flush failed: {e}");
        }
        state.file = None;
    }

    // ── producers ─────────────────────────────────────────────────────────────

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Entries below `level` are dropped by `record`.
    pub fn set_min_level(&self, level: LogLevel) {
        self.min_level.store(level as u8, Ordering::Relaxed);
    }

    pub fn min_level(&self) -> LogLevel {
        LogLevel::from_u8(self.min_level.load(Ordering::Relaxed))
    }

    /// Buffers `entry`, flushing synchronously once the buffer is full.
    pub fn record(&self, entry: LogEntry) {
        if !self.is_enabled() || entry.level < self.min_level() {
            return;
        }
        let mut state = self.lock_state();
        state.buffer.push(entry);
        if state.buffer.len() >= self.settings.buffer_capacity {
            if let Err(e) = self.flush_locked(&mut state) {
                tracing::error!("[log] Flush failed: {e}");
            }
        }
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.record(LogEntry::new(LogLevel::Debug, message));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.record(LogEntry::new(LogLevel::Info, message));
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.record(LogEntry::new(LogLevel::Warn, message));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.record(LogEntry::new(LogLevel::Error, message));
    }

    pub fn window_change(&self, app_name: &str, window_name: &str) {
        self.record(
            LogEntry::new(
                LogLevel::Info,
                format!("Window changed: {app_name} ({window_name})"),
            )
            .with_app(app_name)
            .with_action(LogAction::WindowChange),
        );
    }

    pub fn rule_match(&self, app_name: &str, input: &str) {
        self.record(
            LogEntry::new(LogLevel::Info, format!("Rule matched: {app_name} -> {input}"))
                .with_app(app_name)
                .with_input(input)
                .with_action(LogAction::RuleMatch),
        );
    }

    pub fn input_switch(&self, app_name: &str, input: &str, result: Result<(), &SwitchError>) {
        let message = format!("Input switched: {app_name} -> {input}");
        let entry = match result {
            Ok(()) => LogEntry::new(LogLevel::Info, message).with_action(LogAction::SwitchSuccess),
            Err(e) => LogEntry::new(LogLevel::Error, format!("{message} (failed: {e})"))
                .with_action(LogAction::SwitchFailed)
                .with_error(e.to_string()),
        };
        self.record(entry.with_app(app_name).with_input(input));
    }

    pub fn buffered_len(&self) -> usize {
        self.lock_state().buffer.len()
    }

    // ── flushing ──────────────────────────────────────────────────────────────

    /// Writes every buffered entry to the live file and syncs it. Returns
    /// the number of entries written; an empty buffer is a no-op.
    pub fn flush(&self) -> Result<usize, LogError> {
        let mut state = self.lock_state();
        self.flush_locked(&mut state)
    }

    fn flush_and_report(&self) {
        if let Err(e) = self.flush() {
            tracing::error!("[log] Periodic flush failed: {e}");
        }
    }

    fn flush_locked(&self, state: &mut LogState) -> Result<usize, LogError> {
        if state.buffer.is_empty() {
            return Ok(0);
        }

        let LogState { buffer, file } = state;

        if live_size(&self.path) >= self.settings.max_size {
            // Keep writing to the oversized file; the next flush retries.
            if let Err(e) = self.rotate(file) {
                tracing::error!("[log] {e}");
            }
        }

        let mut lines = String::new();
        let mut written = 0;
        for entry in buffer.iter() {
            match serde_json::to_string(entry) {
                Ok(line) => {
                    lines.push_str(&line);
                    lines.push('\n');
                    written += 1;
                }
                Err(e) => tracing::error!("[log] Dropping unserializable entry: {e}"),
            }
        }

        let result = open_into(&self.path, file).and_then(|f| {
            f.write_all(lines.as_bytes())
                .and_then(|()| f.sync_data())
                .map_err(|source| LogError::Io {
                    path: self.path.clone(),
                    source,
                })
        });
        if result.is_err() {
            tracing::error!("[log] Dropping {} buffered entries", buffer.len());
        }
        buffer.clear();
        result.map(|()| written)
    }

    /// Path of rotated generation `n` (`app.log` → `app.<n>.log`).
    pub fn generation_path(&self, n: usize) -> PathBuf {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = match self.path.extension() {
            Some(ext) => format!("{stem}.{n}.{}", ext.to_string_lossy()),
            None => format!("{stem}.{n}"),
        };
        self.path.with_file_name(name)
    }

    /// Drops the oldest generation, shifts the rest up by one and moves the
    /// live file to `.1`. The fresh live file is opened by the next write.
    fn rotate(&self, file: &mut Option<File>) -> Result<(), LogError> {
        *file = None;
        let max = self.settings.max_files.max(1);
        let rotate_err = |source| LogError::Rotate {
            path: self.path.clone(),
            source,
        };

        remove_if_exists(&self.generation_path(max)).map_err(rotate_err)?;
        for k in (1..max).rev() {
            rename_if_exists(&self.generation_path(k), &self.generation_path(k + 1))
                .map_err(rotate_err)?;
        }
        std::fs::rename(&self.path, self.generation_path(1)).map_err(rotate_err)?;
        tracing::info!("[log] Rotated {}", self.path.display());
        Ok(())
    }

    // ── readers ───────────────────────────────────────────────────────────────

    /// The last `limit` entries of the live file, oldest first. Lines that do
    /// not decode are skipped. Buffered entries are not included.
    pub fn recent_entries(&self, limit: usize) -> Result<Vec<LogEntry>, LogError> {
        let mut entries = Vec::new();
        self.scan(|entry| entries.push(entry))?;
        let skip = entries.len().saturating_sub(limit);
        Ok(entries.split_off(skip))
    }

    pub fn stats(&self) -> Result<LogStats, LogError> {
        let mut stats = LogStats {
            file_size: live_size(&self.path),
            ..LogStats::default()
        };
        self.scan(|entry| {
            stats.total_entries += 1;
            match entry.level {
                LogLevel::Debug => stats.debug_count += 1,
                LogLevel::Info => stats.info_count += 1,
                LogLevel::Warn => stats.warn_count += 1,
                LogLevel::Error => stats.error_count += 1,
            }
        })?;
        Ok(stats)
    }

    fn scan(&self, mut visit: impl FnMut(LogEntry)) -> Result<(), LogError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(source) => {
                return Err(LogError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|source| LogError::Io {
                path: self.path.clone(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(entry) = serde_json::from_str::<LogEntry>(&line) {
                visit(entry);
            }
        }
        Ok(())
    }

    /// Drops buffered entries and empties the live file. Rotated
    /// generations are left alone.
    /// The live file keeps its identity: another process appending to it
    /// still writes into the visible file.
    pub fn clear(&self) -> Result<(), LogError> {
        let mut state = self.lock_state();
        state.buffer.clear();
        state.file = None;
        let io_err = |source| LogError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        File::create(&self.path).map_err(io_err)?;
        open_into(&self.path, &mut state.file)?;
        Ok(())
    }
}

/// Opens the live file in `slot` if it is not open yet.
fn open_into<'a>(path: &Path, slot: &'a mut Option<File>) -> Result<&'a mut File, LogError> {
    let file = match slot.take() {
        Some(f) => f,
        None => {
            let io_err = |source| LogError::Io {
                path: path.to_path_buf(),
                source,
            };
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(io_err)?
        }
    };
    Ok(slot.insert(file))
}

fn live_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn rename_if_exists(from: &Path, to: &Path) -> std::io::Result<()> {
    match std::fs::rename(from, to) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
