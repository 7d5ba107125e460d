/// Application context: the one place that wires focus changes to rule
/// matching, input switching, the action log and the status file.
///
/// The daemon builds a single [`App`] and hands every event to it; the CLI
/// builds one to reach the rule store and the log.
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Duration;

use crate::action_log::{ActionLog, LogLevel};
use crate::config::{Config, Rule, DEFAULT_SWITCH_DELAY_MS};
use crate::error::{ConfigError, ObservationError, SwitchError};
use crate::matcher::RuleMatcher;
use crate::platform::{InputSwitcher, WindowSource};
use crate::status::{self, DaemonState, DaemonStatus};
use crate::window_monitor::WindowObservation;

/// Result of acting on a matched rule.
#[derive(Debug)]
pub struct SwitchOutcome {
    pub rule: Rule,
    pub result: Result<(), SwitchError>,
}

pub struct App {
    matcher: Arc<RuleMatcher>,
    log: Arc<ActionLog>,
    windows: Arc<dyn WindowSource>,
    switcher: Arc<dyn InputSwitcher>,
    /// Upper bound on a single switch call, whatever the switcher does.
    switch_timeout: Duration,
    status_path: PathBuf,
    status: DaemonStatus,
}

impl App {
    pub fn new(
        matcher: Arc<RuleMatcher>,
        log: Arc<ActionLog>,
        windows: Arc<dyn WindowSource>,
        switcher: Arc<dyn InputSwitcher>,
        switch_timeout: Duration,
        status_path: PathBuf,
    ) -> Self {
        Self {
            matcher,
            log,
            windows,
            switcher,
            switch_timeout,
            status_path,
            status: DaemonStatus::new(),
        }
    }

    pub fn matcher(&self) -> &RuleMatcher {
        &self.matcher
    }

    pub fn log(&self) -> &ActionLog {
        &self.log
    }

    pub fn windows(&self) -> Arc<dyn WindowSource> {
        Arc::clone(&self.windows)
    }

    pub fn status(&self) -> &DaemonStatus {
        &self.status
    }

    pub fn set_state(&mut self, state: DaemonState) {
        self.status.state = state;
        status::write_status(&self.status_path, &self.status);
    }

    /// Records (or clears) the status-file error message.
    pub fn set_error(&mut self, error: Option<String>) {
        self.status.error = error;
        status::write_status(&self.status_path, &self.status);
    }

    /// Pushes the logging toggle and level from the live config into the
    /// action log.
    pub fn apply_settings(&self) {
        let Ok(config) = self.matcher.config() else {
            return;
        };
        self.log.set_enabled(config.general.enable_logging);
        let level = config.general.log_level.parse().unwrap_or_else(|e| {
            tracing::warn!("Invalid logLevel in config ({e}); using info");
            LogLevel::Info
        });
        self.log.set_min_level(level);
    }

    /// Re-reads config.json. A broken file leaves the previous rules live.
    pub fn reload_config(&self) -> Result<Config, ConfigError> {
        if let Err(e) = self.matcher.reload_config() {
            self.log.error(format!("Failed to reload config: {e}"));
            return Err(e);
        }
        self.apply_settings();
        self.log.info("Config reloaded");
        self.matcher.config()
    }

    /// Handles one focus change: log it, match it, and switch if a rule
    /// applies. Returns `None` when no rule matched.
    pub async fn handle_window_change(
        &mut self,
        window: WindowObservation,
    ) -> Option<SwitchOutcome> {
        tracing::info!("Window changed: {} ({})", window.app_name, window.window_name);
        self.log.window_change(&window.app_name, &window.window_name);
        self.status.active_application = Some(window.app_name.clone());

        let Some(rule) = self.matcher.match_window(&window) else {
            tracing::debug!("No rule for {}", window.app_name);
            status::write_status(&self.status_path, &self.status);
            return None;
        };

        tracing::info!("Rule matched: {} -> {}", rule.app_pattern, rule.target_input);
        self.log.rule_match(&rule.app_pattern, &rule.target_input);

        let delay = self
            .matcher
            .config()
            .map(|c| c.general.switch_delay)
            .unwrap_or(DEFAULT_SWITCH_DELAY_MS);
        tokio::time::sleep(Duration::from_millis(delay)).await;

        let result = self.switch(&rule.target_input).await;
        self.log.input_switch(
            &rule.app_pattern,
            &rule.target_input,
            result.as_ref().map(|_| ()),
        );
        match &result {
            Ok(()) => {
                tracing::info!("Switched input to {}", rule.target_input);
                self.status.current_input = Some(rule.target_input.clone());
                self.status.last_switch_timestamp = Some(chrono::Local::now().to_rfc3339());
                self.status.error = None;
            }
            Err(e) => {
                tracing::warn!("Failed to switch input to {}: {e}", rule.target_input);
                self.status.error = Some(format!("Switch to {} failed: {e}", rule.target_input));
            }
        }
        status::write_status(&self.status_path, &self.status);

        Some(SwitchOutcome { rule, result })
    }

    /// Runs the switcher on a blocking thread, giving up after
    /// `switch_timeout`.
    async fn switch(&self, input: &str) -> Result<(), SwitchError> {
        let switcher = Arc::clone(&self.switcher);
        let input = input.to_string();
        let task = tokio::task::spawn_blocking(move || switcher.switch_input(&input));
        match tokio::time::timeout(self.switch_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(SwitchError::Aborted(e.to_string())),
            Err(_) => Err(SwitchError::TimedOut {
                after: self.switch_timeout,
            }),
        }
    }

    /// Checks whether `rule`'s app is what the matcher picks for the window
    /// that has focus right now.
    pub fn test_rule(&self, rule: &Rule) -> Result<(bool, WindowObservation), ObservationError> {
        let window = self.windows.active_window()?;
        let matched = self
            .matcher
            .match_window(&window)
            .is_some_and(|m| m.app_pattern == rule.app_pattern);
        Ok((matched, window))
    }
}
