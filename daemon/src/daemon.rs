/// Long-running supervisor: owns the [`App`] and the window monitor and
/// applies every [`DaemonEvent`] to them.
///
/// A config that fails to load at startup does not end the process. The
/// daemon reports `stopped` with the error and keeps waiting for a config
/// change; the first reload that succeeds starts the monitor.
use std::ops::ControlFlow;
use tokio::sync::mpsc;
use tokio::time::Duration;

use crate::app::App;
use crate::config::Config;
use crate::error::ConfigError;
use crate::event::DaemonEvent;
use crate::startup;
use crate::status::DaemonState;
use crate::window_monitor::WindowMonitor;

pub struct Daemon {
    app: App,
    monitor: Option<WindowMonitor>,
    events: mpsc::Sender<DaemonEvent>,
}

impl Daemon {
    pub fn new(app: App, events: mpsc::Sender<DaemonEvent>) -> Self {
        Self {
            app,
            monitor: None,
            events,
        }
    }

    pub fn app(&self) -> &App {
        &self.app
    }

    pub fn is_watching(&self) -> bool {
        self.monitor.is_some()
    }

    /// Poll interval of the running monitor, if any.
    pub fn monitor_period(&self) -> Option<Duration> {
        self.monitor.as_ref().map(WindowMonitor::period)
    }

    /// Applies the outcome of the initial config load.
    pub fn start(&mut self, loaded: Result<Config, ConfigError>) {
        match loaded {
            Ok(config) => self.apply(&config),
            Err(e) => {
                tracing::error!("[config] Failed to load config: {e}; waiting for a fix");
                self.app.log().error(format!("Failed to load config: {e}"));
                self.app.set_error(Some(format!("Config error: {e}")));
                self.app.set_state(DaemonState::Stopped);
            }
        }
    }

    /// Handles one event. `Break` means the daemon should shut down.
    pub async fn handle(&mut self, event: DaemonEvent) -> ControlFlow<()> {
        match event {
            DaemonEvent::WindowChanged(window) => {
                if let Some(outcome) = self.app.handle_window_change(window).await {
                    tracing::debug!(
                        "Rule {} -> {} finished: {}",
                        outcome.rule.app_pattern,
                        outcome.rule.target_input,
                        if outcome.result.is_ok() { "ok" } else { "failed" }
                    );
                }
            }

            DaemonEvent::ConfigChanged => match self.app.reload_config() {
                Ok(config) => {
                    tracing::info!("Config reloaded");
                    self.apply(&config);
                }
                Err(e) => {
                    tracing::error!("[config] Failed to reload config: {e}");
                    if !self.is_watching() {
                        self.app.set_error(Some(format!("Config error: {e}")));
                    }
                }
            },

            DaemonEvent::Shutdown => {
                tracing::info!("Shutting down");
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Stops the monitor, flushes the log and reports `stopped`.
    pub async fn shutdown(mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.stop().await;
        }
        self.app.log().info("Daemon shutting down");
        self.app.log().stop().await;
        self.app.set_state(DaemonState::Stopped);
    }

    /// Pushes a freshly loaded config into the running daemon. A changed
    /// check interval retimes the existing monitor.
    fn apply(&mut self, config: &Config) {
        if let Err(e) = startup::apply_autostart(config.general.auto_start) {
            tracing::warn!("[startup] {e}");
        }
        self.app.apply_settings();

        let period = Duration::from_millis(config.general.check_interval);
        if let Some(monitor) = &self.monitor {
            monitor.set_period(period);
            return;
        }
        self.monitor = Some(WindowMonitor::start(
            self.app.windows(),
            period,
            self.events.clone(),
        ));
        self.app.set_error(None);
        self.app.set_state(DaemonState::Watching);
        self.app.log().info("Input switching service started");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action_log::{ActionLog, LogSettings};
    use crate::config::{write_config, GeneralSettings, Rule};
    use crate::error::{ObservationError, SwitchError};
    use crate::matcher::RuleMatcher;
    use crate::platform::{InputSwitcher, WindowSource};
    use crate::window_monitor::WindowObservation;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Focused(WindowObservation);

    impl WindowSource for Focused {
        fn active_window(&self) -> Result<WindowObservation, ObservationError> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct CountingSwitcher {
        switches: AtomicUsize,
    }

    impl InputSwitcher for CountingSwitcher {
        fn current_input(&self) -> Result<String, SwitchError> {
            Ok(String::new())
        }

        fn switch_input(&self, _input_id: &str) -> Result<(), SwitchError> {
            self.switches.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn safari() -> WindowObservation {
        WindowObservation {
            app_name: "Safari".to_string(),
            app_path: String::new(),
            window_name: "Apple".to_string(),
            pid: 3,
        }
    }

    fn config(check_interval: u64) -> Config {
        Config {
            rules: vec![Rule::new("Safari", "pinyin", 1)],
            general: GeneralSettings {
                check_interval,
                switch_delay: 1,
                ..GeneralSettings::default()
            },
            last_modified: String::new(),
        }
    }

    fn daemon(
        dir: &tempfile::TempDir,
        switcher: Arc<CountingSwitcher>,
    ) -> (Daemon, mpsc::Receiver<DaemonEvent>) {
        let matcher = Arc::new(RuleMatcher::new(dir.path().join("config.json")));
        let log = Arc::new(ActionLog::new(
            dir.path().join("logs").join("app.log"),
            LogSettings::default(),
        ));
        let app = App::new(
            matcher,
            log,
            Arc::new(Focused(safari())),
            switcher,
            Duration::from_secs(1),
            dir.path().join("status.toml"),
        );
        let (tx, rx) = mpsc::channel(8);
        (Daemon::new(app, tx), rx)
    }

    fn load(daemon: &Daemon) -> Result<Config, ConfigError> {
        daemon
            .app()
            .matcher()
            .load_config()
            .and_then(|()| daemon.app().matcher().config())
    }

    async fn next_event(rx: &mut mpsc::Receiver<DaemonEvent>) -> Option<DaemonEvent> {
        tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .ok()
            .flatten()
    }

    fn status_file(dir: &tempfile::TempDir) -> String {
        std::fs::read_to_string(dir.path().join("status.toml")).unwrap()
    }

    // ── startup ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn broken_config_at_startup_waits_instead_of_exiting() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), "{ broken").unwrap();
        let (mut daemon, mut rx) = daemon(&dir, Arc::new(CountingSwitcher::default()));

        let loaded = load(&daemon);
        assert!(matches!(loaded, Err(ConfigError::Parse { .. })));
        daemon.start(loaded);

        assert!(!daemon.is_watching());
        let status = status_file(&dir);
        assert!(status.contains("state = \"stopped\""));
        assert!(status.contains("Config error"));
        assert!(next_event(&mut rx).await.is_none());
    }

    #[tokio::test]
    async fn fixed_config_starts_the_monitor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ broken").unwrap();
        let switcher = Arc::new(CountingSwitcher::default());
        let (mut daemon, mut rx) = daemon(&dir, switcher.clone());
        let loaded = load(&daemon);
        daemon.start(loaded);

        // Still broken: keep waiting.
        assert!(daemon.handle(DaemonEvent::ConfigChanged).await.is_continue());
        assert!(!daemon.is_watching());

        write_config(&path, &config(5)).unwrap();
        assert!(daemon.handle(DaemonEvent::ConfigChanged).await.is_continue());
        assert!(daemon.is_watching());
        let status = status_file(&dir);
        assert!(status.contains("state = \"watching\""));
        assert!(!status.contains("Config error"));

        let event = next_event(&mut rx).await.unwrap();
        assert!(matches!(&event, DaemonEvent::WindowChanged(w) if w.app_name == "Safari"));
        assert!(daemon.handle(event).await.is_continue());
        assert_eq!(switcher.switches.load(Ordering::SeqCst), 1);

        daemon.shutdown().await;
    }

    // ── reload ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn interval_change_does_not_repeat_the_last_switch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        write_config(&path, &config(5)).unwrap();
        let switcher = Arc::new(CountingSwitcher::default());
        let (mut daemon, mut rx) = daemon(&dir, switcher.clone());
        let loaded = load(&daemon);
        daemon.start(loaded);

        let event = next_event(&mut rx).await.unwrap();
        assert!(daemon.handle(event).await.is_continue());

        write_config(&path, &config(10)).unwrap();
        assert!(daemon.handle(DaemonEvent::ConfigChanged).await.is_continue());
        assert_eq!(daemon.monitor_period(), Some(Duration::from_millis(10)));

        assert!(next_event(&mut rx).await.is_none());
        assert_eq!(switcher.switches.load(Ordering::SeqCst), 1);

        daemon.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_event_breaks_and_reports_stopped() {
        let dir = tempfile::tempdir().unwrap();
        write_config(&dir.path().join("config.json"), &config(5)).unwrap();
        let (mut daemon, _rx) = daemon(&dir, Arc::new(CountingSwitcher::default()));
        let loaded = load(&daemon);
        daemon.start(loaded);

        assert!(daemon.handle(DaemonEvent::Shutdown).await.is_break());
        daemon.shutdown().await;
        assert!(status_file(&dir).contains("state = \"stopped\""));
    }
}
