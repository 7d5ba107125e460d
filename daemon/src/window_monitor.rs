use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, Interval, MissedTickBehavior};

use crate::event::DaemonEvent;
use crate::platform::WindowSource;

/// One sampled snapshot of the focused application/window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct WindowObservation {
    pub app_name: String,
    pub app_path: String,
    pub window_name: String,
    pub pid: u32,
}

/// Remembers the last reported app and decides whether a new observation is
/// a focus change. Only `app_name` counts: a title or pid change inside the
/// same app is not a change.
#[derive(Debug, Default)]
pub struct ChangeDetector {
    last_app: Option<String>,
}

impl ChangeDetector {
    /// Returns `true` (and remembers `window`) if it differs from the last
    /// reported app.
    pub fn observe(&mut self, window: &WindowObservation) -> bool {
        if self.last_app.as_deref() == Some(window.app_name.as_str()) {
            return false;
        }
        self.last_app = Some(window.app_name.clone());
        true
    }
}

/// Handle to the running poll loop.
///
/// The loop queries `source` once per tick on a blocking thread and sends
/// [`DaemonEvent::WindowChanged`] at most once per tick. Query failures are
/// dropped for that tick. Changing the period keeps the loop, and with it
/// the last reported app.
pub struct WindowMonitor {
    stop_tx: watch::Sender<bool>,
    period_tx: watch::Sender<Duration>,
    handle: JoinHandle<()>,
}

impl WindowMonitor {
    pub fn start(
        source: Arc<dyn WindowSource>,
        period: Duration,
        tx: mpsc::Sender<DaemonEvent>,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (period_tx, period_rx) = watch::channel(period);
        let handle = tokio::spawn(run(source, tx, stop_rx, period_rx));
        tracing::info!("Window monitor started ({}ms interval)", period.as_millis());
        Self {
            stop_tx,
            period_tx,
            handle,
        }
    }

    pub fn period(&self) -> Duration {
        *self.period_tx.borrow()
    }

    /// Retimes the running loop. The next poll happens one new period from
    /// now.
    pub fn set_period(&self, period: Duration) {
        if self.period_tx.send_if_modified(|current| {
            let changed = *current != period;
            *current = period;
            changed
        }) {
            tracing::info!("Window monitor interval set to {}ms", period.as_millis());
        }
    }

    /// Signals the loop and waits for it to exit. No event is sent after
    /// this returns.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.handle.await {
            tracing::warn!("Window monitor task ended abnormally: {e}");
        }
        tracing::info!("Window monitor stopped");
    }
}

fn ticker(period: Duration, start: Instant) -> Interval {
    let mut ticker = interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn run(
    source: Arc<dyn WindowSource>,
    tx: mpsc::Sender<DaemonEvent>,
    mut stop_rx: watch::Receiver<bool>,
    mut period_rx: watch::Receiver<Duration>,
) {
    let first = *period_rx.borrow_and_update();
    let mut ticks = ticker(first, Instant::now());
    let mut detector = ChangeDetector::default();

    loop {
        tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            changed = period_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let period = *period_rx.borrow_and_update();
                ticks = ticker(period, Instant::now() + period);
                continue;
            }
            _ = ticks.tick() => {}
        }

        let query_source = Arc::clone(&source);
        let window = match tokio::task::spawn_blocking(move || query_source.active_window()).await
        {
            Ok(Ok(window)) => window,
            Ok(Err(e)) => {
                tracing::debug!("[monitor] Window query failed: {e}");
                continue;
            }
            Err(e) => {
                tracing::warn!("[monitor] Window query task failed: {e}");
                continue;
            }
        };

        // A stop requested while the query was running wins over its result.
        if *stop_rx.borrow() {
            break;
        }

        if !detector.observe(&window) {
            continue;
        }

        tracing::debug!("[monitor] Focus changed to {}", window.app_name);
        tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            sent = tx.send(DaemonEvent::WindowChanged(window)) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ObservationError;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn window(app: &str, title: &str, pid: u32) -> WindowObservation {
        WindowObservation {
            app_name: app.to_string(),
            app_path: String::new(),
            window_name: title.to_string(),
            pid,
        }
    }

    /// Replays a fixed script of query results, then reports no window.
    struct ScriptedSource {
        script: Mutex<VecDeque<Result<WindowObservation, ObservationError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<WindowObservation, ObservationError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl WindowSource for ScriptedSource {
        fn active_window(&self) -> Result<WindowObservation, ObservationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ObservationError::NoActiveWindow))
        }
    }

    /// Reports the same window on every poll.
    struct FixedSource {
        window: WindowObservation,
        polls: AtomicUsize,
    }

    impl FixedSource {
        fn new(window: WindowObservation) -> Arc<Self> {
            Arc::new(Self {
                window,
                polls: AtomicUsize::new(0),
            })
        }

        fn polls(&self) -> usize {
            self.polls.load(Ordering::SeqCst)
        }
    }

    impl WindowSource for FixedSource {
        fn active_window(&self) -> Result<WindowObservation, ObservationError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            Ok(self.window.clone())
        }
    }

    async fn next_change(rx: &mut mpsc::Receiver<DaemonEvent>) -> Option<WindowObservation> {
        match tokio::time::timeout(Duration::from_millis(500), rx.recv()).await {
            Ok(Some(DaemonEvent::WindowChanged(w))) => Some(w),
            _ => None,
        }
    }

    // ── ChangeDetector ────────────────────────────────────────────────────────

    #[test]
    fn first_observation_is_a_change() {
        let mut d = ChangeDetector::default();
        assert!(d.observe(&window("Safari", "", 1)));
    }

    #[test]
    fn title_and_pid_changes_are_ignored() {
        let mut d = ChangeDetector::default();
        assert!(d.observe(&window("Safari", "Apple", 1)));
        assert!(!d.observe(&window("Safari", "GitHub", 1)));
        assert!(!d.observe(&window("Safari", "GitHub", 2)));
    }

    #[test]
    fn switching_back_and_forth_reports_each_change() {
        let mut d = ChangeDetector::default();
        assert!(d.observe(&window("Safari", "", 1)));
        assert!(d.observe(&window("Terminal", "", 2)));
        assert!(d.observe(&window("Safari", "", 1)));
    }

    // ── poll loop ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn emits_once_per_app_change_and_survives_errors() {
        let source = ScriptedSource::new(vec![
            Ok(window("Safari", "Apple", 10)),
            Ok(window("Safari", "GitHub", 10)),
            Err(ObservationError::Command("osascript died".into())),
            Ok(window("Terminal", "zsh", 11)),
            Ok(window("Terminal", "vim", 11)),
        ]);
        let (tx, mut rx) = mpsc::channel(8);
        let monitor = WindowMonitor::start(source.clone(), Duration::from_millis(5), tx);

        let first = next_change(&mut rx).await.unwrap();
        assert_eq!(first.app_name, "Safari");
        assert_eq!(first.window_name, "Apple");
        let second = next_change(&mut rx).await.unwrap();
        assert_eq!(second.app_name, "Terminal");

        monitor.stop().await;
        assert!(rx.try_recv().is_err());
        assert!(source.calls.load(Ordering::SeqCst) >= 4);
    }

    #[tokio::test]
    async fn changing_period_does_not_reannounce_focused_app() {
        let source = FixedSource::new(window("Safari", "Apple", 10));
        let (tx, mut rx) = mpsc::channel(8);
        let monitor = WindowMonitor::start(source.clone(), Duration::from_millis(5), tx);

        assert_eq!(next_change(&mut rx).await.unwrap().app_name, "Safari");
        monitor.set_period(Duration::from_millis(10));
        assert_eq!(monitor.period(), Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(rx.try_recv().is_err());

        let polls_before = source.polls();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(source.polls() > polls_before);

        monitor.stop().await;
    }

    #[tokio::test]
    async fn setting_the_same_period_is_a_noop() {
        let (tx, _rx) = mpsc::channel(8);
        let monitor = WindowMonitor::start(
            ScriptedSource::new(vec![]),
            Duration::from_millis(5),
            tx,
        );
        monitor.set_period(Duration::from_millis(5));
        assert_eq!(monitor.period(), Duration::from_millis(5));
        monitor.stop().await;
    }

    #[tokio::test]
    async fn no_event_after_stop_returns() {
        let source = ScriptedSource::new(vec![]);
        let (tx, mut rx) = mpsc::channel(8);
        let monitor = WindowMonitor::start(source.clone(), Duration::from_millis(5), tx);
        tokio::time::sleep(Duration::from_millis(20)).await;
        monitor.stop().await;

        source
            .script
            .lock()
            .unwrap()
            .push_back(Ok(window("Safari", "", 1)));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stop_does_not_hang_on_a_full_channel() {
        let source = ScriptedSource::new(vec![
            Ok(window("A", "", 1)),
            Ok(window("B", "", 2)),
            Ok(window("C", "", 3)),
        ]);
        let (tx, _rx) = mpsc::channel(1);
        let monitor = WindowMonitor::start(source, Duration::from_millis(5), tx);
        tokio::time::sleep(Duration::from_millis(40)).await;
        tokio::time::timeout(Duration::from_secs(1), monitor.stop())
            .await
            .expect("stop should return while the consumer is idle");
    }
}
