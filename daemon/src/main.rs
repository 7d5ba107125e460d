use clap::Parser;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing_subscriber::EnvFilter;

use switch_input_daemon::action_log::{ActionLog, LogSettings};
use switch_input_daemon::app::App;
use switch_input_daemon::cli::{self, Cli, Command};
use switch_input_daemon::config;
use switch_input_daemon::daemon::Daemon;
use switch_input_daemon::event::DaemonEvent;
use switch_input_daemon::matcher::RuleMatcher;
use switch_input_daemon::paths;
use switch_input_daemon::platform::{
    ImSelectSwitcher, InputSwitcher, SystemWindowSource, DEFAULT_SWITCH_TIMEOUT,
};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_app(log: Arc<ActionLog>) -> App {
    App::new(
        Arc::new(RuleMatcher::new(paths::config_file_path())),
        log,
        Arc::new(SystemWindowSource::new()),
        Arc::new(ImSelectSwitcher::default()),
        DEFAULT_SWITCH_TIMEOUT + Duration::from_secs(1),
        paths::status_file_path(),
    )
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    // ── App data directory ────────────────────────────────────────────────────
    let app_dir = paths::app_data_dir();
    if let Err(e) = std::fs::create_dir_all(&app_dir) {
        tracing::error!("Failed to create app data directory {}: {e}", app_dir.display());
        std::process::exit(1);
    }

    let log = Arc::new(ActionLog::new(paths::log_file_path(), LogSettings::default()));

    let result = match cli.command {
        None | Some(Command::Run) => {
            run_daemon(log).await;
            Ok(())
        }
        Some(Command::Rules { action }) => {
            cli::run_rules(&build_app(log), action, &mut std::io::stdout().lock())
        }
        Some(Command::Logs { action }) => {
            cli::run_logs(&build_app(log), action, &mut std::io::stdout().lock())
        }
    };
    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run_daemon(log: Arc<ActionLog>) {
    if let Err(e) = log.start() {
        // Entries still buffer; each flush retries opening the file.
        tracing::error!("[log] Failed to start action log: {e}");
    }
    log.info("Daemon starting");

    let app = build_app(log);
    let switcher = ImSelectSwitcher::default();
    match switcher.current_input() {
        Ok(id) => tracing::info!("Current input method: {id}"),
        Err(e) => tracing::warn!("Could not read current input method: {e}"),
    }

    let (event_tx, mut event_rx) = mpsc::channel::<DaemonEvent>(32);

    // ── Background tasks ──────────────────────────────────────────────────────
    {
        let tx = event_tx.clone();
        let path = app.matcher().config_path().to_path_buf();
        tokio::spawn(async move {
            if let Err(e) = config::watch_config(path, tx).await {
                tracing::error!("[config] Watcher stopped: {e}");
            }
        });
    }

    // Graceful shutdown on Ctrl+C.
    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(DaemonEvent::Shutdown).await;
            }
        });
    }

    // ── Configuration ─────────────────────────────────────────────────────────
    let loaded = app
        .matcher()
        .load_config()
        .and_then(|()| app.matcher().config());
    let mut daemon = Daemon::new(app, event_tx);
    daemon.start(loaded);
    tracing::info!("switch-input-daemon v{} started", env!("CARGO_PKG_VERSION"));

    // ── Event loop ────────────────────────────────────────────────────────────
    while let Some(event) = event_rx.recv().await {
        if daemon.handle(event).await.is_break() {
            break;
        }
    }

    daemon.shutdown().await;
}
