use crate::window_monitor::WindowObservation;

pub enum DaemonEvent {
    /// The foreground application changed; carries the fresh observation.
    WindowChanged(WindowObservation),
    /// config.json was created or modified on disk.
    ConfigChanged,
    /// Ctrl+C received; the daemon should flush the action log and exit.
    Shutdown,
}
