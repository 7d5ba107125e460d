/// Canonical file paths for switch-input data files.
///
/// Everything lives under `~/.switch-input/`:
///   - config.json     Rule set and general settings.
///   - status.toml     Written by the daemon for anything that wants to show its state.
///   - logs/app.log    Action log, rotated to app.1.log … app.N.log.
use std::path::PathBuf;

const APP_DIR_NAME: &str = ".switch-input";
const LOG_DIR_NAME: &str = "logs";
pub const CONFIG_FILE_NAME: &str = "config.json";
pub const STATUS_FILE_NAME: &str = "status.toml";
pub const LOG_FILE_NAME: &str = "app.log";

/// Returns the application data directory. Falls back to the current
/// directory when no home directory can be resolved.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

pub fn config_file_path() -> PathBuf {
    app_data_dir().join(CONFIG_FILE_NAME)
}

pub fn status_file_path() -> PathBuf {
    app_data_dir().join(STATUS_FILE_NAME)
}

pub fn log_dir() -> PathBuf {
    app_data_dir().join(LOG_DIR_NAME)
}

pub fn log_file_path() -> PathBuf {
    log_dir().join(LOG_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_data_dir_ends_with_app_dir_name() {
        let dir = app_data_dir();
        assert_eq!(dir.file_name().unwrap(), APP_DIR_NAME);
    }

    #[test]
    fn config_file_path_has_correct_name() {
        let path = config_file_path();
        assert_eq!(path.file_name().unwrap(), CONFIG_FILE_NAME);
    }

    #[test]
    fn config_and_status_share_same_parent_dir() {
        assert_eq!(config_file_path().parent(), status_file_path().parent());
    }

    #[test]
    fn log_file_lives_in_logs_subdir() {
        let path = log_file_path();
        assert_eq!(path.file_name().unwrap(), LOG_FILE_NAME);
        assert_eq!(path.parent().unwrap(), log_dir());
        assert_eq!(log_dir().parent().unwrap(), app_data_dir());
    }
}
