/// OS collaborators: reading the foreground window and switching the input
/// method.
///
/// The daemon only talks to these through [`WindowSource`] and
/// [`InputSwitcher`], so tests substitute scripted fakes.
///
/// Window query:
///   - macOS: `osascript` asks System Events for the frontmost process.
///   - Windows: `GetForegroundWindow` + `GetWindowThreadProcessId`.
///   - elsewhere: unsupported.
/// Missing process name/path are filled from the pid through `sysinfo`.
///
/// Input switching shells out to `im-select`.
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread::JoinHandle;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::error::{ObservationError, SwitchError};
use crate::window_monitor::WindowObservation;

pub const DEFAULT_SWITCH_TIMEOUT: Duration = Duration::from_secs(5);
const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[cfg(target_os = "macos")]
pub const DEFAULT_IM_SELECT: &str = "/opt/homebrew/bin/im-select";
#[cfg(not(target_os = "macos"))]
pub const DEFAULT_IM_SELECT: &str = "im-select";

pub trait WindowSource: Send + Sync {
    fn active_window(&self) -> Result<WindowObservation, ObservationError>;
}

pub trait InputSwitcher: Send + Sync {
    /// Identifier of the currently selected input method.
    fn current_input(&self) -> Result<String, SwitchError>;
    fn switch_input(&self, input_id: &str) -> Result<(), SwitchError>;
}

// ── Window query ──────────────────────────────────────────────────────────────

/// Queries the real foreground window.
pub struct SystemWindowSource {
    sys: Mutex<System>,
}

impl SystemWindowSource {
    pub fn new() -> Self {
        Self {
            sys: Mutex::new(System::new()),
        }
    }

    /// Fills `app_name` / `app_path` from the process table when the
    /// platform query left them empty.
    fn fill_from_process(&self, window: &mut WindowObservation) {
        if window.pid == 0 || (!window.app_name.is_empty() && !window.app_path.is_empty()) {
            return;
        }
        let pid = Pid::from_u32(window.pid);
        let mut sys = self.sys.lock().unwrap_or_else(PoisonError::into_inner);
        sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), false);
        let Some(process) = sys.process(pid) else {
            return;
        };
        if window.app_name.is_empty() {
            window.app_name = process_display_name(&process.name().to_string_lossy());
        }
        if window.app_path.is_empty() {
            if let Some(exe) = process.exe() {
                window.app_path = exe.to_string_lossy().into_owned();
            }
        }
    }
}

impl Default for SystemWindowSource {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowSource for SystemWindowSource {
    fn active_window(&self) -> Result<WindowObservation, ObservationError> {
        let mut window = imp::query_foreground()?;
        self.fill_from_process(&mut window);
        if window.app_name.trim().is_empty() {
            return Err(ObservationError::NoActiveWindow);
        }
        Ok(window)
    }
}

/// Strips a trailing `.exe` so Windows process names read like app names.
pub fn process_display_name(name: &str) -> String {
    match name.len().checked_sub(4) {
        Some(cut) if name.is_char_boundary(cut) && name[cut..].eq_ignore_ascii_case(".exe") => {
            name[..cut].to_string()
        }
        _ => name.to_string(),
    }
}

/// Parses `"<name>, <pid>"` as printed by AppleScript for a two-item list.
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
pub fn parse_frontmost(output: &str) -> Result<(String, u32), ObservationError> {
    let output = output.trim();
    if output.is_empty() {
        return Err(ObservationError::NoActiveWindow);
    }
    let (name, pid) = output
        .rsplit_once(',')
        .ok_or_else(|| ObservationError::Parse(output.to_string()))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(ObservationError::NoActiveWindow);
    }
    // An unreadable pid is not fatal; the name is what matching uses.
    let pid = pid.trim().parse().unwrap_or(0);
    Ok((name.to_string(), pid))
}

#[cfg(target_os = "macos")]
mod imp {
    use super::*;

    const FRONTMOST_SCRIPT: &str = r#"tell application "System Events" to get {name, unix id} of first application process whose frontmost is true"#;

    pub fn query_foreground() -> Result<WindowObservation, ObservationError> {
        let output = Command::new("osascript")
            .args(["-e", FRONTMOST_SCRIPT])
            .output()
            .map_err(|e| ObservationError::Command(e.to_string()))?;
        if !output.status.success() {
            return Err(ObservationError::Command(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        let (app_name, pid) = parse_frontmost(&String::from_utf8_lossy(&output.stdout))?;
        Ok(WindowObservation {
            app_name,
            app_path: String::new(),
            window_name: String::new(),
            pid,
        })
    }
}

#[cfg(windows)]
mod imp {
    use super::*;
    use windows::Win32::UI::WindowsAndMessaging::{
        GetForegroundWindow, GetWindowTextW, GetWindowThreadProcessId,
    };

    pub fn query_foreground() -> Result<WindowObservation, ObservationError> {
        let hwnd = unsafe { GetForegroundWindow() };
        let mut pid = 0u32;
        unsafe { GetWindowThreadProcessId(hwnd, Some(&mut pid as *mut u32)) };
        if pid == 0 {
            return Err(ObservationError::NoActiveWindow);
        }

        let mut title = [0u16; 512];
        let len = unsafe { GetWindowTextW(hwnd, &mut title) };
        let window_name = String::from_utf16_lossy(&title[..len.max(0) as usize]);

        // Name and path come from the process table.
        Ok(WindowObservation {
            app_name: String::new(),
            app_path: String::new(),
            window_name,
            pid,
        })
    }
}

#[cfg(not(any(target_os = "macos", windows)))]
mod imp {
    use super::*;

    pub fn query_foreground() -> Result<WindowObservation, ObservationError> {
        Err(ObservationError::Unsupported(std::env::consts::OS))
    }
}

// ── Input switching ───────────────────────────────────────────────────────────

/// Runs the `im-select` binary: no argument prints the current input
/// method, one argument selects it. A run that outlives `timeout` is killed.
pub struct ImSelectSwitcher {
    program: PathBuf,
    timeout: Duration,
}

impl ImSelectSwitcher {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    fn run(&self, args: &[&str]) -> Result<String, SwitchError> {
        let program = self.program.display().to_string();
        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| SwitchError::Spawn {
                program: program.clone(),
                source,
            })?;

        // Both pipes are drained while waiting so a chatty child never
        // blocks on a full pipe buffer.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(SwitchError::TimedOut {
                        after: self.timeout,
                    });
                }
                Ok(None) => std::thread::sleep(CHILD_POLL_INTERVAL),
                Err(source) => return Err(SwitchError::Spawn { program, source }),
            }
        };

        let stdout = collect(stdout);
        if !status.success() {
            return Err(SwitchError::Failed {
                status: status.to_string(),
                stderr: collect(stderr).trim().to_string(),
            });
        }
        Ok(stdout.trim().to_string())
    }
}

/// Reads `pipe` to the end on its own thread.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> String {
    reader
        .and_then(|handle| handle.join().ok())
        .map(|buf| String::from_utf8_lossy(&buf).into_owned())
        .unwrap_or_default()
}

impl Default for ImSelectSwitcher {
    fn default() -> Self {
        Self::new(DEFAULT_IM_SELECT, DEFAULT_SWITCH_TIMEOUT)
    }
}

impl InputSwitcher for ImSelectSwitcher {
    fn current_input(&self) -> Result<String, SwitchError> {
        self.run(&[])
    }

    fn switch_input(&self, input_id: &str) -> Result<(), SwitchError> {
        self.run(&[input_id]).map(|_| ())
    }
}
