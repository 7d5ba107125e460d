/// Login-startup registration driven by the `general.autoStart` setting.
///
/// On Windows the daemon adds or removes itself under
/// `HKCU\Software\Microsoft\Windows\CurrentVersion\Run`. Elsewhere this is a
/// no-op; login items on other platforms are left to the installer.
use anyhow::Result;

#[cfg(windows)]
mod imp {
    use anyhow::{bail, Result};
    use windows::core::PCWSTR;
    use windows::Win32::Foundation::{ERROR_FILE_NOT_FOUND, ERROR_SUCCESS, WIN32_ERROR};
    use windows::Win32::System::Registry::{
        RegCloseKey, RegCreateKeyExW, RegDeleteValueW, RegOpenKeyExW, RegSetValueExW, HKEY,
        HKEY_CURRENT_USER, KEY_SET_VALUE, REG_OPTION_NON_VOLATILE, REG_SZ,
    };

    const RUN_SUBKEY: &str = r"Software\Microsoft\Windows\CurrentVersion\Run";
    const ENTRY_NAME: &str = "SwitchInput";

    fn wide(s: &str) -> Vec<u16> {
        s.encode_utf16().chain(std::iter::once(0)).collect()
    }

    fn check(call: &str, status: WIN32_ERROR) -> Result<()> {
        if status != ERROR_SUCCESS {
            bail!("{call} failed: {status:?}");
        }
        Ok(())
    }

    /// Writable handle to the per-user Run key, closed on drop.
    struct RunKey(HKEY);

    impl RunKey {
        fn create() -> Result<Self> {
            let subkey = wide(RUN_SUBKEY);
            let mut hkey = HKEY::default();
            let status = unsafe {
                RegCreateKeyExW(
                    HKEY_CURRENT_USER,
                    PCWSTR::from_raw(subkey.as_ptr()),
                    0,
                    PCWSTR::null(),
                    REG_OPTION_NON_VOLATILE,
                    KEY_SET_VALUE,
                    None,
                    &mut hkey,
                    None,
                )
            };
            check("RegCreateKeyExW", status)?;
            Ok(Self(hkey))
        }

        /// `None` when the key does not exist.
        fn open() -> Option<Self> {
            let subkey = wide(RUN_SUBKEY);
            let mut hkey = HKEY::default();
            let status = unsafe {
                RegOpenKeyExW(
                    HKEY_CURRENT_USER,
                    PCWSTR::from_raw(subkey.as_ptr()),
                    0,
                    KEY_SET_VALUE,
                    &mut hkey,
                )
            };
            (status == ERROR_SUCCESS).then_some(Self(hkey))
        }
    }

    impl Drop for RunKey {
        fn drop(&mut self) {
            let _ = unsafe { RegCloseKey(self.0) };
        }
    }

    pub fn register(exe_path: &str) -> Result<()> {
        let key = RunKey::create()?;
        let name = wide(ENTRY_NAME);
        let data = wide(exe_path);
        // REG_SZ data is the UTF-16 string including its terminator, as bytes.
        let bytes: Vec<u8> = data.iter().flat_map(|unit| unit.to_le_bytes()).collect();
        let status =
            unsafe { RegSetValueExW(key.0, PCWSTR::from_raw(name.as_ptr()), 0, REG_SZ, Some(&bytes)) };
        check("RegSetValueExW", status)
    }

    /// A missing key or value counts as already unregistered.
    pub fn unregister() -> Result<()> {
        let Some(key) = RunKey::open() else {
            return Ok(());
        };
        let name = wide(ENTRY_NAME);
        let status = unsafe { RegDeleteValueW(key.0, PCWSTR::from_raw(name.as_ptr())) };
        if status == ERROR_FILE_NOT_FOUND {
            return Ok(());
        }
        check("RegDeleteValueW", status)
    }
}

/// Registers or unregisters the running binary as a login item so that it
/// matches `enabled`.
pub fn apply_autostart(enabled: bool) -> Result<()> {
    #[cfg(windows)]
    {
        if enabled {
            let exe = std::env::current_exe()
                .map_err(|e| anyhow::anyhow!("Failed to locate daemon executable: {e}"))?;
            let exe_str = exe.to_string_lossy();
            imp::register(&exe_str)?;
            tracing::info!("[startup] Registered in Windows startup: {exe_str}");
        } else {
            imp::unregister()?;
            tracing::debug!("[startup] Not registered in Windows startup");
        }
    }
    #[cfg(not(windows))]
    {
        tracing::debug!("[startup] autoStart={enabled} has no effect on this platform");
    }
    Ok(())
}
