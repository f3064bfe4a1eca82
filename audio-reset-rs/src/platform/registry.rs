//! Windows Registry install-path lookup.
//!
//! Searches the machine-wide uninstall entries for an installed product.

use crate::audio::device::contains_ignore_case;
use crate::launch::InstallLocator;
use crate::platform::{from_wide, to_wide};
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;
use windows::core::{PCWSTR, PWSTR};
use windows::Win32::System::Registry::{
    RegCloseKey, RegEnumKeyExW, RegOpenKeyExW, RegQueryValueExW, HKEY, HKEY_LOCAL_MACHINE,
    KEY_READ,
};

/// Registry error types.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Failed to open registry key {path} (error {code})")]
    OpenFailed { path: String, code: u32 },

    #[error("Registry value missing: {name}")]
    ValueMissing { name: String },
}

/// Open registry key closed on drop.
struct RegKey(HKEY);

impl RegKey {
    fn open(parent: HKEY, path: &str) -> Result<Self, RegistryError> {
        let path_wide = to_wide(path);
        let mut hkey = HKEY::default();
        let result = unsafe {
            RegOpenKeyExW(
                parent,
                PCWSTR::from_raw(path_wide.as_ptr()),
                0,
                KEY_READ,
                &mut hkey,
            )
        };

        if result.is_err() {
            return Err(RegistryError::OpenFailed {
                path: path.to_string(),
                code: result.0,
            });
        }
        Ok(Self(hkey))
    }

    /// Names of all direct subkeys.
    fn subkey_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut buf = [0u16; 256];

        for index in 0.. {
            let mut len = buf.len() as u32;
            let result = unsafe {
                RegEnumKeyExW(
                    self.0,
                    index,
                    PWSTR(buf.as_mut_ptr()),
                    &mut len,
                    None,
                    PWSTR::null(),
                    None,
                    None,
                )
            };
            if result.is_err() {
                break;
            }
            names.push(from_wide(&buf[..len as usize]));
        }

        names
    }

    /// A REG_SZ value, or an error when it is absent.
    fn string_value(&self, name: &str) -> Result<String, RegistryError> {
        let name_wide = to_wide(name);
        let missing = || RegistryError::ValueMissing {
            name: name.to_string(),
        };

        let mut size = 0u32;
        let result = unsafe {
            RegQueryValueExW(
                self.0,
                PCWSTR::from_raw(name_wide.as_ptr()),
                None,
                None,
                None,
                Some(&mut size),
            )
        };
        if result.is_err() || size == 0 {
            return Err(missing());
        }

        let mut data = vec![0u16; (size as usize).div_ceil(2) + 1];
        let result = unsafe {
            RegQueryValueExW(
                self.0,
                PCWSTR::from_raw(name_wide.as_ptr()),
                None,
                None,
                Some(data.as_mut_ptr() as *mut u8),
                Some(&mut size),
            )
        };
        if result.is_err() {
            return Err(missing());
        }

        Ok(from_wide(&data))
    }
}

impl Drop for RegKey {
    fn drop(&mut self) {
        unsafe {
            let _ = RegCloseKey(self.0);
        }
    }
}

/// `InstallLocator` over the native and 32-bit uninstall keys.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegistryLocator;

impl RegistryLocator {
    const UNINSTALL_ROOTS: [&'static str; 2] = [
        r"SOFTWARE\Microsoft\Windows\CurrentVersion\Uninstall",
        r"SOFTWARE\WOW6432Node\Microsoft\Windows\CurrentVersion\Uninstall",
    ];

    fn search_root(&self, root: &str, fragment: &str) -> Result<Option<PathBuf>, RegistryError> {
        let uninstall = RegKey::open(HKEY_LOCAL_MACHINE, root)?;

        for name in uninstall.subkey_names() {
            let Ok(entry) = RegKey::open(uninstall.0, &name) else {
                continue;
            };

            let Ok(display_name) = entry.string_value("DisplayName") else {
                continue;
            };
            if !contains_ignore_case(&display_name, fragment) {
                continue;
            }

            // Some installers leave InstallLocation empty; keep looking.
            if let Ok(location) = entry.string_value("InstallLocation") {
                let location = location.trim().trim_matches('"');
                if !location.is_empty() {
                    debug!(display_name = %display_name, location, "Found install entry");
                    return Ok(Some(PathBuf::from(location)));
                }
            }
        }

        Ok(None)
    }
}

impl InstallLocator for RegistryLocator {
    fn install_location(&self, display_name_fragment: &str) -> Option<PathBuf> {
        for root in Self::UNINSTALL_ROOTS {
            match self.search_root(root, display_name_fragment) {
                Ok(Some(path)) => return Some(path),
                Ok(None) => {}
                Err(e) => debug!(error = %e, "Uninstall key not readable"),
            }
        }
        None
    }
}
