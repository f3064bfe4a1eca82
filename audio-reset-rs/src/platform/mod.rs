//! Platform-specific module for Windows utilities.
//!
//! This module contains wide-string and handle helpers, registry access,
//! elevation, icon generation and the completion message box.

pub mod elevation;
pub mod icons;
#[cfg(windows)]
pub mod notify;
#[cfg(windows)]
pub mod registry;

#[cfg(windows)]
pub use registry::{RegistryError, RegistryLocator};

use std::path::PathBuf;

/// Encode a string as a nul-terminated UTF-16 buffer.
pub fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Decode a UTF-16 buffer up to its first nul.
pub fn from_wide(buf: &[u16]) -> String {
    let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..len])
}

/// Folder containing the running executable.
pub fn exe_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.to_path_buf()))
}

/// Kernel handle closed on drop.
#[cfg(windows)]
pub struct OwnedHandle(windows::Win32::Foundation::HANDLE);

#[cfg(windows)]
impl OwnedHandle {
    pub fn new(handle: windows::Win32::Foundation::HANDLE) -> Self {
        Self(handle)
    }

    pub fn raw(&self) -> windows::Win32::Foundation::HANDLE {
        self.0
    }
}

#[cfg(windows)]
impl Drop for OwnedHandle {
    fn drop(&mut self) {
        if !self.0.is_invalid() {
            unsafe {
                let _ = windows::Win32::Foundation::CloseHandle(self.0);
            }
        }
    }
}
