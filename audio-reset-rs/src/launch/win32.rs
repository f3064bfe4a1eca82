//! Win32 process launch and window manipulation.

use super::{AppLauncher, LaunchError};
use crate::platform::{to_wide, OwnedHandle};
use std::path::Path;
use windows::core::{PCWSTR, PWSTR};
use windows::Win32::Foundation::{BOOL, HWND, LPARAM};
use windows::Win32::System::Threading::{
    CreateProcessW, PROCESS_CREATION_FLAGS, PROCESS_INFORMATION, STARTF_USESHOWWINDOW,
    STARTUPINFOW,
};
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, FindWindowW, GetWindowThreadProcessId, IsWindowVisible, ShowWindow,
    SW_MINIMIZE, SW_SHOWMINIMIZED,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct Win32Launcher;

impl AppLauncher for Win32Launcher {
    fn spawn_minimized(&self, path: &Path) -> Result<u32, LaunchError> {
        let startup = STARTUPINFOW {
            cb: std::mem::size_of::<STARTUPINFOW>() as u32,
            dwFlags: STARTF_USESHOWWINDOW,
            wShowWindow: SW_SHOWMINIMIZED.0 as u16,
            ..Default::default()
        };
        let mut info = PROCESS_INFORMATION::default();

        // CreateProcessW may write into the command line buffer.
        let mut command_line = to_wide(&format!("\"{}\"", path.display()));
        let working_dir = path.parent().map(|dir| to_wide(&dir.to_string_lossy()));
        let working_dir_ptr = working_dir
            .as_ref()
            .map(|dir| PCWSTR(dir.as_ptr()))
            .unwrap_or(PCWSTR::null());

        unsafe {
            CreateProcessW(
                PCWSTR::null(),
                PWSTR(command_line.as_mut_ptr()),
                None,
                None,
                false,
                PROCESS_CREATION_FLAGS(0),
                None,
                working_dir_ptr,
                &startup,
                &mut info,
            )
            .map_err(|source| LaunchError::SpawnFailed {
                path: path.display().to_string(),
                source,
            })?;
        }

        // The child runs independently; only its id is kept.
        drop(OwnedHandle::new(info.hThread));
        drop(OwnedHandle::new(info.hProcess));

        Ok(info.dwProcessId)
    }

    fn minimize_windows_of(&self, pids: &[u32]) -> Result<usize, LaunchError> {
        let mut search = WindowSearch {
            pids,
            found: Vec::new(),
        };

        unsafe {
            // EnumWindows calls our callback for each top-level window
            let _ = EnumWindows(
                Some(collect_owned_windows),
                LPARAM(&mut search as *mut WindowSearch as isize),
            );

            for hwnd in &search.found {
                let _ = ShowWindow(*hwnd, SW_MINIMIZE);
            }
        }

        Ok(search.found.len())
    }

    fn has_window_titled(&self, title: &str) -> bool {
        let title_wide = to_wide(title);
        unsafe {
            FindWindowW(PCWSTR::null(), PCWSTR(title_wide.as_ptr()))
                .map(|hwnd| !hwnd.is_invalid())
                .unwrap_or(false)
        }
    }
}

struct WindowSearch<'a> {
    pids: &'a [u32],
    found: Vec<HWND>,
}

/// Callback for EnumWindows
///
/// Collects visible top-level windows owned by one of the searched pids.
unsafe extern "system" fn collect_owned_windows(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let search = &mut *(lparam.0 as *mut WindowSearch);

    if !IsWindowVisible(hwnd).as_bool() {
        return BOOL(1);
    }

    let mut pid: u32 = 0;
    GetWindowThreadProcessId(hwnd, Some(&mut pid));

    if search.pids.contains(&pid) {
        search.found.push(hwnd);
    }

    BOOL(1) // Continue enumeration
}
