//! Administrator elevation.
//!
//! Stopping audio services needs an elevated token. When the process is not
//! elevated it relaunches itself through the UAC "runas" verb and forwards
//! the child's exit code.

use thiserror::Error;

/// Flag appended to the relaunched command line so the child never tries
/// to elevate again.
pub const NO_ELEVATE_FLAG: &str = "--no-elevate";

/// Elevation error types.
#[derive(Debug, Error)]
pub enum ElevationError {
    #[error("Elevation was declined")]
    Declined,

    #[error("Failed to locate own executable: {0}")]
    CurrentExe(#[from] std::io::Error),

    #[cfg(windows)]
    #[error("Failed to query process token: {0}")]
    TokenQuery(#[source] windows::core::Error),

    #[cfg(windows)]
    #[error("Failed to relaunch elevated: {0}")]
    RelaunchFailed(#[source] windows::core::Error),
}

/// Command line for the elevated child: the original arguments, each
/// quoted when needed, plus exactly one `--no-elevate`.
pub fn relaunch_parameters<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(AsRef::as_ref)
        .filter(|arg| *arg != NO_ELEVATE_FLAG)
        .map(quote_arg)
        .chain(std::iter::once(NO_ELEVATE_FLAG.to_string()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Quote one argument using the MSVCRT rules.
fn quote_arg(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains([' ', '\t', '"']) {
        return arg.to_string();
    }

    let mut quoted = String::from("\"");
    let mut backslashes = 0;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                quoted.push_str(&"\\".repeat(backslashes * 2 + 1));
                quoted.push('"');
                backslashes = 0;
            }
            _ => {
                quoted.push_str(&"\\".repeat(backslashes));
                quoted.push(c);
                backslashes = 0;
            }
        }
    }
    quoted.push_str(&"\\".repeat(backslashes * 2));
    quoted.push('"');
    quoted
}

/// Whether the current process token is elevated.
#[cfg(windows)]
pub fn is_elevated() -> Result<bool, ElevationError> {
    use crate::platform::OwnedHandle;
    use windows::Win32::Foundation::HANDLE;
    use windows::Win32::Security::{GetTokenInformation, TokenElevation, TOKEN_ELEVATION, TOKEN_QUERY};
    use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

    unsafe {
        let mut token = HANDLE::default();
        OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token)
            .map_err(ElevationError::TokenQuery)?;
        let token = OwnedHandle::new(token);

        let mut elevation = TOKEN_ELEVATION::default();
        let mut returned = 0u32;
        GetTokenInformation(
            token.raw(),
            TokenElevation,
            Some(&mut elevation as *mut TOKEN_ELEVATION as *mut _),
            std::mem::size_of::<TOKEN_ELEVATION>() as u32,
            &mut returned,
        )
        .map_err(ElevationError::TokenQuery)?;

        Ok(elevation.TokenIsElevated != 0)
    }
}

/// Relaunch this executable elevated with `args`, wait for it, and return
/// its exit code.
#[cfg(windows)]
pub fn relaunch_elevated<S: AsRef<str>>(args: &[S]) -> Result<u32, ElevationError> {
    use crate::platform::{to_wide, OwnedHandle};
    use windows::core::{w, PCWSTR};
    use windows::Win32::Foundation::ERROR_CANCELLED;
    use windows::Win32::System::Threading::{GetExitCodeProcess, WaitForSingleObject, INFINITE};
    use windows::Win32::UI::Shell::{ShellExecuteExW, SEE_MASK_NOCLOSEPROCESS, SHELLEXECUTEINFOW};
    use windows::Win32::UI::WindowsAndMessaging::SW_SHOWNORMAL;

    let exe = std::env::current_exe()?;
    let exe_wide = to_wide(&exe.to_string_lossy());
    let params_wide = to_wide(&relaunch_parameters(args));

    let mut info = SHELLEXECUTEINFOW {
        cbSize: std::mem::size_of::<SHELLEXECUTEINFOW>() as u32,
        fMask: SEE_MASK_NOCLOSEPROCESS,
        lpVerb: w!("runas"),
        lpFile: PCWSTR(exe_wide.as_ptr()),
        lpParameters: PCWSTR(params_wide.as_ptr()),
        nShow: SW_SHOWNORMAL.0,
        ..Default::default()
    };

    unsafe {
        if let Err(e) = ShellExecuteExW(&mut info) {
            if e.code() == ERROR_CANCELLED.to_hresult() {
                return Err(ElevationError::Declined);
            }
            return Err(ElevationError::RelaunchFailed(e));
        }

        let process = OwnedHandle::new(info.hProcess);
        let _ = WaitForSingleObject(process.raw(), INFINITE);

        let mut exit_code = 0u32;
        GetExitCodeProcess(process.raw(), &mut exit_code)
            .map_err(ElevationError::RelaunchFailed)?;
        Ok(exit_code)
    }
}
