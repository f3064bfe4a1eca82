//! Front ends that watch a running reset.
//!
//! The console front end waits for the worker. The tray front end pumps
//! Win32 messages every 50 ms, drains tray and pipeline events, and never
//! blocks on the worker.

use crate::runner::{RunError, RunHandle};
use crate::session::RunReport;
use crate::ui::TrayError;
use std::time::Duration;
use thiserror::Error;

/// Message pump period of the tray loop.
pub const PUMP_INTERVAL: Duration = Duration::from_millis(50);

/// How long the final tray icon stays up after the run.
pub const FINAL_STATUS_LINGER: Duration = Duration::from_millis(500);

/// Which front end watches the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontEnd {
    Console,
    Tray,
}

impl FrontEnd {
    /// Tray when the config asks for a background run or `--tray` is given;
    /// `--console` always wins.
    pub fn choose(run_in_background: bool, tray_flag: bool, console_flag: bool) -> Self {
        if console_flag {
            FrontEnd::Console
        } else if run_in_background || tray_flag {
            FrontEnd::Tray
        } else {
            FrontEnd::Console
        }
    }
}

/// Front end error types.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Run(#[from] RunError),

    #[error(transparent)]
    Tray(#[from] TrayError),
}

/// Block until the worker finishes. Ctrl+C is wired to the run's cancel
/// token by the caller.
pub fn run_console(handle: RunHandle) -> Result<RunReport, AppError> {
    Ok(handle.join()?)
}

/// Show the tray icon until the worker finishes.
#[cfg(windows)]
pub fn run_tray(handle: RunHandle) -> Result<RunReport, AppError> {
    use crate::orchestrator::PipelineEvent;
    use crate::ui::{MenuItemId, TrayEvent, TrayManager, TrayState};
    use std::time::Instant;
    use tracing::{info, warn};

    let mut tray = TrayManager::new();
    tray.create(TrayState::default())?;
    let mut cancel_requested = false;

    loop {
        let done = handle.is_finished();

        pump_messages();
        tray.process_events();

        while let Ok(TrayEvent::MenuItemClicked { id }) = tray.events().try_recv() {
            match id {
                MenuItemId::CancelReset | MenuItemId::Exit if !cancel_requested => {
                    info!("Cancel requested from tray.");
                    handle.cancel();
                    tray.set_cancel_enabled(false);
                    cancel_requested = true;
                }
                _ => {}
            }
        }

        while let Some(event) = handle.try_event() {
            let state = match &event {
                PipelineEvent::State { state, .. } => TrayState::for_state(*state),
                PipelineEvent::Finished(report) => TrayState::finished(report),
            };
            if let Err(e) = tray.apply(&state) {
                warn!("Tray update failed: {}", e);
            }
        }

        if done {
            break;
        }
        std::thread::sleep(PUMP_INTERVAL);
    }

    tray.set_cancel_enabled(false);
    let linger_until = Instant::now() + FINAL_STATUS_LINGER;
    while Instant::now() < linger_until {
        pump_messages();
        std::thread::sleep(PUMP_INTERVAL);
    }
    tray.destroy();

    Ok(handle.join()?)
}

#[cfg(windows)]
fn pump_messages() {
    use windows::Win32::Foundation::HWND;
    use windows::Win32::UI::WindowsAndMessaging::{
        DispatchMessageW, PeekMessageW, TranslateMessage, MSG, PM_REMOVE,
    };

    unsafe {
        let mut msg = MSG::default();
        while PeekMessageW(&mut msg, HWND::default(), 0, 0, PM_REMOVE).as_bool() {
            let _ = TranslateMessage(&msg);
            DispatchMessageW(&msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_front_end_choice() {
        assert_eq!(FrontEnd::choose(false, false, false), FrontEnd::Console);
        assert_eq!(FrontEnd::choose(true, false, false), FrontEnd::Tray);
        assert_eq!(FrontEnd::choose(false, true, false), FrontEnd::Tray);
        assert_eq!(FrontEnd::choose(true, true, true), FrontEnd::Console);
    }
}
