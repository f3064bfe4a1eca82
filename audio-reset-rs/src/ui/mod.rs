//! UI module for the system tray.

pub mod tray;

#[cfg(windows)]
pub use tray::TrayManager;
pub use tray::{tooltip_for, MenuItemId, TrayError, TrayEvent, TrayState};
