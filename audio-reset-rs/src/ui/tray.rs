//! System tray icon management.
//!
//! Shows the reset status as a colored icon and a tooltip, with a context
//! menu to cancel the run or exit.

use crate::platform::icons::IconStatus;
use crate::session::RunReport;
use crate::state::PipelineState;
use thiserror::Error;

#[cfg(windows)]
use std::sync::mpsc::{channel, Receiver, Sender};
#[cfg(windows)]
use tray_icon::{
    menu::{Menu, MenuEvent, MenuItem, PredefinedMenuItem},
    TrayIcon, TrayIconBuilder,
};

const TOOLTIP_PREFIX: &str = "Audio Reset";

/// Icon and tooltip for the tray.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrayState {
    pub tooltip: String,
    pub status: IconStatus,
}

impl Default for TrayState {
    fn default() -> Self {
        Self::for_state(PipelineState::Idle)
    }
}

impl TrayState {
    /// Amber icon with the state's label while the run is in progress.
    pub fn for_state(state: PipelineState) -> Self {
        let status = match state {
            PipelineState::Complete => IconStatus::Complete,
            PipelineState::Aborted => IconStatus::Failed,
            _ => IconStatus::Working,
        };
        Self {
            tooltip: tooltip_for(state.label()),
            status,
        }
    }

    /// Final icon for a finished run: green if clean or only warnings, red
    /// if a step failed or the run was cancelled.
    pub fn finished(report: &RunReport) -> Self {
        if report.final_state == PipelineState::Aborted {
            Self::for_state(PipelineState::Aborted)
        } else if report.has_failures() {
            Self {
                tooltip: tooltip_for("Finished with errors"),
                status: IconStatus::Failed,
            }
        } else {
            Self::for_state(PipelineState::Complete)
        }
    }
}

/// `Audio Reset - <label>`
pub fn tooltip_for(label: &str) -> String {
    format!("{} - {}", TOOLTIP_PREFIX, label)
}

/// Events from the system tray.
#[derive(Debug, Clone)]
pub enum TrayEvent {
    /// Menu item selected
    MenuItemClicked { id: MenuItemId },
}

/// Menu item identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MenuItemId {
    CancelReset,
    Exit,
}

/// Tray service error types.
#[derive(Debug, Error)]
pub enum TrayError {
    #[error("Failed to create tray icon: {0}")]
    CreateFailed(String),

    #[error("Failed to load icon resource: {0}")]
    IconLoadFailed(String),

    #[error("Tray icon not initialized")]
    NotInitialized,

    #[error("Failed to create menu: {0}")]
    MenuFailed(String),
}

/// System tray manager.
#[cfg(windows)]
pub struct TrayManager {
    tray_icon: Option<TrayIcon>,
    event_sender: Sender<TrayEvent>,
    event_receiver: Receiver<TrayEvent>,
    cancel_menu_id: Option<tray_icon::menu::MenuId>,
    exit_menu_id: Option<tray_icon::menu::MenuId>,
    cancel_item: Option<MenuItem>,
    status: Option<IconStatus>,
}

#[cfg(windows)]
impl TrayManager {
    /// Create a new TrayManager.
    pub fn new() -> Self {
        let (sender, receiver) = channel();
        Self {
            tray_icon: None,
            event_sender: sender,
            event_receiver: receiver,
            cancel_menu_id: None,
            exit_menu_id: None,
            cancel_item: None,
            status: None,
        }
    }

    /// Create and show the tray icon.
    pub fn create(&mut self, initial_state: TrayState) -> Result<(), TrayError> {
        let icon = create_icon(initial_state.status)?;

        let menu = Menu::new();

        let cancel_item = MenuItem::new("Cancel Reset", true, None);
        self.cancel_menu_id = Some(cancel_item.id().clone());
        menu.append(&cancel_item)
            .map_err(|e| TrayError::MenuFailed(e.to_string()))?;
        self.cancel_item = Some(cancel_item);

        menu.append(&PredefinedMenuItem::separator())
            .map_err(|e| TrayError::MenuFailed(e.to_string()))?;

        let exit_item = MenuItem::new("Exit", true, None);
        self.exit_menu_id = Some(exit_item.id().clone());
        menu.append(&exit_item)
            .map_err(|e| TrayError::MenuFailed(e.to_string()))?;

        let tray_icon = TrayIconBuilder::new()
            .with_icon(icon)
            .with_tooltip(&initial_state.tooltip)
            .with_menu(Box::new(menu))
            .build()
            .map_err(|e| TrayError::CreateFailed(e.to_string()))?;

        self.tray_icon = Some(tray_icon);
        self.status = Some(initial_state.status);

        Ok(())
    }

    /// Process menu events. Call this from the event loop.
    pub fn process_events(&self) {
        while let Ok(event) = MenuEvent::receiver().try_recv() {
            let id = if Some(&event.id) == self.cancel_menu_id.as_ref() {
                MenuItemId::CancelReset
            } else if Some(&event.id) == self.exit_menu_id.as_ref() {
                MenuItemId::Exit
            } else {
                continue;
            };
            let _ = self.event_sender.send(TrayEvent::MenuItemClicked { id });
        }
    }

    /// Get the event receiver for tray events.
    pub fn events(&self) -> &Receiver<TrayEvent> {
        &self.event_receiver
    }

    /// Apply icon and tooltip. The icon is only rebuilt when its color
    /// changes.
    pub fn apply(&mut self, state: &TrayState) -> Result<(), TrayError> {
        if self.status != Some(state.status) {
            let icon = create_icon(state.status)?;
            let tray = self.tray_icon.as_mut().ok_or(TrayError::NotInitialized)?;
            tray.set_icon(Some(icon))
                .map_err(|e| TrayError::CreateFailed(e.to_string()))?;
            self.status = Some(state.status);
        }
        self.set_tooltip(&state.tooltip)
    }

    /// Update the tooltip text.
    pub fn set_tooltip(&mut self, text: &str) -> Result<(), TrayError> {
        let tray = self.tray_icon.as_mut().ok_or(TrayError::NotInitialized)?;
        tray.set_tooltip(Some(text))
            .map_err(|e| TrayError::CreateFailed(e.to_string()))?;
        Ok(())
    }

    /// Grey out "Cancel Reset" once a cancel is underway or the run is over.
    pub fn set_cancel_enabled(&self, enabled: bool) {
        if let Some(item) = &self.cancel_item {
            item.set_enabled(enabled);
        }
    }

    /// Destroy the tray icon.
    pub fn destroy(&mut self) {
        self.tray_icon = None;
    }
}

#[cfg(windows)]
impl Default for TrayManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(windows)]
fn create_icon(status: IconStatus) -> Result<tray_icon::Icon, TrayError> {
    crate::platform::icons::create_status_icon(status).map_err(TrayError::IconLoadFailed)
}
