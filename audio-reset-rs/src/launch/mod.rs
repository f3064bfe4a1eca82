//! Vendor application discovery and relaunch.
//!
//! Finds each vendor app's executable, starts it minimized, waits for its
//! process to appear, and minimizes windows of apps that ignore the
//! minimized start flag.

#[cfg(windows)]
pub mod win32;

#[cfg(windows)]
pub use win32::Win32Launcher;

use crate::audio::device::names_equal;
use crate::cancel::CancelToken;
use crate::poll::{poll_until, PollOutcome, PollSpec};
use crate::process::ProcessInventory;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// A vendor application the reset restarts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorApp {
    /// Name used in log lines, e.g. "WaveLink"
    pub display_name: String,

    /// Process image name used to detect it running, e.g. "WaveLink.exe"
    pub image_name: String,

    /// Fragment of the uninstall entry's DisplayName, e.g. "Wave Link"
    pub install_key: String,

    /// Executable file name inside the install folder
    pub exe_file: String,

    /// Folder to try when the uninstall entry is missing
    pub fallback_dir: Option<PathBuf>,

    /// Launch only when the executable exists; a missing file is not logged
    pub launch_only_if_present: bool,

    /// Top-level window title to wait for before minimizing its windows
    pub window_title: Option<String>,
}

impl VendorApp {
    pub fn new(display_name: &str, image_name: &str, install_key: &str) -> Self {
        Self {
            display_name: display_name.to_string(),
            image_name: image_name.to_string(),
            install_key: install_key.to_string(),
            exe_file: image_name.to_string(),
            fallback_dir: None,
            launch_only_if_present: false,
            window_title: None,
        }
    }

    pub fn with_fallback_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.fallback_dir = Some(dir.into());
        self
    }

    pub fn only_if_present(mut self) -> Self {
        self.launch_only_if_present = true;
        self
    }

    pub fn with_window_title(mut self, title: &str) -> Self {
        self.window_title = Some(title.to_string());
        self
    }

    /// Stock Elgato apps in launch order.
    pub fn elgato_defaults() -> Vec<VendorApp> {
        let wave_link_dir = r"C:\Program Files\Elgato\WaveLink";
        vec![
            VendorApp::new("WaveLinkSE", "WaveLinkSE.exe", "Wave Link")
                .with_fallback_dir(wave_link_dir)
                .only_if_present(),
            VendorApp::new("WaveLink", "WaveLink.exe", "Wave Link").with_fallback_dir(wave_link_dir),
            VendorApp::new("StreamDeck", "StreamDeck.exe", "Stream Deck")
                .with_fallback_dir(r"C:\Program Files\Elgato\StreamDeck")
                .with_window_title("Stream Deck"),
        ]
    }
}

/// A vendor app paired with the executable path discovery found for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredApp {
    pub app: VendorApp,
    pub path: Option<PathBuf>,
}

/// Looks up where an application is installed.
pub trait InstallLocator {
    /// Install folder of the first installed product whose display name
    /// contains `display_name_fragment`.
    fn install_location(&self, display_name_fragment: &str) -> Option<PathBuf>;
}

/// Launcher error types.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[cfg(windows)]
    #[error("Failed to start {path}: {source}")]
    SpawnFailed {
        path: String,
        #[source]
        source: windows::core::Error,
    },

    #[error("Executable not found: {0}")]
    NotFound(PathBuf),

    #[error("Launcher unavailable: {0}")]
    Unavailable(String),
}

/// Start processes and manipulate their windows.
pub trait AppLauncher {
    /// Whether `path` names an existing file.
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    /// Start `path` with a minimized main window. Returns the new pid.
    fn spawn_minimized(&self, path: &Path) -> Result<u32, LaunchError>;

    /// Minimize every visible top-level window owned by one of `pids`.
    /// Returns the number of windows minimized.
    fn minimize_windows_of(&self, pids: &[u32]) -> Result<usize, LaunchError>;

    /// Whether a top-level window with exactly this title exists.
    fn has_window_titled(&self, title: &str) -> bool;
}

/// Result of one launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// No executable at the discovered path; nothing was started
    NotFound,

    /// Started and its process was seen
    Detected,

    /// Started but the process never showed up within the poll bound
    NotDetected,

    /// The OS refused to start it
    Failed(String),

    Cancelled,
}

impl LaunchOutcome {
    /// Whether a process was started.
    pub fn started(&self) -> bool {
        matches!(self, LaunchOutcome::Detected | LaunchOutcome::NotDetected)
    }
}

/// Resolve an app's executable: the uninstall entry first, then the
/// fallback folder if the file exists there.
pub fn discover_app_path(
    app: &VendorApp,
    locator: &dyn InstallLocator,
    launcher: &dyn AppLauncher,
) -> Option<PathBuf> {
    if let Some(dir) = locator.install_location(&app.install_key) {
        return Some(dir.join(&app.exe_file));
    }

    let fallback = app.fallback_dir.as_ref()?.join(&app.exe_file);
    launcher.exists(&fallback).then_some(fallback)
}

/// Discover every app and log the result.
pub fn discover_paths(
    apps: &[VendorApp],
    locator: &dyn InstallLocator,
    launcher: &dyn AppLauncher,
) -> Vec<DiscoveredApp> {
    info!("Discovered paths:");
    apps.iter()
        .map(|app| {
            let path = discover_app_path(app, locator, launcher);
            match &path {
                Some(p) => info!("    {}: {}", app.display_name, p.display()),
                None => info!("    {}: NOT FOUND", app.display_name),
            }
            DiscoveredApp {
                app: app.clone(),
                path,
            }
        })
        .collect()
}

/// Starts vendor apps and waits for them.
pub struct LaunchSupervisor<'a> {
    launcher: &'a dyn AppLauncher,
    processes: &'a dyn ProcessInventory,
    cancel: &'a CancelToken,
}

impl<'a> LaunchSupervisor<'a> {
    pub fn new(
        launcher: &'a dyn AppLauncher,
        processes: &'a dyn ProcessInventory,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            launcher,
            processes,
            cancel,
        }
    }

    /// Start `path` minimized and poll for `image_name` to appear.
    ///
    /// Every outcome is non-fatal; the caller decides how to record it.
    pub fn launch(
        &self,
        path: Option<&Path>,
        image_name: &str,
        display_name: &str,
        poll: PollSpec,
    ) -> LaunchOutcome {
        let path = match path {
            Some(p) if self.launcher.exists(p) => p,
            _ => {
                warn!("{} not found.", display_name);
                return LaunchOutcome::NotFound;
            }
        };

        info!("Starting {} (minimized)...", display_name);

        let pid = match self.launcher.spawn_minimized(path) {
            Ok(pid) => pid,
            Err(e) => {
                warn!("Failed to start {}: {}", display_name, e);
                return LaunchOutcome::Failed(e.to_string());
            }
        };
        debug!(pid, image = image_name, "Spawned");

        info!("Waiting for {}...", display_name);
        let outcome = poll_until(poll, self.cancel, || {
            self.processes.is_running(image_name).unwrap_or(false)
        });

        match outcome {
            PollOutcome::Reached { .. } => {
                info!(success = true, "{} detected.", display_name);
                LaunchOutcome::Detected
            }
            PollOutcome::TimedOut { .. } => {
                warn!("{} may not have started properly.", display_name);
                LaunchOutcome::NotDetected
            }
            PollOutcome::Cancelled => LaunchOutcome::Cancelled,
        }
    }

    /// Wait for a top-level window titled `title`.
    pub fn wait_for_window(&self, title: &str, poll: PollSpec) -> PollOutcome {
        poll_until(poll, self.cancel, || self.launcher.has_window_titled(title))
    }

    /// Minimize every visible top-level window of every process named
    /// `image_name`.
    pub fn minimize_all_windows_of(&self, image_name: &str) -> Result<usize, LaunchError> {
        let pids: Vec<u32> = self
            .processes
            .list_processes()
            .map_err(|e| LaunchError::Unavailable(e.to_string()))?
            .into_iter()
            .filter(|p| names_equal(&p.image_name, image_name))
            .map(|p| p.pid)
            .collect();

        if pids.is_empty() {
            debug!(image = image_name, "No processes to minimize");
            return Ok(0);
        }

        self.launcher.minimize_windows_of(&pids)
    }
}
