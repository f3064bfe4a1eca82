//! Process inventory and vendor process termination.
//!
//! Snapshots the process table, classifies image names against the
//! protected list and the vendor fragments, and terminates matches.

#[cfg(windows)]
pub mod toolhelp;

#[cfg(windows)]
pub use toolhelp::ToolhelpInventory;

use crate::audio::device::{contains_ignore_case, names_equal};
use crate::cancel::CancelToken;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Critical OS, shell and developer processes that are never terminated,
/// whatever their name otherwise matches.
pub const DEFAULT_PROTECTED: &[&str] = &[
    "svchost.exe",
    "audiodg.exe",
    "System",
    "Idle",
    "dwm.exe",
    "explorer.exe",
    "csrss.exe",
    "wininit.exe",
    "services.exe",
    "lsass.exe",
    "smss.exe",
    "winlogon.exe",
    "fontdrvhost.exe",
    "sihost.exe",
    "taskhostw.exe",
    "RuntimeBroker.exe",
    "ShellExperienceHost.exe",
    "SearchHost.exe",
    "ctfmon.exe",
    "conhost.exe",
    "dllhost.exe",
    "powershell.exe",
    "cmd.exe",
    "Code.exe",
    "devenv.exe",
    "audio-reset.exe",
];

/// Image-name fragments of the vendor's audio-control processes.
pub const DEFAULT_VENDOR_FRAGMENTS: &[&str] = &["WaveLink", "StreamDeck", "Elgato"];

/// One running process at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRecord {
    /// Executable file name, e.g. "WaveLink.exe"
    pub image_name: String,

    pub pid: u32,
}

impl ProcessRecord {
    pub fn new(image_name: impl Into<String>, pid: u32) -> Self {
        Self {
            image_name: image_name.into(),
            pid,
        }
    }
}

/// Process inventory error types.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[cfg(windows)]
    #[error("Failed to snapshot processes: {0}")]
    SnapshotFailed(#[source] windows::core::Error),

    #[cfg(windows)]
    #[error("Failed to open process {pid}: {source}")]
    OpenFailed {
        pid: u32,
        #[source]
        source: windows::core::Error,
    },

    #[cfg(windows)]
    #[error("Failed to terminate process {pid}: {source}")]
    TerminateFailed {
        pid: u32,
        #[source]
        source: windows::core::Error,
    },

    #[error("Process {pid} not found")]
    NotFound { pid: u32 },

    #[error("Process table unavailable: {0}")]
    Unavailable(String),
}

/// Read and signal the OS process table.
pub trait ProcessInventory {
    /// Snapshot of the processes running right now.
    fn list_processes(&self) -> Result<Vec<ProcessRecord>, ProcessError>;

    /// Forcefully terminate one process.
    fn terminate(&self, pid: u32) -> Result<(), ProcessError>;

    /// Whether any process with this image name is running (case-insensitive).
    fn is_running(&self, image_name: &str) -> Result<bool, ProcessError> {
        Ok(self
            .list_processes()?
            .iter()
            .any(|p| names_equal(&p.image_name, image_name)))
    }
}

/// Decides which processes a kill pass may touch.
#[derive(Debug, Clone)]
pub struct ProcessFilter {
    protected: Vec<String>,
    fragments: Vec<String>,
    own_pid: Option<u32>,
}

impl ProcessFilter {
    pub fn new<P, F>(protected: P, fragments: F) -> Self
    where
        P: IntoIterator,
        P::Item: Into<String>,
        F: IntoIterator,
        F::Item: Into<String>,
    {
        Self {
            protected: protected.into_iter().map(Into::into).collect(),
            fragments: fragments.into_iter().map(Into::into).collect(),
            own_pid: None,
        }
    }

    /// Never terminate the process with this id (normally our own).
    pub fn with_own_pid(mut self, pid: u32) -> Self {
        self.own_pid = Some(pid);
        self
    }

    /// Exact, case-insensitive match against the protected list.
    pub fn is_protected(&self, image_name: &str) -> bool {
        self.protected.iter().any(|p| names_equal(p, image_name))
    }

    /// Case-insensitive substring match against the vendor fragments.
    pub fn is_target_vendor_process(&self, image_name: &str) -> bool {
        self.fragments
            .iter()
            .any(|fragment| contains_ignore_case(image_name, fragment))
    }

    pub fn should_terminate(&self, process: &ProcessRecord) -> bool {
        Some(process.pid) != self.own_pid
            && self.is_target_vendor_process(&process.image_name)
            && !self.is_protected(&process.image_name)
    }
}

impl Default for ProcessFilter {
    fn default() -> Self {
        Self::new(
            DEFAULT_PROTECTED.iter().copied(),
            DEFAULT_VENDOR_FRAGMENTS.iter().copied(),
        )
    }
}

/// What one kill pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KillSummary {
    pub terminated: Vec<ProcessRecord>,
    pub failed: Vec<ProcessRecord>,
}

/// Terminate every vendor process not on the protected list, then wait
/// `settle` for handles and audio engine state to release.
///
/// The table is enumerated once. Zero matches is a normal outcome. Only a
/// failure to take the snapshot is an error; individual termination
/// failures are logged and collected.
pub fn kill_target_processes(
    inventory: &dyn ProcessInventory,
    filter: &ProcessFilter,
    settle: Duration,
    cancel: &CancelToken,
) -> Result<KillSummary, ProcessError> {
    info!("Discovering and killing vendor processes...");

    let mut summary = KillSummary::default();

    for process in inventory.list_processes()? {
        if !filter.should_terminate(&process) {
            if filter.is_target_vendor_process(&process.image_name) {
                debug!(image = %process.image_name, pid = process.pid, "Skipping protected process");
            }
            continue;
        }

        match inventory.terminate(process.pid) {
            Ok(()) => {
                info!(success = true, "    Killed: {} (PID {})", process.image_name, process.pid);
                summary.terminated.push(process);
            }
            Err(e) => {
                warn!("    Failed to kill {} (PID {}): {}", process.image_name, process.pid, e);
                summary.failed.push(process);
            }
        }
    }

    if summary.terminated.is_empty() && summary.failed.is_empty() {
        info!("    No vendor processes found to kill.");
    }

    cancel.sleep(settle);
    Ok(summary)
}
