//! Pipeline state machine types.

use std::fmt;

/// Where a reset run is. States only move forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PipelineState {
    /// Nothing has happened yet.
    #[default]
    Idle,

    /// Vendor app executables have been looked up.
    PathsDiscovered,

    /// Vendor processes have been terminated.
    ProcessesKilled,

    /// Audio services have been cycled.
    ServicesRestarted,

    /// Vendor apps have been relaunched.
    VendorAppsLaunched,

    /// Enough vendor endpoints are active.
    DevicesReady,

    /// The device wait ran out; the pipeline carries on.
    DevicesTimedOut,

    /// The four default-device assignments have been attempted.
    DefaultsApplied,

    /// The saved playback volume has been put back.
    VolumeRestored,

    /// Finished normally.
    Complete,

    /// Finished after a cancel.
    Aborted,
}

impl PipelineState {
    /// Returns the next state on the normal path, if any.
    ///
    /// `DevicesTimedOut` joins the normal path again at `DefaultsApplied`.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Idle => Some(Self::PathsDiscovered),
            Self::PathsDiscovered => Some(Self::ProcessesKilled),
            Self::ProcessesKilled => Some(Self::ServicesRestarted),
            Self::ServicesRestarted => Some(Self::VendorAppsLaunched),
            Self::VendorAppsLaunched => Some(Self::DevicesReady),
            Self::DevicesReady | Self::DevicesTimedOut => Some(Self::DefaultsApplied),
            Self::DefaultsApplied => Some(Self::VolumeRestored),
            Self::VolumeRestored => Some(Self::Complete),
            Self::Complete | Self::Aborted => None,
        }
    }

    /// Returns true once the run is over.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Aborted)
    }

    /// Position along the pipeline, for ordering checks.
    pub fn ordinal(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::PathsDiscovered => 1,
            Self::ProcessesKilled => 2,
            Self::ServicesRestarted => 3,
            Self::VendorAppsLaunched => 4,
            Self::DevicesReady | Self::DevicesTimedOut => 5,
            Self::DefaultsApplied => 6,
            Self::VolumeRestored => 7,
            Self::Complete | Self::Aborted => 8,
        }
    }

    /// Returns a simple string representation of the state.
    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::PathsDiscovered => "PathsDiscovered",
            Self::ProcessesKilled => "ProcessesKilled",
            Self::ServicesRestarted => "ServicesRestarted",
            Self::VendorAppsLaunched => "VendorAppsLaunched",
            Self::DevicesReady => "DevicesReady",
            Self::DevicesTimedOut => "DevicesTimedOut",
            Self::DefaultsApplied => "DefaultsApplied",
            Self::VolumeRestored => "VolumeRestored",
            Self::Complete => "Complete",
            Self::Aborted => "Aborted",
        }
    }

    /// Status text while the pipeline sits in this state, i.e. the work
    /// that follows it. Shown in the tray tooltip.
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "Discovering apps...",
            Self::PathsDiscovered => "Stopping processes...",
            Self::ProcessesKilled => "Restarting audio...",
            Self::ServicesRestarted => "Starting vendor apps...",
            Self::VendorAppsLaunched => "Waiting for devices...",
            Self::DevicesReady | Self::DevicesTimedOut => "Setting audio defaults...",
            Self::DefaultsApplied => "Restoring volume...",
            Self::VolumeRestored => "Finishing...",
            Self::Complete => "Complete!",
            Self::Aborted => "Cancelled",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One unit of work recorded in the run report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    DiscoverPaths,
    LowerVolume,
    KillProcesses,
    RestartServices,
    LaunchApps,
    WaitForDevices,
    ApplyDefaults,
    RestoreVolume,
}

impl Step {
    /// Steps that change system state, in run order. Skipped after a cancel.
    pub const DISRUPTIVE: [Step; 5] = [
        Step::KillProcesses,
        Step::RestartServices,
        Step::LaunchApps,
        Step::WaitForDevices,
        Step::ApplyDefaults,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::DiscoverPaths => "Discover paths",
            Self::LowerVolume => "Lower volume",
            Self::KillProcesses => "Kill processes",
            Self::RestartServices => "Restart services",
            Self::LaunchApps => "Launch apps",
            Self::WaitForDevices => "Wait for devices",
            Self::ApplyDefaults => "Apply defaults",
            Self::RestoreVolume => "Restore volume",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
