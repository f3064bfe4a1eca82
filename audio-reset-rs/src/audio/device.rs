//! Audio endpoint data models.
//!
//! Defines the core data structures for representing audio endpoints,
//! their direction and role, the desired default-device assignments, and
//! the errors the audio layer reports.

use std::fmt;
use thiserror::Error;

/// Endpoint direction (maps to Windows EDataFlow).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Render endpoints: speakers, headsets, virtual outputs
    Playback,

    /// Capture endpoints: microphones, virtual inputs
    Recording,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Playback, Direction::Recording];

    /// Lowercase label used in logs and JSON.
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Playback => "playback",
            Direction::Recording => "recording",
        }
    }

    /// Parse a direction label ("playback"/"render", "recording"/"capture").
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "playback" | "render" => Some(Direction::Playback),
            "recording" | "record" | "capture" => Some(Direction::Recording),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default-device role (maps to Windows ERole).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DeviceRole {
    /// Used by games, system sounds, most general applications
    Console = 0,

    /// Used by Teams, Zoom, Discord, and other VoIP applications
    Communications = 2,
}

impl DeviceRole {
    pub const ALL: [DeviceRole; 2] = [DeviceRole::Console, DeviceRole::Communications];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceRole::Console => "default",
            DeviceRole::Communications => "communications",
        }
    }
}

impl fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audio endpoint as seen at enumeration time.
///
/// Never cache these across pipeline steps: endpoint ids are reissued when
/// the audio services restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDevice {
    /// Opaque Windows endpoint id (from IMMDevice::GetId)
    pub id: String,

    /// Human-readable device name (from device properties)
    pub name: String,

    /// Render or capture
    pub direction: Direction,

    /// Whether the endpoint is in the DEVICE_STATE_ACTIVE state
    pub is_active: bool,
}

impl AudioDevice {
    /// Create an active AudioDevice.
    pub fn new(id: impl Into<String>, name: impl Into<String>, direction: Direction) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            direction,
            is_active: true,
        }
    }

    /// Case-insensitive exact match against the friendly name.
    pub fn matches_name(&self, name: &str) -> bool {
        names_equal(&self.name, name)
    }

    /// Case-insensitive substring match against the friendly name.
    pub fn name_contains(&self, fragment: &str) -> bool {
        contains_ignore_case(&self.name, fragment)
    }
}

/// Case-insensitive comparison of two friendly names.
pub fn names_equal(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b) || a.to_lowercase() == b.to_lowercase()
}

/// Case-insensitive substring test.
pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// One desired (direction, role) -> device name mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRoleAssignment {
    pub direction: Direction,
    pub role: DeviceRole,
    pub target: String,
}

impl DeviceRoleAssignment {
    pub fn new(direction: Direction, role: DeviceRole, target: impl Into<String>) -> Self {
        Self {
            direction,
            role,
            target: target.into(),
        }
    }

    /// Label used in log lines, e.g. "Playback default".
    pub fn label(&self) -> &'static str {
        match (self.direction, self.role) {
            (Direction::Playback, DeviceRole::Console) => "Playback default",
            (Direction::Playback, DeviceRole::Communications) => "Playback comms",
            (Direction::Recording, DeviceRole::Console) => "Recording default",
            (Direction::Recording, DeviceRole::Communications) => "Recording comms",
        }
    }
}

/// The four default-device slots the reset restores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAssignments {
    pub playback_default: String,
    pub playback_comm: String,
    pub record_default: String,
    pub record_comm: String,
}

impl DeviceAssignments {
    /// All four assignments in the order they are applied.
    pub fn to_assignments(&self) -> [DeviceRoleAssignment; 4] {
        [
            DeviceRoleAssignment::new(
                Direction::Playback,
                DeviceRole::Console,
                &self.playback_default,
            ),
            DeviceRoleAssignment::new(
                Direction::Playback,
                DeviceRole::Communications,
                &self.playback_comm,
            ),
            DeviceRoleAssignment::new(
                Direction::Recording,
                DeviceRole::Console,
                &self.record_default,
            ),
            DeviceRoleAssignment::new(
                Direction::Recording,
                DeviceRole::Communications,
                &self.record_comm,
            ),
        ]
    }

    /// Target name for a slot.
    pub fn target(&self, direction: Direction, role: DeviceRole) -> &str {
        match (direction, role) {
            (Direction::Playback, DeviceRole::Console) => &self.playback_default,
            (Direction::Playback, DeviceRole::Communications) => &self.playback_comm,
            (Direction::Recording, DeviceRole::Console) => &self.record_default,
            (Direction::Recording, DeviceRole::Communications) => &self.record_comm,
        }
    }

    /// Mutable target name for a slot.
    pub fn target_mut(&mut self, direction: Direction, role: DeviceRole) -> &mut String {
        match (direction, role) {
            (Direction::Playback, DeviceRole::Console) => &mut self.playback_default,
            (Direction::Playback, DeviceRole::Communications) => &mut self.playback_comm,
            (Direction::Recording, DeviceRole::Console) => &mut self.record_default,
            (Direction::Recording, DeviceRole::Communications) => &mut self.record_comm,
        }
    }
}

impl Default for DeviceAssignments {
    fn default() -> Self {
        Self {
            playback_default: "System (Elgato Virtual Audio)".to_string(),
            playback_comm: "Voice Chat (Elgato Virtual Audio)".to_string(),
            record_default: "Microphone (Razer Kraken V4 2.4 - Chat)".to_string(),
            record_comm: "Microphone (Razer Kraken V4 2.4 - Chat)".to_string(),
        }
    }
}

/// Audio service error types.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Device not found: {name}")]
    DeviceNotFound { name: String },

    #[error("No default {direction} device available")]
    NoDefaultDevice { direction: Direction },

    #[error("Volume level out of range: {0}")]
    InvalidVolume(f32),

    #[cfg(windows)]
    #[error("COM initialization failed: {0}")]
    ComInitFailed(#[source] windows::core::Error),

    #[cfg(windows)]
    #[error("Failed to enumerate devices: {0}")]
    EnumerationFailed(#[source] windows::core::Error),

    #[cfg(windows)]
    #[error("Failed to set default device: {0}")]
    SetDefaultFailed(#[source] windows::core::Error),

    #[cfg(windows)]
    #[error("Volume control not available for device: {0}")]
    VolumeNotAvailable(#[source] windows::core::Error),

    #[cfg(windows)]
    #[error("Windows API error: {0}")]
    WindowsError(#[source] windows::core::Error),

    #[error("String conversion error: {0}")]
    StringConversion(String),

    #[error("Audio subsystem unavailable: {0}")]
    Unavailable(String),
}

impl AudioError {
    /// True for the not-found family, which the pipeline treats as a skip.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AudioError::DeviceNotFound { .. } | AudioError::NoDefaultDevice { .. }
        )
    }
}
