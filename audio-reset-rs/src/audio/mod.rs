//! Audio module for Windows Core Audio API interactions.
//!
//! This module provides endpoint enumeration, default-device assignment,
//! and volume and mute control. The Windows implementations sit behind the
//! `AudioBackend`/`AudioEndpoints` traits.

pub mod configurator;
pub mod device;
pub mod endpoints;

#[cfg(windows)]
pub mod enumerator;
#[cfg(windows)]
pub mod policy;
#[cfg(windows)]
pub mod volume;

pub use configurator::DeviceConfigurator;
pub use device::{
    AudioDevice, AudioError, DeviceAssignments, DeviceRole, DeviceRoleAssignment, Direction,
};
pub use endpoints::{AudioBackend, AudioEndpoints};

#[cfg(windows)]
pub use enumerator::{ComGuard, CoreAudio, DeviceEnumerator};
