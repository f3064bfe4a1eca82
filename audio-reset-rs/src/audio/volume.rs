//! Endpoint volume through IAudioEndpointVolume.
//!
//! The interface is activated per call and released on drop; nothing is held
//! across pipeline steps because the audio service restart invalidates it.

use super::device::AudioError;
use windows::Win32::Media::Audio::{Endpoints::IAudioEndpointVolume, IMMDevice};
use windows::Win32::System::Com::CLSCTX_ALL;

/// Master volume and mute of one endpoint.
pub struct EndpointVolume(IAudioEndpointVolume);

impl EndpointVolume {
    pub fn activate(device: &IMMDevice) -> Result<Self, AudioError> {
        let volume: IAudioEndpointVolume = unsafe {
            device
                .Activate(CLSCTX_ALL, None)
                .map_err(AudioError::VolumeNotAvailable)?
        };
        Ok(Self(volume))
    }

    /// Scalar master level, 0.0 to 1.0.
    pub fn level(&self) -> Result<f32, AudioError> {
        unsafe { self.0.GetMasterVolumeLevelScalar() }.map_err(AudioError::WindowsError)
    }

    /// Levels outside 0.0..=1.0 are rejected by the configurator before
    /// they get here.
    pub fn set_level(&self, level: f32) -> Result<(), AudioError> {
        unsafe { self.0.SetMasterVolumeLevelScalar(level, std::ptr::null()) }
            .map_err(AudioError::WindowsError)
    }

    pub fn set_muted(&self, muted: bool) -> Result<(), AudioError> {
        unsafe { self.0.SetMute(muted, std::ptr::null()) }.map_err(AudioError::WindowsError)
    }
}
