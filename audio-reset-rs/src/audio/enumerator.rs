//! Endpoint enumeration using Windows MMDevice API.
//!
//! Provides COM initialization and the Core Audio implementation of
//! `AudioEndpoints`.

use super::device::{AudioDevice, AudioError, DeviceRole, Direction};
use super::endpoints::{AudioBackend, AudioEndpoints};
use super::policy::PolicyConfig;
use super::volume::EndpointVolume;
use crate::platform::to_wide;
use windows::core::{PCWSTR, PWSTR};
use windows::Win32::Devices::Properties::DEVPKEY_Device_FriendlyName;
use windows::Win32::Foundation::RPC_E_CHANGED_MODE;
use windows::Win32::Media::Audio::{
    eCapture, eCommunications, eConsole, eRender, EDataFlow, ERole, IMMDevice,
    IMMDeviceEnumerator, MMDeviceEnumerator, DEVICE_STATE_ACTIVE,
};
use windows::Win32::System::Com::{
    CoCreateInstance, CoInitializeEx, CoTaskMemFree, CoUninitialize, CLSCTX_ALL, COINIT,
    COINIT_APARTMENTTHREADED, COINIT_MULTITHREADED, STGM,
};
use windows::Win32::UI::Shell::PropertiesSystem::{IPropertyStore, PROPERTYKEY};

/// COM initialization guard that uninitializes COM on drop.
pub struct ComGuard {
    initialized: bool,
}

impl ComGuard {
    /// Initialize COM for the current thread (apartment-threaded, for UI threads).
    pub fn new() -> Result<Self, AudioError> {
        Self::init(COINIT_APARTMENTTHREADED)
    }

    /// Initialize COM for a worker thread.
    pub fn multithreaded() -> Result<Self, AudioError> {
        Self::init(COINIT_MULTITHREADED)
    }

    fn init(mode: COINIT) -> Result<Self, AudioError> {
        let hr = unsafe { CoInitializeEx(None, mode) };

        // Already initialized in the other model by someone else; use it as is.
        if hr == RPC_E_CHANGED_MODE {
            return Ok(Self { initialized: false });
        }

        hr.ok().map_err(AudioError::ComInitFailed)?;
        Ok(Self { initialized: true })
    }
}

impl Drop for ComGuard {
    fn drop(&mut self) {
        if self.initialized {
            unsafe {
                CoUninitialize();
            }
        }
    }
}

/// Core Audio backend. Each `connect` creates a new IMMDeviceEnumerator.
///
/// Note: COM must be initialized on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct CoreAudio;

impl AudioBackend for CoreAudio {
    fn connect(&self) -> Result<Box<dyn AudioEndpoints + '_>, AudioError> {
        Ok(Box::new(DeviceEnumerator::new()?))
    }
}

/// Device enumerator using Windows MMDevice API.
pub struct DeviceEnumerator {
    enumerator: IMMDeviceEnumerator,
}

impl DeviceEnumerator {
    /// Create a new DeviceEnumerator.
    ///
    /// Note: COM must be initialized before calling this function.
    pub fn new() -> Result<Self, AudioError> {
        unsafe {
            let enumerator: IMMDeviceEnumerator =
                CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
                    .map_err(AudioError::EnumerationFailed)?;

            Ok(Self { enumerator })
        }
    }

    /// Open an endpoint by its id.
    fn get_device(&self, device_id: &str) -> Result<IMMDevice, AudioError> {
        let device_id_wide = to_wide(device_id);
        unsafe {
            self.enumerator
                .GetDevice(PCWSTR::from_raw(device_id_wide.as_ptr()))
                .map_err(|_| AudioError::DeviceNotFound {
                    name: device_id.to_string(),
                })
        }
    }

    /// Convert an IMMDevice to an AudioDevice.
    fn to_audio_device(
        &self,
        device: &IMMDevice,
        direction: Direction,
    ) -> Result<AudioDevice, AudioError> {
        unsafe {
            let id = device.GetId().map_err(AudioError::EnumerationFailed)?;
            let id_string = take_co_string(id)?;

            let props: IPropertyStore = device
                .OpenPropertyStore(STGM(0))
                .map_err(AudioError::EnumerationFailed)?;

            let name = self
                .get_device_name(&props)
                .unwrap_or_else(|| "Unknown".to_string());

            let is_active = device
                .GetState()
                .map(|state| state == DEVICE_STATE_ACTIVE)
                .unwrap_or(false);

            Ok(AudioDevice {
                id: id_string,
                name,
                direction,
                is_active,
            })
        }
    }

    /// Get the friendly name of a device from its property store.
    fn get_device_name(&self, props: &IPropertyStore) -> Option<String> {
        unsafe {
            // Convert DEVPROPKEY to PROPERTYKEY
            let key = PROPERTYKEY {
                fmtid: DEVPKEY_Device_FriendlyName.fmtid,
                pid: DEVPKEY_Device_FriendlyName.pid,
            };

            let prop = props.GetValue(&key).ok()?;

            let s = prop.to_string();
            if s.is_empty() {
                None
            } else {
                Some(s)
            }
        }
    }
}

impl AudioEndpoints for DeviceEnumerator {
    fn list_endpoints(&self, direction: Direction) -> Result<Vec<AudioDevice>, AudioError> {
        unsafe {
            let collection = self
                .enumerator
                .EnumAudioEndpoints(data_flow(direction), DEVICE_STATE_ACTIVE)
                .map_err(AudioError::EnumerationFailed)?;

            let count = collection
                .GetCount()
                .map_err(AudioError::EnumerationFailed)?;

            let mut devices = Vec::with_capacity(count as usize);

            for i in 0..count {
                let device = collection.Item(i).map_err(AudioError::EnumerationFailed)?;

                // A device that vanishes mid-enumeration is simply not listed.
                if let Ok(endpoint) = self.to_audio_device(&device, direction) {
                    devices.push(endpoint);
                }
            }

            Ok(devices)
        }
    }

    fn default_endpoint(
        &self,
        direction: Direction,
        role: DeviceRole,
    ) -> Result<Option<AudioDevice>, AudioError> {
        let device = unsafe {
            match self
                .enumerator
                .GetDefaultAudioEndpoint(data_flow(direction), device_role(role))
            {
                Ok(d) => d,
                Err(_) => return Ok(None),
            }
        };

        self.to_audio_device(&device, direction).map(Some)
    }

    fn set_default_endpoint(
        &self,
        device: &AudioDevice,
        role: DeviceRole,
    ) -> Result<(), AudioError> {
        PolicyConfig::new()?.set_default_endpoint(&device.id, role)
    }

    fn volume(&self, device: &AudioDevice) -> Result<f32, AudioError> {
        let mm_device = self.get_device(&device.id)?;
        EndpointVolume::activate(&mm_device)?.level()
    }

    fn set_volume(&self, device: &AudioDevice, level: f32) -> Result<(), AudioError> {
        let mm_device = self.get_device(&device.id)?;
        EndpointVolume::activate(&mm_device)?.set_level(level)
    }

    fn set_mute(&self, device: &AudioDevice, muted: bool) -> Result<(), AudioError> {
        let mm_device = self.get_device(&device.id)?;
        EndpointVolume::activate(&mm_device)?.set_muted(muted)
    }
}

/// Copy a COM-allocated string and free the original.
unsafe fn take_co_string(value: PWSTR) -> Result<String, AudioError> {
    let result = value
        .to_string()
        .map_err(|e| AudioError::StringConversion(e.to_string()));
    CoTaskMemFree(Some(value.0 as *const _));
    result
}

fn data_flow(direction: Direction) -> EDataFlow {
    match direction {
        Direction::Playback => eRender,
        Direction::Recording => eCapture,
    }
}

fn device_role(role: DeviceRole) -> ERole {
    match role {
        DeviceRole::Console => eConsole,
        DeviceRole::Communications => eCommunications,
    }
}
