//! Default endpoint assignment through IPolicyConfig.

use super::device::{AudioError, DeviceRole};
use crate::platform::to_wide;
use windows::core::{interface, IUnknown, IUnknown_Vtbl, GUID, HRESULT, PCWSTR};
use windows::Win32::System::Com::{CoCreateInstance, CLSCTX_ALL};

/// IPolicyConfig COM interface (undocumented but stable)
/// Used to set the default audio device
#[interface("F8679F50-850A-41CF-9C72-430F290290C8")]
unsafe trait IPolicyConfig: IUnknown {
    // Reserved methods to maintain vtable order
    fn reserved1(&self) -> HRESULT;
    fn reserved2(&self) -> HRESULT;
    fn reserved3(&self) -> HRESULT;
    fn reserved4(&self) -> HRESULT;
    fn reserved5(&self) -> HRESULT;
    fn reserved6(&self) -> HRESULT;
    fn reserved7(&self) -> HRESULT;
    fn reserved8(&self) -> HRESULT;
    fn reserved9(&self) -> HRESULT;
    fn reserved10(&self) -> HRESULT;

    fn SetDefaultEndpoint(&self, device_id: PCWSTR, role: u32) -> HRESULT;
}

// PolicyConfigClient CLSID
const CLSID_POLICY_CONFIG_CLIENT: GUID = GUID::from_u128(0x870af99c_171d_4f9e_af0d_e63df40c2bc9);

/// Handle to the policy config client.
pub struct PolicyConfig {
    inner: IPolicyConfig,
}

impl PolicyConfig {
    /// Create the policy config client. COM must be initialized.
    pub fn new() -> Result<Self, AudioError> {
        let inner: IPolicyConfig = unsafe {
            CoCreateInstance(&CLSID_POLICY_CONFIG_CLIENT, None, CLSCTX_ALL)
                .map_err(AudioError::SetDefaultFailed)?
        };
        Ok(Self { inner })
    }

    /// Sets the specified endpoint as the default for the given role.
    pub fn set_default_endpoint(&self, device_id: &str, role: DeviceRole) -> Result<(), AudioError> {
        let device_id_wide = to_wide(device_id);
        unsafe {
            self.inner
                .SetDefaultEndpoint(PCWSTR(device_id_wide.as_ptr()), role as u32)
                .ok()
                .map_err(AudioError::SetDefaultFailed)
        }
    }
}
