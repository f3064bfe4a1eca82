//! Service control through the Windows service control manager.

use super::{ServiceControl, ServiceError, ServiceState, ServiceStatus};
use crate::platform::to_wide;
use windows::core::PCWSTR;
use windows::Win32::Foundation::{
    ERROR_DEPENDENT_SERVICES_RUNNING, ERROR_SERVICE_ALREADY_RUNNING,
    ERROR_SERVICE_CANNOT_ACCEPT_CTRL, ERROR_SERVICE_DOES_NOT_EXIST, ERROR_SERVICE_NOT_ACTIVE,
};
use windows::Win32::System::Services::{
    CloseServiceHandle, ControlService, OpenSCManagerW, OpenServiceW, QueryServiceStatus,
    StartServiceW, SC_HANDLE, SC_MANAGER_CONNECT, SERVICE_CONTROL_STOP, SERVICE_QUERY_STATUS,
    SERVICE_RUNNING, SERVICE_START, SERVICE_START_PENDING, SERVICE_STATUS,
    SERVICE_STATUS_CURRENT_STATE, SERVICE_STOP, SERVICE_STOPPED, SERVICE_STOP_PENDING,
};

/// Service handle closed on drop.
struct ScHandle(SC_HANDLE);

impl Drop for ScHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseServiceHandle(self.0);
        }
    }
}

/// `ServiceControl` backed by the local service control manager.
///
/// Each call opens the manager with connect rights only and the service
/// with the single right the operation needs.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScmServiceControl;

impl ScmServiceControl {
    fn open(&self, name: &str, access: u32) -> Result<(ScHandle, ScHandle), ServiceError> {
        let manager = unsafe {
            OpenSCManagerW(PCWSTR::null(), PCWSTR::null(), SC_MANAGER_CONNECT)
                .map_err(ServiceError::ManagerUnavailable)?
        };
        let manager = ScHandle(manager);

        let name_wide = to_wide(name);
        let service = unsafe {
            OpenServiceW(manager.0, PCWSTR(name_wide.as_ptr()), access).map_err(|source| {
                if source.code() == ERROR_SERVICE_DOES_NOT_EXIST.to_hresult() {
                    ServiceError::NotFound(name.to_string())
                } else {
                    ServiceError::OpenFailed {
                        name: name.to_string(),
                        source,
                    }
                }
            })?
        };

        Ok((ScHandle(service), manager))
    }
}

impl ServiceControl for ScmServiceControl {
    fn stop(&self, name: &str) -> Result<(), ServiceError> {
        let (service, _manager) = self.open(name, SERVICE_STOP | SERVICE_QUERY_STATUS)?;
        let mut status = SERVICE_STATUS::default();

        match unsafe { ControlService(service.0, SERVICE_CONTROL_STOP, &mut status) } {
            Ok(()) => Ok(()),
            Err(e) if e.code() == ERROR_SERVICE_NOT_ACTIVE.to_hresult() => Ok(()),
            Err(e) if e.code() == ERROR_DEPENDENT_SERVICES_RUNNING.to_hresult() => {
                Err(ServiceError::DependentsRunning(name.to_string()))
            }
            // Already stopping
            Err(e)
                if e.code() == ERROR_SERVICE_CANNOT_ACCEPT_CTRL.to_hresult()
                    && matches!(
                        current_status(&service),
                        Some(ServiceStatus::StopPending | ServiceStatus::Stopped)
                    ) =>
            {
                Ok(())
            }
            Err(source) => Err(ServiceError::ControlFailed {
                name: name.to_string(),
                action: "stop",
                source,
            }),
        }
    }

    fn start(&self, name: &str) -> Result<(), ServiceError> {
        let (service, _manager) = self.open(name, SERVICE_START)?;

        match unsafe { StartServiceW(service.0, None) } {
            Ok(()) => Ok(()),
            Err(e) if e.code() == ERROR_SERVICE_ALREADY_RUNNING.to_hresult() => Ok(()),
            Err(source) => Err(ServiceError::ControlFailed {
                name: name.to_string(),
                action: "start",
                source,
            }),
        }
    }

    fn query(&self, name: &str) -> Result<ServiceState, ServiceError> {
        let (service, _manager) = self.open(name, SERVICE_QUERY_STATUS)?;
        let mut status = SERVICE_STATUS::default();

        unsafe { QueryServiceStatus(service.0, &mut status) }.map_err(|source| {
            ServiceError::ControlFailed {
                name: name.to_string(),
                action: "query",
                source,
            }
        })?;

        Ok(ServiceState {
            name: name.to_string(),
            status: map_status(status.dwCurrentState),
        })
    }
}

fn current_status(service: &ScHandle) -> Option<ServiceStatus> {
    let mut status = SERVICE_STATUS::default();
    unsafe { QueryServiceStatus(service.0, &mut status) }.ok()?;
    Some(map_status(status.dwCurrentState))
}

fn map_status(state: SERVICE_STATUS_CURRENT_STATE) -> ServiceStatus {
    match state {
        SERVICE_STOPPED => ServiceStatus::Stopped,
        SERVICE_START_PENDING => ServiceStatus::StartPending,
        SERVICE_STOP_PENDING => ServiceStatus::StopPending,
        SERVICE_RUNNING => ServiceStatus::Running,
        _ => ServiceStatus::Other,
    }
}
