//! Process inventory over the Toolhelp snapshot API.

use super::{ProcessError, ProcessInventory, ProcessRecord};
use crate::platform::{from_wide, OwnedHandle};
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W,
    TH32CS_SNAPPROCESS,
};
use windows::Win32::System::Threading::{OpenProcess, TerminateProcess, PROCESS_TERMINATE};

/// Exit code handed to terminated processes.
const KILLED_EXIT_CODE: u32 = 1;

#[derive(Debug, Default, Clone, Copy)]
pub struct ToolhelpInventory;

impl ProcessInventory for ToolhelpInventory {
    fn list_processes(&self) -> Result<Vec<ProcessRecord>, ProcessError> {
        let snapshot = unsafe {
            CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0).map_err(ProcessError::SnapshotFailed)?
        };
        let snapshot = OwnedHandle::new(snapshot);

        let mut entry = PROCESSENTRY32W {
            dwSize: std::mem::size_of::<PROCESSENTRY32W>() as u32,
            ..Default::default()
        };

        let mut processes = Vec::new();
        unsafe {
            if Process32FirstW(snapshot.raw(), &mut entry).is_err() {
                return Ok(processes);
            }
            loop {
                processes.push(ProcessRecord {
                    image_name: from_wide(&entry.szExeFile),
                    pid: entry.th32ProcessID,
                });
                if Process32NextW(snapshot.raw(), &mut entry).is_err() {
                    break;
                }
            }
        }

        Ok(processes)
    }

    fn terminate(&self, pid: u32) -> Result<(), ProcessError> {
        unsafe {
            let process = OpenProcess(PROCESS_TERMINATE, false, pid)
                .map_err(|source| ProcessError::OpenFailed { pid, source })?;
            let process = OwnedHandle::new(process);

            TerminateProcess(process.raw(), KILLED_EXIT_CODE)
                .map_err(|source| ProcessError::TerminateFailed { pid, source })
        }
    }
}
