//! Target process checks run before any audio resource is acquired.
//!
//! Opening the process is tried at progressively broader access levels.
//! Protected and elevated processes refuse all of them; for those a
//! Toolhelp snapshot decides whether the pid exists at all, since process
//! loopback itself does not need a process handle.

use std::mem;

use windows::Win32::Foundation::{ERROR_INVALID_PARAMETER, E_ACCESSDENIED, HANDLE};
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W, TH32CS_SNAPPROCESS,
};
use windows::Win32::System::Threading::{
    GetExitCodeProcess, OpenProcess, PROCESS_ACCESS_RIGHTS, PROCESS_QUERY_INFORMATION,
    PROCESS_QUERY_LIMITED_INFORMATION, PROCESS_VM_READ,
};

use process_tap_core::CaptureError;

use crate::handles::{hresult_message, own_handle};

const STILL_ACTIVE: u32 = 259;

const ACCESS_LEVELS: [PROCESS_ACCESS_RIGHTS; 3] = [
    PROCESS_QUERY_LIMITED_INFORMATION,
    PROCESS_QUERY_INFORMATION,
    PROCESS_ACCESS_RIGHTS(PROCESS_QUERY_INFORMATION.0 | PROCESS_VM_READ.0),
];

/// How the target was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessAccess {
    /// A handle could be opened and the process has not exited.
    Opened,
    /// Every access level was denied, but the pid is in the process list.
    ListedOnly,
}

/// Verify that `pid` names a running process.
pub fn probe_process(pid: u32) -> Result<ProcessAccess, CaptureError> {
    if pid == 0 {
        return Err(CaptureError::invalid_target(pid, "pid 0 is the system idle process"));
    }

    let mut denied = false;
    for access in ACCESS_LEVELS {
        match unsafe { OpenProcess(access, false, pid) } {
            Ok(handle) => return check_running(pid, handle),
            Err(e) if e.code() == E_ACCESSDENIED => {
                log::debug!("OpenProcess({}) with {:#x} denied", pid, access.0);
                denied = true;
            }
            Err(e) if e.code() == ERROR_INVALID_PARAMETER.to_hresult() => {
                return Err(CaptureError::invalid_target(pid, "no such process"));
            }
            Err(e) => {
                log::debug!("{}", hresult_message("OpenProcess", &e));
            }
        }
    }

    if !denied {
        return Err(CaptureError::invalid_target(pid, "process cannot be opened"));
    }

    if is_listed(pid)? {
        log::info!("Process {} is protected; continuing without a process handle", pid);
        Ok(ProcessAccess::ListedOnly)
    } else {
        Err(CaptureError::invalid_target(pid, "no such process"))
    }
}

fn check_running(pid: u32, handle: HANDLE) -> Result<ProcessAccess, CaptureError> {
    let handle = own_handle("process-handle", handle);
    let mut exit_code = 0u32;
    let queried = unsafe { GetExitCodeProcess(handle.handle().0, &mut exit_code) };
    let result = match queried {
        Ok(()) if exit_code != STILL_ACTIVE => Err(CaptureError::invalid_target(
            pid,
            format!("process has exited (code {})", exit_code),
        )),
        Ok(()) => Ok(ProcessAccess::Opened),
        Err(e) => {
            // Opening succeeded, so the pid exists.
            log::debug!("{}", hresult_message("GetExitCodeProcess", &e));
            Ok(ProcessAccess::Opened)
        }
    };
    handle.release()?;
    result
}

fn is_listed(pid: u32) -> Result<bool, CaptureError> {
    let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) }
        .map_err(|e| CaptureError::PermissionDenied(hresult_message("CreateToolhelp32Snapshot", &e)))?;
    let snapshot = own_handle("process-snapshot", snapshot);

    let mut entry = PROCESSENTRY32W {
        dwSize: mem::size_of::<PROCESSENTRY32W>() as u32,
        ..Default::default()
    };
    let mut found = false;
    let mut more = unsafe { Process32FirstW(snapshot.handle().0, &mut entry) }.is_ok();
    while more {
        if entry.th32ProcessID == pid {
            found = true;
            break;
        }
        more = unsafe { Process32NextW(snapshot.handle().0, &mut entry) }.is_ok();
    }

    snapshot.release()?;
    Ok(found)
}
