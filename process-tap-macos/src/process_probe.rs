//! Target checks and process-object resolution.
//!
//! A pid must name a live process before anything is created. The HAL only
//! knows processes that have opened an audio connection, so a live pid may
//! still have no process object.

use std::mem;

use coreaudio_sys::{kAudioObjectSystemObject, AudioObjectID};

use process_tap_core::{CaptureError, ProcessScope};

use crate::ffi::{PROCESS_OBJECT_LIST, PROCESS_PID, TRANSLATE_PID_TO_PROCESS_OBJECT};
use crate::process_tree::{select_tap_members, AudioProcess};
use crate::properties::{read_object_list, read_value};

/// `kAudioObjectUnknown`
const UNKNOWN_OBJECT: AudioObjectID = 0;

/// Verify that `pid` names a running process.
pub(crate) fn check_alive(pid: u32) -> Result<i32, CaptureError> {
    let pid = i32::try_from(pid).map_err(|_| CaptureError::invalid_target(pid, "pid out of range"))?;
    if pid <= 0 {
        return Err(CaptureError::invalid_target(pid as u32, "pid must be positive"));
    }

    if unsafe { libc::kill(pid, 0) } == 0 {
        return Ok(pid);
    }
    match std::io::Error::last_os_error().raw_os_error() {
        // Exists, owned by someone else.
        Some(libc::EPERM) => Ok(pid),
        Some(libc::ESRCH) => Err(CaptureError::invalid_target(pid as u32, "no such process")),
        _ => Err(CaptureError::invalid_target(
            pid as u32,
            format!("liveness check failed: {}", std::io::Error::last_os_error()),
        )),
    }
}

/// Parent pid from the BSD process info, if readable.
pub(crate) fn parent_of(pid: i32) -> Option<i32> {
    let mut info: libc::proc_bsdinfo = unsafe { mem::zeroed() };
    let size = mem::size_of::<libc::proc_bsdinfo>() as libc::c_int;
    let read = unsafe {
        libc::proc_pidinfo(
            pid,
            libc::PROC_PIDTBSDINFO,
            0,
            &mut info as *mut libc::proc_bsdinfo as *mut libc::c_void,
            size,
        )
    };
    (read == size).then_some(info.pbi_ppid as i32)
}

fn translate_pid(pid: i32) -> Result<Option<AudioObjectID>, CaptureError> {
    let qualifier = pid as u32;
    let object: AudioObjectID =
        unsafe { read_value(kAudioObjectSystemObject, TRANSLATE_PID_TO_PROCESS_OBJECT, Some(&qualifier)) }
            .map_err(CaptureError::ActivationFailed)?;
    Ok((object != UNKNOWN_OBJECT).then_some(object))
}

fn audio_processes() -> Result<Vec<AudioProcess>, String> {
    let objects = read_object_list(kAudioObjectSystemObject, PROCESS_OBJECT_LIST)?;
    let mut processes = Vec::with_capacity(objects.len());
    for object_id in objects {
        match unsafe { read_value::<i32>(object_id, PROCESS_PID, None) } {
            Ok(pid) => processes.push(AudioProcess { object_id, pid }),
            // Process objects vanish when their owner exits.
            Err(e) => log::debug!("{}", e),
        }
    }
    Ok(processes)
}

/// The process objects the tap for `pid` should include.
pub(crate) fn resolve_tap_members(pid: i32, scope: ProcessScope) -> Result<Vec<AudioObjectID>, CaptureError> {
    let target = translate_pid(pid)?;
    log::debug!("Process {} audio object: {:?}", pid, target);

    let listed = match scope {
        ProcessScope::SingleProcess => Vec::new(),
        ProcessScope::ProcessTree => audio_processes().unwrap_or_else(|e| {
            log::warn!("Cannot list audio processes, tapping pid {} alone: {}", pid, e);
            Vec::new()
        }),
    };

    let members = select_tap_members(pid, target, &listed, scope, parent_of);
    if members.is_empty() {
        return Err(CaptureError::ActivationFailed(format!(
            "process {} has no audio process object; it has not opened an audio stream",
            pid
        )));
    }
    Ok(members)
}
