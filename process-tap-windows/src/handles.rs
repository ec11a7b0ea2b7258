//! Send wrappers and RAII guards for COM objects and kernel handles.

use std::ops::Deref;

use windows::core::HRESULT;
use windows::Win32::Foundation::{CloseHandle, HANDLE, RPC_E_CHANGED_MODE};
use windows::Win32::Media::Audio::{AUDCLNT_E_DEVICE_INVALIDATED, AUDCLNT_E_SERVICE_NOT_RUNNING};
use windows::Win32::System::Com::*;
use windows::Win32::System::Threading::CreateEventW;

use process_tap_core::{CaptureError, NativeResource};

/// A COM interface pointer moved between threads.
#[derive(Clone)]
pub(crate) struct ComSend<T>(pub T);

// SAFETY: only used for interfaces created in the MTA, which are free-threaded.
unsafe impl<T> Send for ComSend<T> {}

impl<T> Deref for ComSend<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

/// A raw handle value moved between threads.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SendHandle<T: Copy>(pub T);

// SAFETY: kernel handles and MTA cookies are process-wide values, not
// thread-affine objects.
unsafe impl<T: Copy> Send for SendHandle<T> {}

pub(crate) type OwnedHandle = NativeResource<SendHandle<HANDLE>>;
pub(crate) type MtaUsage = NativeResource<SendHandle<CO_MTA_USAGE_COOKIE>>;

pub(crate) fn hresult_message(context: &str, error: &windows::core::Error) -> String {
    format!("{}: {} (0x{:08X})", context, error.message(), error.code().0 as u32)
}

/// Errors after which the audio client can never deliver again.
pub(crate) fn is_terminal(code: HRESULT) -> bool {
    code == AUDCLNT_E_DEVICE_INVALIDATED || code == AUDCLNT_E_SERVICE_NOT_RUNNING
}

pub(crate) fn own_handle(label: &'static str, handle: HANDLE) -> OwnedHandle {
    NativeResource::new(label, SendHandle(handle), |h| unsafe {
        CloseHandle(h.0).map_err(|e| CaptureError::TeardownFailed(hresult_message("CloseHandle", &e)))
    })
}

/// Auto-reset, initially unsignaled event.
pub(crate) fn create_event(label: &'static str) -> Result<OwnedHandle, CaptureError> {
    let handle = unsafe { CreateEventW(None, false, false, windows::core::PCWSTR::null()) }
        .map_err(|e| CaptureError::ActivationFailed(hresult_message("CreateEventW", &e)))?;
    Ok(own_handle(label, handle))
}

/// Keep the process MTA alive so COM objects created for the tap stay
/// usable from the caller's thread and the capture thread alike.
pub(crate) fn enter_mta() -> Result<MtaUsage, CaptureError> {
    let cookie = unsafe { CoIncrementMTAUsage() }
        .map_err(|e| CaptureError::ActivationFailed(hresult_message("CoIncrementMTAUsage", &e)))?;
    Ok(NativeResource::new("mta-usage", SendHandle(cookie), |c| unsafe {
        CoDecrementMTAUsage(c.0)
            .map_err(|e| CaptureError::TeardownFailed(hresult_message("CoDecrementMTAUsage", &e)))
    }))
}

/// Per-thread COM initialization, undone on drop.
pub(crate) struct ComApartment {
    initialized: bool,
}

impl ComApartment {
    pub(crate) fn multithreaded() -> Result<Self, CaptureError> {
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        if hr == RPC_E_CHANGED_MODE {
            // Already an STA; the MTA usage cookie keeps our objects reachable.
            log::debug!("Thread already in a single-threaded apartment");
            return Ok(Self { initialized: false });
        }
        hr.ok()
            .map_err(|e| CaptureError::StreamError(hresult_message("CoInitializeEx", &e)))?;
        Ok(Self { initialized: true })
    }
}

impl Drop for ComApartment {
    fn drop(&mut self) {
        if self.initialized {
            unsafe {
                CoUninitialize();
            }
        }
    }
}
