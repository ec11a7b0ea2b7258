//! Asynchronous process-loopback activation.
//!
//! `ActivateAudioInterfaceAsync` completes on an OS worker thread. The
//! completion handler forwards the result through a [`Completion`] and the
//! requesting thread waits for it with a bounded timeout. If the wait times
//! out, a client delivered later is dropped (and released) with the handler.

use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use windows::core::{implement, w, Interface, IUnknown, Ref, HRESULT};
use windows::Win32::Foundation::E_ACCESSDENIED;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::IAgileObject;
use windows::Win32::System::Com::IAgileObject_Impl;
use windows::Win32::System::Com::StructuredStorage::PROPVARIANT;

use process_tap_core::{CaptureError, Completer, Completion, ProcessScope};

use crate::handles::{hresult_message, ComSend};

const ACTIVATION_TYPE_PROCESS_LOOPBACK: u32 = 1;
const LOOPBACK_MODE_INCLUDE_TARGET_PROCESS_TREE: u32 = 0;
const VT_BLOB: u16 = 65;

#[repr(C)]
struct ProcessLoopbackParams {
    target_process_id: u32,
    process_loopback_mode: u32,
}

#[repr(C)]
struct AudioClientActivationParams {
    activation_type: u32,
    loopback_params: ProcessLoopbackParams,
}

/// `PROPVARIANT` holding a `VT_BLOB`, laid out for both pointer widths.
#[repr(C)]
struct BlobPropVariant {
    vt: u16,
    reserved: [u16; 3],
    cb_size: u32,
    blob_data: *const u8,
}

/// Activation parameters plus the variant pointing at them. Boxed so the
/// address stays stable while the OS may still read it.
struct ActivationPayload {
    params: AudioClientActivationParams,
    variant: BlobPropVariant,
}

type ActivationResult = Result<ComSend<IAudioClient>, CaptureError>;

#[implement(IActivateAudioInterfaceCompletionHandler, IAgileObject)]
struct ActivationHandler {
    completer: Completer<ActivationResult>,
    _payload: Box<ActivationPayload>,
}

impl IActivateAudioInterfaceCompletionHandler_Impl for ActivationHandler_Impl {
    fn ActivateCompleted(&self, operation: Ref<'_, IActivateAudioInterfaceAsyncOperation>) -> windows::core::Result<()> {
        let result = panic::catch_unwind(AssertUnwindSafe(|| take_client(&operation))).unwrap_or_else(|_| {
            log::error!("Panic in audio activation callback");
            Err(CaptureError::ActivationFailed("activation callback panicked".into()))
        });
        if !self.completer.complete(result) {
            log::debug!("Duplicate activation completion ignored");
        }
        Ok(())
    }
}

impl IAgileObject_Impl for ActivationHandler_Impl {}

fn take_client(operation: &Ref<'_, IActivateAudioInterfaceAsyncOperation>) -> ActivationResult {
    let operation = operation
        .ok()
        .map_err(|e| CaptureError::ActivationFailed(hresult_message("activation operation", &e)))?;

    let mut activate_hr = HRESULT(0);
    let mut unknown: Option<IUnknown> = None;
    unsafe { operation.GetActivateResult(&mut activate_hr, &mut unknown) }
        .map_err(|e| CaptureError::ActivationFailed(hresult_message("GetActivateResult", &e)))?;

    if activate_hr == E_ACCESSDENIED {
        return Err(CaptureError::PermissionDenied(
            "process loopback activation was denied".into(),
        ));
    }
    activate_hr
        .ok()
        .map_err(|e| CaptureError::ActivationFailed(hresult_message("process loopback activation", &e)))?;

    let client: IAudioClient = unknown
        .ok_or_else(|| CaptureError::ActivationFailed("activation returned no interface".into()))?
        .cast()
        .map_err(|e| CaptureError::ActivationFailed(hresult_message("IAudioClient cast", &e)))?;
    Ok(ComSend(client))
}

/// Activate an `IAudioClient` that captures the output of `pid`.
///
/// Blocks for at most `timeout`.
pub(crate) fn activate_process_loopback(
    pid: u32,
    scope: ProcessScope,
    timeout: Duration,
) -> Result<ComSend<IAudioClient>, CaptureError> {
    if scope == ProcessScope::SingleProcess {
        log::warn!("WASAPI process loopback always includes the target's process tree");
    }

    let mut payload = Box::new(ActivationPayload {
        params: AudioClientActivationParams {
            activation_type: ACTIVATION_TYPE_PROCESS_LOOPBACK,
            loopback_params: ProcessLoopbackParams {
                target_process_id: pid,
                process_loopback_mode: LOOPBACK_MODE_INCLUDE_TARGET_PROCESS_TREE,
            },
        },
        variant: BlobPropVariant {
            vt: VT_BLOB,
            reserved: [0; 3],
            cb_size: std::mem::size_of::<AudioClientActivationParams>() as u32,
            blob_data: std::ptr::null(),
        },
    });
    payload.variant.blob_data = &payload.params as *const AudioClientActivationParams as *const u8;
    let variant = &payload.variant as *const BlobPropVariant as *const PROPVARIANT;

    let (completion, completer) = Completion::new();
    let handler: IActivateAudioInterfaceCompletionHandler = ActivationHandler {
        completer,
        _payload: payload,
    }
    .into();

    log::debug!("Activating process loopback for pid {}", pid);
    let _operation = unsafe {
        ActivateAudioInterfaceAsync(
            w!("VAD\\Process_Loopback"),
            &IAudioClient::IID,
            Some(variant),
            &handler,
        )
    }
    .map_err(|e| CaptureError::ActivationFailed(hresult_message("ActivateAudioInterfaceAsync", &e)))?;

    match completion.wait_timeout(timeout) {
        Some(result) => result,
        None => {
            log::error!("Process loopback activation for pid {} timed out after {:?}", pid, timeout);
            Err(CaptureError::Timeout(timeout))
        }
    }
}
