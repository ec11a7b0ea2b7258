//! Event-driven capture loop.
//!
//! Sequence per wake:
//! 1. Wait on `[stop_event, capture_event]` for at most the wake interval
//! 2. Stop event → exit
//! 3. Capture event → drain: `GetNextPacketSize` until zero, each packet
//!    `GetBuffer` → convert + deliver → `ReleaseBuffer`
//!
//! The stream's active flag is checked before every OS call, so after stop
//! no further capture-client calls are made.

use std::time::Duration;

use windows::core::w;
use windows::Win32::Foundation::{GetLastError, HANDLE, WAIT_EVENT, WAIT_FAILED, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::Media::Audio::{IAudioCaptureClient, AUDCLNT_BUFFERFLAGS_SILENT};
use windows::Win32::System::Threading::{
    AvRevertMmThreadCharacteristics, AvSetMmThreadCharacteristicsW, GetCurrentThread, SetThreadPriority,
    WaitForMultipleObjects, THREAD_PRIORITY_TIME_CRITICAL,
};

use process_tap_core::{PcmBatch, PcmDelivery};

use crate::handles::{hresult_message, is_terminal, ComApartment, ComSend, SendHandle};

const WAKE_STOP: WAIT_EVENT = WAIT_OBJECT_0;
const WAKE_CAPTURE: WAIT_EVENT = WAIT_EVENT(WAIT_OBJECT_0.0 + 1);

/// Everything the capture thread owns.
pub(crate) struct CaptureWorker {
    pub capture_client: ComSend<IAudioCaptureClient>,
    pub stop_event: SendHandle<HANDLE>,
    pub capture_event: SendHandle<HANDLE>,
    pub delivery: PcmDelivery,
    pub block_align: usize,
    pub wake_interval: Duration,
    pub elevate_priority: bool,
}

enum Drain {
    Continue,
    Terminal,
}

impl CaptureWorker {
    pub(crate) fn run(mut self) {
        let _apartment = match ComApartment::multithreaded() {
            Ok(apartment) => apartment,
            Err(e) => {
                self.delivery.fail(e.to_string());
                return;
            }
        };
        let _priority = self.elevate_priority.then(MmcssRegistration::register);

        let handles = [self.stop_event.0, self.capture_event.0];
        let wake_ms = self.wake_interval.as_millis().min(u32::MAX as u128) as u32;

        while self.delivery.is_active() {
            let wake = unsafe { WaitForMultipleObjects(&handles, false, wake_ms) };
            match wake {
                WAKE_STOP => break,
                WAKE_CAPTURE => {
                    if let Drain::Terminal = self.drain() {
                        break;
                    }
                }
                WAIT_TIMEOUT => continue,
                WAIT_FAILED => {
                    let e = windows::core::Error::from(unsafe { GetLastError() }.to_hresult());
                    self.delivery.fail(hresult_message("WaitForMultipleObjects", &e));
                    break;
                }
                other => {
                    self.delivery
                        .record_stream_error(&format!("unexpected wait result {:#x}", other.0));
                }
            }
        }
        log::debug!("Capture loop exited");
    }

    fn drain(&mut self) -> Drain {
        loop {
            if !self.delivery.is_active() {
                return Drain::Continue;
            }

            let packet_frames = match unsafe { self.capture_client.GetNextPacketSize() } {
                Ok(frames) => frames,
                Err(e) => return self.on_error("GetNextPacketSize", &e),
            };
            if packet_frames == 0 {
                return Drain::Continue;
            }

            let mut data: *mut u8 = std::ptr::null_mut();
            let mut frames: u32 = 0;
            let mut flags: u32 = 0;
            if let Err(e) = unsafe { self.capture_client.GetBuffer(&mut data, &mut frames, &mut flags, None, None) } {
                return self.on_error("GetBuffer", &e);
            }

            if frames > 0 && !data.is_null() {
                let len = frames as usize * self.block_align;
                // SAFETY: WASAPI guarantees `frames * block_align` readable bytes
                // until ReleaseBuffer.
                let bytes = unsafe { std::slice::from_raw_parts(data as *const u8, len) };
                let silent = flags & (AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) != 0;
                self.delivery
                    .deliver(PcmBatch::interleaved(bytes, frames as usize).silent(silent));
            }

            if let Err(e) = unsafe { self.capture_client.ReleaseBuffer(frames) } {
                return self.on_error("ReleaseBuffer", &e);
            }
        }
    }

    /// Terminal errors fault the stream; anything else skips the packet.
    fn on_error(&self, context: &str, error: &windows::core::Error) -> Drain {
        let message = hresult_message(context, error);
        if is_terminal(error.code()) {
            self.delivery.fail(message);
            Drain::Terminal
        } else {
            self.delivery.record_stream_error(&message);
            Drain::Continue
        }
    }
}

/// Real-time scheduling for the capture thread: MMCSS "Pro Audio", or
/// time-critical priority when MMCSS is unavailable. Failure to elevate is
/// logged and otherwise ignored.
struct MmcssRegistration(Option<HANDLE>);

impl MmcssRegistration {
    fn register() -> Self {
        let mut task_index = 0u32;
        match unsafe { AvSetMmThreadCharacteristicsW(w!("Pro Audio"), &mut task_index) } {
            Ok(handle) => Self(Some(handle)),
            Err(e) => {
                log::warn!("{}; falling back to thread priority", hresult_message("MMCSS registration", &e));
                if let Err(e) = unsafe { SetThreadPriority(GetCurrentThread(), THREAD_PRIORITY_TIME_CRITICAL) } {
                    log::warn!("{}", hresult_message("SetThreadPriority", &e));
                }
                Self(None)
            }
        }
    }
}

impl Drop for MmcssRegistration {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            if let Err(e) = unsafe { AvRevertMmThreadCharacteristics(handle) } {
                log::debug!("{}", hresult_message("AvRevertMmThreadCharacteristics", &e));
            }
        }
    }
}
