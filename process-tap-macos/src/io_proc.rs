//! IOProc and liveness listener on the aggregate device.
//!
//! The HAL calls the proc on its real-time IO thread with the aggregate's
//! input buffers, the tap's streams last. The context is boxed and outlives
//! the registration: it is freed only after the listener is removed and
//! `AudioDeviceStop` and `AudioDeviceDestroyIOProcID` returned, after which
//! the HAL makes no further calls.

use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::slice;
use std::sync::Arc;

use coreaudio_sys::{
    AudioBuffer, AudioBufferList, AudioObjectID, AudioObjectPropertyAddress, AudioTimeStamp, OSStatus,
};
use parking_lot::Mutex;

use process_tap_core::{PcmBatch, PcmDelivery, StreamStatus, MAX_CHANNELS};

use crate::buffer_layout::TapBufferRange;
use crate::ffi::DEVICE_IS_ALIVE;
use crate::properties::read_value;

const NO_ERR: OSStatus = 0;

/// State handed to the IOProc and the liveness listener as client data.
pub(crate) struct IoContext {
    delivery: Mutex<PcmDelivery>,
    status: Arc<StreamStatus>,
    tap_buffers: TapBufferRange,
}

impl IoContext {
    pub(crate) fn new(delivery: PcmDelivery, tap_buffers: TapBufferRange) -> Box<Self> {
        let status = Arc::clone(delivery.status());
        Box::new(Self {
            delivery: Mutex::new(delivery),
            status,
            tap_buffers,
        })
    }

    /// Client-data pointer for `AudioDeviceCreateIOProcID`.
    pub(crate) fn client_data(&self) -> *mut c_void {
        self as *const Self as *mut c_void
    }

    /// The aggregate device died (output device unplugged, coreaudiod
    /// restart). No further IO will arrive.
    pub(crate) fn on_device_alive(&self, alive: bool) {
        if !alive {
            self.status.fail("aggregate device is no longer alive");
        }
    }

    fn on_input(&self, buffers: &[AudioBuffer]) {
        // The HAL serializes calls; contention means teardown is in progress.
        let Some(mut delivery) = self.delivery.try_lock() else {
            return;
        };
        if !delivery.is_active() || buffers.is_empty() {
            return;
        }
        let Some(buffers) = self.tap_buffers.select(buffers) else {
            delivery.record_stream_error(&format!(
                "aggregate delivered {} input buffers, tap needs {}",
                buffers.len(),
                self.tap_buffers.count()
            ));
            return;
        };

        let format = *delivery.format();
        let sample_bytes = format.sample_format.bytes_per_sample();

        // One buffer carries every channel even when the stream is flagged
        // non-interleaved.
        if format.interleaved || buffers.len() == 1 {
            let Some(data) = buffer_bytes(&buffers[0]) else {
                return;
            };
            let frames = data.len() / format.bytes_per_frame().max(1);
            delivery.deliver(PcmBatch::interleaved(data, frames));
            return;
        }

        let channels = format.channels as usize;
        if buffers.len() < channels {
            delivery.record_stream_error(&format!(
                "tap delivered {} planes for {} channels",
                buffers.len(),
                channels
            ));
            return;
        }

        let mut planes: [&[u8]; MAX_CHANNELS as usize] = [&[]; MAX_CHANNELS as usize];
        for (plane, buffer) in planes.iter_mut().zip(&buffers[..channels]) {
            match buffer_bytes(buffer) {
                Some(data) => *plane = data,
                None => return,
            }
        }
        let planes = &planes[..channels];
        let frames = planes.iter().map(|p| p.len()).min().unwrap_or(0) / sample_bytes;
        delivery.deliver(PcmBatch::planar(planes, frames));
    }
}

fn buffer_bytes(buffer: &AudioBuffer) -> Option<&[u8]> {
    if buffer.mData.is_null() || buffer.mDataByteSize == 0 {
        return None;
    }
    // SAFETY: the HAL guarantees `mDataByteSize` readable bytes for the
    // duration of the IOProc call.
    Some(unsafe { slice::from_raw_parts(buffer.mData as *const u8, buffer.mDataByteSize as usize) })
}

/// `AudioDeviceIOProc` reading the tap's input.
pub(crate) unsafe extern "C" fn tap_io_proc(
    _device: AudioObjectID,
    _now: *const AudioTimeStamp,
    input: *const AudioBufferList,
    _input_time: *const AudioTimeStamp,
    _output: *mut AudioBufferList,
    _output_time: *const AudioTimeStamp,
    client_data: *mut c_void,
) -> OSStatus {
    if client_data.is_null() || input.is_null() {
        return NO_ERR;
    }

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: `client_data` is the boxed context registered with this
        // proc; it lives until the registration is destroyed.
        let context = unsafe { &*(client_data as *const IoContext) };
        let list = unsafe { &*input };
        let buffers = unsafe { slice::from_raw_parts(list.mBuffers.as_ptr(), list.mNumberBuffers as usize) };
        context.on_input(buffers);
    }));
    if outcome.is_err() {
        log::error!("Panic in tap IOProc; batch dropped");
    }
    NO_ERR
}

/// `AudioObjectPropertyListenerProc` for `kAudioDevicePropertyDeviceIsAlive`.
pub(crate) unsafe extern "C" fn device_alive_listener(
    device: AudioObjectID,
    _count: u32,
    _addresses: *const AudioObjectPropertyAddress,
    client_data: *mut c_void,
) -> OSStatus {
    if client_data.is_null() {
        return NO_ERR;
    }

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: the listener is removed before the context is freed.
        let context = unsafe { &*(client_data as *const IoContext) };
        // A failed read means the device is already gone.
        let alive = unsafe { read_value::<u32>(device, DEVICE_IS_ALIVE, None) }.is_ok_and(|alive| alive != 0);
        if !alive {
            log::error!("Aggregate device {} died", device);
        }
        context.on_device_alive(alive);
    }));
    if outcome.is_err() {
        log::error!("Panic in device liveness listener");
    }
    NO_ERR
}
