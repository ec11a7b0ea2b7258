//! CoreAudio process tap.
//!
//! Captures the audio rendered by one process (and, per scope, its
//! descendants) through a process tap read via a private aggregate device.
//! The tap format is fixed by the HAL (normally non-interleaved float32 at
//! the output device rate) and reported as-is.
//!
//! ## Key Differences from WASAPI process loopback
//! - Process objects are listed explicitly; tree scope is resolved here
//! - Activation is synchronous, no completion handler involved
//! - Delivery runs on the HAL IO thread via an IOProc, no capture thread
//! - Requires macOS 14.4+

use coreaudio_sys::{
    AudioDeviceCreateIOProcID, AudioDeviceDestroyIOProcID, AudioDeviceIOProcID, AudioDeviceStart, AudioDeviceStop,
    AudioObjectAddPropertyListener, AudioObjectID, AudioObjectRemovePropertyListener, AudioStreamBasicDescription,
};
use objc2::AnyThread;
use objc2_core_audio::{AudioHardwareCreateProcessTap, AudioHardwareDestroyProcessTap, CATapDescription, CATapMuteBehavior};
use objc2_foundation::{NSArray, NSNumber, NSString};
use uuid::Uuid;

use process_tap_core::{
    AudioFormatDescriptor, CaptureError, NativeResource, PcmDelivery, TapBackend, TapConfiguration, TeardownReport,
};

use crate::aggregate::{create_aggregate, default_output_uid, AggregateParams};
use crate::buffer_layout::TapBufferRange;
use crate::capability::process_tap_supported;
use crate::ffi::{DEVICE_IS_ALIVE, SCOPE_GLOBAL, SCOPE_INPUT, TAP_FORMAT, TAP_UID};
use crate::format::StreamDescription;
use crate::io_proc::{device_alive_listener, tap_io_proc, IoContext};
use crate::process_probe::{check_alive, resolve_tap_members};
use crate::properties::{read_buffer_channels, read_string, read_value, scoped_address};
use crate::status::check;

const PROCESS_TAP: &str = "process-tap";

/// Resources held between `prepare` and `release`.
struct TapRoute {
    aggregate: NativeResource<AudioObjectID>,
    tap: NativeResource<AudioObjectID>,
    format: AudioFormatDescriptor,
    tap_buffers: TapBufferRange,
}

impl TapRoute {
    fn device(&self) -> AudioObjectID {
        self.aggregate.handle()
    }

    fn release(self) -> Result<(), CaptureError> {
        let mut report = TeardownReport::new();
        report.record(self.aggregate.release());
        report.record(self.tap.release());
        report.finish()
    }
}

/// IOProc registration on the aggregate device. `context` must outlive it.
struct IoRegistration {
    proc_id: AudioDeviceIOProcID,
    context: Box<IoContext>,
    listening: bool,
    clock_started: bool,
}

/// [`TapBackend`] on a CoreAudio process tap.
pub struct CoreAudioProcessTap {
    route: Option<TapRoute>,
    io: Option<IoRegistration>,
}

impl CoreAudioProcessTap {
    pub fn new() -> Self {
        Self { route: None, io: None }
    }
}

impl Default for CoreAudioProcessTap {
    fn default() -> Self {
        Self::new()
    }
}

fn create_process_tap(members: &[AudioObjectID], name: &str) -> Result<NativeResource<AudioObjectID>, CaptureError> {
    let numbers: Vec<_> = members.iter().map(|id| NSNumber::new_u32(*id)).collect();
    let refs: Vec<&NSNumber> = numbers.iter().map(|n| &**n).collect();
    let processes = NSArray::from_slice(&refs);

    let description = unsafe { CATapDescription::initStereoMixdownOfProcesses(CATapDescription::alloc(), &processes) };
    unsafe {
        description.setName(&NSString::from_str(name));
        description.setPrivate(true);
        description.setMuteBehavior(CATapMuteBehavior::Unmuted);
    }

    let mut tap: AudioObjectID = 0;
    let status = unsafe { AudioHardwareCreateProcessTap(Some(&*description), &mut tap) };
    check("AudioHardwareCreateProcessTap", status).map_err(CaptureError::ActivationFailed)?;
    log::debug!("Process tap {} created over {} process object(s)", tap, members.len());

    Ok(NativeResource::new(PROCESS_TAP, tap, |tap| {
        let status = unsafe { AudioHardwareDestroyProcessTap(tap) };
        check("AudioHardwareDestroyProcessTap", status).map_err(CaptureError::TeardownFailed)
    }))
}

/// The tap's buffers within the aggregate's input list. Sub-device inputs come
/// first; without a readable layout the tap is assumed to be the trailing
/// buffers its format implies.
fn locate_tap_buffers(aggregate: AudioObjectID, format: &AudioFormatDescriptor) -> TapBufferRange {
    match read_buffer_channels(aggregate, SCOPE_INPUT) {
        Ok(layout) if !layout.is_empty() => match TapBufferRange::locate(&layout, format) {
            Ok(range) => {
                log::debug!("Aggregate input layout {:?}; tap uses the last {} buffer(s)", layout, range.count());
                range
            }
            Err(e) => {
                log::warn!("{}; falling back to the tap format", e);
                TapBufferRange::from_format(format)
            }
        },
        Ok(_) => TapBufferRange::from_format(format),
        Err(e) => {
            log::debug!("Aggregate input layout unavailable: {}", e);
            TapBufferRange::from_format(format)
        }
    }
}

fn read_tap_format(tap: AudioObjectID) -> Result<AudioFormatDescriptor, CaptureError> {
    let asbd: AudioStreamBasicDescription =
        unsafe { read_value(tap, TAP_FORMAT, None) }.map_err(CaptureError::ActivationFailed)?;
    StreamDescription {
        sample_rate: asbd.mSampleRate,
        format_id: asbd.mFormatID,
        format_flags: asbd.mFormatFlags,
        bytes_per_frame: asbd.mBytesPerFrame,
        channels_per_frame: asbd.mChannelsPerFrame,
        bits_per_channel: asbd.mBitsPerChannel,
    }
    .to_descriptor()
}

impl TapBackend for CoreAudioProcessTap {
    fn name(&self) -> &'static str {
        "coreaudio"
    }

    /// Sequence:
    /// 1. Check the macOS version and that the target is alive
    /// 2. Translate pid → audio process object(s), adding descendants per scope
    /// 3. Create a private, unmuted stereo-mixdown tap over those objects
    /// 4. Read the tap UID and stream format
    /// 5. Create a private aggregate device around the tap
    ///
    /// Guards acquired here drop in reverse order if a later step fails.
    fn prepare(&mut self, pid: u32, config: &TapConfiguration) -> Result<AudioFormatDescriptor, CaptureError> {
        if self.route.is_some() {
            return Err(CaptureError::InvalidState("route already prepared".into()));
        }

        process_tap_supported()?;
        let pid = check_alive(pid)?;
        let members = resolve_tap_members(pid, config.process_scope)?;

        let name = format!("{} ({})", config.device_name, pid);
        let tap = create_process_tap(&members, &name)?;
        let tap_uid = read_string(tap.handle(), TAP_UID).map_err(CaptureError::ActivationFailed)?;
        let format = read_tap_format(tap.handle())?;

        let main_device_uid = default_output_uid();
        if main_device_uid.is_none() {
            log::warn!("No default output device; aggregate runs on the tap clock");
        }
        let aggregate_uid = format!("process-tap.{}", Uuid::new_v4());
        let aggregate = create_aggregate(&AggregateParams {
            name: &name,
            uid: &aggregate_uid,
            tap_uid: &tap_uid,
            main_device_uid: main_device_uid.as_deref(),
        })?;

        let tap_buffers = locate_tap_buffers(aggregate.handle(), &format);

        log::info!("Process tap for pid {} ready: {}", pid, format);
        self.route = Some(TapRoute {
            aggregate,
            tap,
            format,
            tap_buffers,
        });
        Ok(format)
    }

    fn start(&mut self, delivery: PcmDelivery) -> Result<(), CaptureError> {
        let Some(route) = self.route.as_ref() else {
            return Err(CaptureError::NotPrepared);
        };
        if self.io.is_some() {
            return Err(CaptureError::AlreadyCapturing);
        }
        if delivery.format() != &route.format {
            return Err(CaptureError::InvalidState(format!(
                "delivery format {} does not match tap format {}",
                delivery.format(),
                route.format
            )));
        }

        let device = route.device();
        let context = IoContext::new(delivery, route.tap_buffers);
        let mut proc_id: AudioDeviceIOProcID = None;
        let status = unsafe { AudioDeviceCreateIOProcID(device, Some(tap_io_proc), context.client_data(), &mut proc_id) };
        check("AudioDeviceCreateIOProcID", status).map_err(CaptureError::ActivationFailed)?;

        let io = self.io.insert(IoRegistration {
            proc_id,
            context,
            listening: false,
            clock_started: false,
        });

        let alive = scoped_address(DEVICE_IS_ALIVE, SCOPE_GLOBAL);
        let status =
            unsafe { AudioObjectAddPropertyListener(device, &alive, Some(device_alive_listener), io.context.client_data()) };
        match check("AudioObjectAddPropertyListener", status) {
            Ok(()) => io.listening = true,
            Err(message) => log::warn!("{}; device loss will go unnoticed", message),
        }

        let status = unsafe { AudioDeviceStart(device, io.proc_id) };
        match check("AudioDeviceStart", status) {
            Ok(()) => {
                io.clock_started = true;
                Ok(())
            }
            Err(message) => {
                if let Err(e) = self.stop() {
                    log::warn!("Cleanup after failed start: {}", e);
                }
                Err(CaptureError::StreamError(message))
            }
        }
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        let Some(io) = self.io.take() else {
            return Ok(());
        };
        let Some(device) = self.route.as_ref().map(TapRoute::device) else {
            // The route outlives the registration; without it the proc cannot
            // still be registered.
            return Ok(());
        };

        let mut report = TeardownReport::new();
        let mut listener_removed = true;
        if io.listening {
            let alive = scoped_address(DEVICE_IS_ALIVE, SCOPE_GLOBAL);
            let status = unsafe {
                AudioObjectRemovePropertyListener(device, &alive, Some(device_alive_listener), io.context.client_data())
            };
            let removed = check("AudioObjectRemovePropertyListener", status).map_err(CaptureError::TeardownFailed);
            listener_removed = removed.is_ok();
            report.record(removed);
        }
        if io.clock_started {
            let status = unsafe { AudioDeviceStop(device, io.proc_id) };
            report.record(check("AudioDeviceStop", status).map_err(CaptureError::TeardownFailed));
        }

        let status = unsafe { AudioDeviceDestroyIOProcID(device, io.proc_id) };
        match check("AudioDeviceDestroyIOProcID", status) {
            Ok(()) if listener_removed => drop(io.context),
            Ok(()) => {
                log::error!("Liveness listener still registered; leaking IO context");
                std::mem::forget(io.context);
            }
            Err(message) => {
                // Still registered: the HAL may call into the context again.
                log::error!("{}; leaking IO context", message);
                std::mem::forget(io.context);
                report.record(Err(CaptureError::TeardownFailed(message)));
            }
        }
        report.finish()
    }

    fn release(&mut self) -> Result<(), CaptureError> {
        if self.io.is_some() {
            return Err(CaptureError::InvalidState("release while IO is registered".into()));
        }
        match self.route.take() {
            Some(route) => route.release(),
            None => Ok(()),
        }
    }
}

impl Drop for CoreAudioProcessTap {
    fn drop(&mut self) {
        let mut report = TeardownReport::new();
        report.record(self.stop());
        report.record(self.release());
        if let Err(e) = report.finish() {
            log::error!("CoreAudio tap teardown on drop: {}", e);
        }
    }
}
