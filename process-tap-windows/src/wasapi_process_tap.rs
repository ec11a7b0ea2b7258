//! WASAPI process-loopback tap.
//!
//! Captures the audio rendered by one process (and its children) using
//! `AUDIOCLIENT_ACTIVATION_TYPE_PROCESS_LOOPBACK`. The client asks for the
//! configured format and lets the audio engine convert (`AUTOCONVERTPCM`),
//! so the tap format is known before the first packet arrives.
//!
//! ## Key Differences from device loopback
//! - No render endpoint is involved; the virtual device `VAD\Process_Loopback`
//!   is activated asynchronously
//! - `GetMixFormat` is not available on the activated client
//! - Requires Windows build 20348+

use std::thread::{self, JoinHandle};

use windows::Win32::Media::Audio::*;
use windows::Win32::System::Threading::{ResetEvent, SetEvent};

use process_tap_core::{
    AudioFormatDescriptor, CaptureError, PcmDelivery, TapBackend, TapConfiguration, TeardownReport,
};

use crate::activation::activate_process_loopback;
use crate::capability::process_loopback_supported;
use crate::capture_thread::CaptureWorker;
use crate::handles::{create_event, enter_mta, hresult_message, ComSend, MtaUsage, OwnedHandle};
use crate::process_probe::probe_process;
use crate::wave_format::WaveFormatFields;

/// Resources held between `prepare` and `release`.
///
/// Fields drop in declaration order, which is the reverse of acquisition.
struct PreparedRoute {
    capture_client: ComSend<IAudioCaptureClient>,
    audio_client: ComSend<IAudioClient>,
    capture_event: OwnedHandle,
    stop_event: OwnedHandle,
    mta: MtaUsage,
    format: AudioFormatDescriptor,
    block_align: usize,
}

impl PreparedRoute {
    fn release(self) -> Result<(), CaptureError> {
        let Self {
            capture_client,
            audio_client,
            capture_event,
            stop_event,
            mta,
            ..
        } = self;

        drop(capture_client);
        drop(audio_client);

        let mut report = TeardownReport::new();
        report.record(capture_event.release());
        report.record(stop_event.release());
        report.record(mta.release());
        report.finish()
    }
}

struct RunningCapture {
    thread: JoinHandle<()>,
    clock_started: bool,
}

/// [`TapBackend`] on WASAPI process loopback.
pub struct WasapiProcessTap {
    config: TapConfiguration,
    route: Option<PreparedRoute>,
    running: Option<RunningCapture>,
}

impl WasapiProcessTap {
    pub fn new() -> Self {
        Self {
            config: TapConfiguration::default(),
            route: None,
            running: None,
        }
    }
}

impl Default for WasapiProcessTap {
    fn default() -> Self {
        Self::new()
    }
}

impl TapBackend for WasapiProcessTap {
    fn name(&self) -> &'static str {
        "wasapi"
    }

    /// Sequence:
    /// 1. Check the Windows build and the target process
    /// 2. Hold MTA usage, create stop + capture events
    /// 3. Activate the process-loopback `IAudioClient` (bounded wait)
    /// 4. Initialize shared-mode loopback, event-driven, auto-convert
    /// 5. Attach the capture event, get `IAudioCaptureClient`
    fn prepare(&mut self, pid: u32, config: &TapConfiguration) -> Result<AudioFormatDescriptor, CaptureError> {
        if self.route.is_some() {
            return Err(CaptureError::InvalidState("route already prepared".into()));
        }

        process_loopback_supported()?;
        let access = probe_process(pid)?;
        log::debug!("Process {} probe: {:?}", pid, access);

        let wave = WaveFormatFields::from_descriptor(&config.requested_format)?;

        let mta = enter_mta()?;
        let stop_event = create_event("stop-event")?;
        let capture_event = create_event("capture-event")?;

        let audio_client = activate_process_loopback(pid, config.process_scope, config.activation_timeout)?;

        let format = WAVEFORMATEX {
            wFormatTag: wave.format_tag,
            nChannels: wave.channels,
            nSamplesPerSec: wave.samples_per_sec,
            nAvgBytesPerSec: wave.avg_bytes_per_sec,
            nBlockAlign: wave.block_align,
            wBitsPerSample: wave.bits_per_sample,
            cbSize: 0,
        };

        unsafe {
            audio_client
                .Initialize(
                    AUDCLNT_SHAREMODE_SHARED,
                    AUDCLNT_STREAMFLAGS_LOOPBACK
                        | AUDCLNT_STREAMFLAGS_EVENTCALLBACK
                        | AUDCLNT_STREAMFLAGS_AUTOCONVERTPCM
                        | AUDCLNT_STREAMFLAGS_SRC_DEFAULT_QUALITY,
                    config.buffer_duration_hns(),
                    0,
                    &format,
                    None,
                )
                .map_err(|e| CaptureError::ActivationFailed(hresult_message("IAudioClient::Initialize", &e)))?;

            audio_client
                .SetEventHandle(capture_event.handle().0)
                .map_err(|e| CaptureError::ActivationFailed(hresult_message("SetEventHandle", &e)))?;
        }

        let capture_client: IAudioCaptureClient = unsafe { audio_client.GetService() }
            .map_err(|e| CaptureError::ActivationFailed(hresult_message("GetService(IAudioCaptureClient)", &e)))?;

        let descriptor = wave.to_descriptor();
        log::info!("Process loopback for pid {} ready: {}", pid, descriptor);

        self.config = config.clone();
        self.route = Some(PreparedRoute {
            capture_client: ComSend(capture_client),
            audio_client,
            capture_event,
            stop_event,
            mta,
            format: descriptor,
            block_align: wave.block_align as usize,
        });
        Ok(descriptor)
    }

    fn start(&mut self, delivery: PcmDelivery) -> Result<(), CaptureError> {
        let Some(route) = self.route.as_ref() else {
            return Err(CaptureError::NotPrepared);
        };
        if self.running.is_some() {
            return Err(CaptureError::AlreadyCapturing);
        }
        if delivery.format() != &route.format {
            return Err(CaptureError::InvalidState(format!(
                "delivery format {} does not match route format {}",
                delivery.format(),
                route.format
            )));
        }

        unsafe { ResetEvent(route.stop_event.handle().0) }
            .map_err(|e| CaptureError::StreamError(hresult_message("ResetEvent", &e)))?;

        let worker = CaptureWorker {
            capture_client: route.capture_client.clone(),
            stop_event: route.stop_event.handle(),
            capture_event: route.capture_event.handle(),
            delivery,
            block_align: route.block_align,
            wake_interval: self.config.wake_interval,
            elevate_priority: self.config.elevate_thread_priority,
        };

        let thread = thread::Builder::new()
            .name("wasapi-process-tap".into())
            .spawn(move || worker.run())
            .map_err(|e| CaptureError::StreamError(format!("failed to spawn capture thread: {}", e)))?;

        let started = unsafe { route.audio_client.Start() };
        self.running = Some(RunningCapture {
            thread,
            clock_started: started.is_ok(),
        });

        if let Err(e) = started {
            let err = CaptureError::StreamError(hresult_message("IAudioClient::Start", &e));
            if let Err(stop_err) = self.stop() {
                log::warn!("Cleanup after failed start: {}", stop_err);
            }
            return Err(err);
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };

        let mut report = TeardownReport::new();
        if let Some(route) = &self.route {
            report.record(
                unsafe { SetEvent(route.stop_event.handle().0) }
                    .map_err(|e| CaptureError::TeardownFailed(hresult_message("SetEvent", &e))),
            );
        }

        if running.thread.join().is_err() {
            report.record(Err(CaptureError::TeardownFailed("capture thread panicked".into())));
        }

        if let (true, Some(route)) = (running.clock_started, &self.route) {
            report.record(
                unsafe { route.audio_client.Stop() }
                    .map_err(|e| CaptureError::TeardownFailed(hresult_message("IAudioClient::Stop", &e))),
            );
        }
        report.finish()
    }

    fn release(&mut self) -> Result<(), CaptureError> {
        match self.route.take() {
            Some(route) => route.release(),
            None => Ok(()),
        }
    }
}

impl Drop for WasapiProcessTap {
    fn drop(&mut self) {
        let mut report = TeardownReport::new();
        report.record(self.stop());
        report.record(self.release());
        if let Err(e) = report.finish() {
            log::error!("WASAPI tap teardown on drop: {}", e);
        }
    }
}
