use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::config::TapConfiguration;
use crate::models::diagnostics::CaptureDiagnostics;
use crate::models::error::CaptureError;
use crate::models::format::AudioFormatDescriptor;
use crate::models::state::TapState;
use crate::processing::delivery::{AudioDataCallback, PcmDelivery, StreamStatus};
use crate::traits::capture_delegate::CaptureDelegate;
use crate::traits::tap_backend::TapBackend;

/// Lifecycle state machine around one [`TapBackend`].
///
/// ```text
/// uninitialized ──initialize──→ prepared ──start──→ capturing ──stop──→ stopped
///       │                          │                    │
///       └────────── any unrecoverable error ──→ failed ─┘
/// ```
///
/// Entering `failed` releases everything acquired so far. `stop` is safe to
/// repeat and also runs on drop, so a tap never outlives its owner.
pub struct ProcessTap {
    backend: Box<dyn TapBackend>,
    config: TapConfiguration,
    delegate: Option<Arc<dyn CaptureDelegate>>,
    pid: u32,
    state: TapState,
    format: Option<AudioFormatDescriptor>,
    status: Option<Arc<StreamStatus>>,
    started_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
}

impl ProcessTap {
    pub fn new(backend: Box<dyn TapBackend>, config: TapConfiguration) -> Self {
        Self {
            backend,
            config,
            delegate: None,
            pid: 0,
            state: TapState::Uninitialized,
            format: None,
            status: None,
            started_at: None,
            error_message: None,
        }
    }

    pub fn with_delegate(mut self, delegate: Arc<dyn CaptureDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    /// Verify `pid`, acquire its capture route and determine the native format.
    ///
    /// Transitions: uninitialized → prepared, or → failed with every partial
    /// resource released.
    pub fn initialize(&mut self, pid: u32) -> Result<AudioFormatDescriptor, CaptureError> {
        if !self.state.is_uninitialized() {
            return Err(self.reject(CaptureError::InvalidState(format!(
                "initialize called in state {}",
                self.state.name()
            ))));
        }

        self.pid = pid;
        if pid == 0 {
            return Err(self.fail(CaptureError::invalid_target(pid, "pid must be positive")));
        }
        if let Err(e) = self.config.validate() {
            return Err(self.fail(e));
        }

        log::info!("Preparing {} tap for pid {}", self.backend.name(), pid);
        match self.backend.prepare(pid, &self.config) {
            Ok(format) => {
                if let Err(e) = format.validate() {
                    return Err(self.fail(e));
                }
                log::info!("Tap for pid {} prepared: {}", pid, format);
                self.format = Some(format);
                self.transition(TapState::Prepared);
                Ok(format)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Register IO delivery and start the audio clock.
    ///
    /// Transitions: prepared → capturing. Calling twice fails without a second
    /// registration; calling before `initialize` fails without side effects.
    pub fn start(&mut self, callback: AudioDataCallback) -> Result<(), CaptureError> {
        if self.state.is_capturing() {
            return Err(self.reject(CaptureError::AlreadyCapturing));
        }
        if self.state.is_uninitialized() {
            return Err(self.reject(CaptureError::NotPrepared));
        }
        let format = match self.format {
            Some(format) if self.state.is_prepared() => format,
            _ => {
                let message = format!("start called in state {}", self.state.name());
                return Err(self.reject(CaptureError::InvalidState(message)));
            }
        };

        let status = Arc::new(StreamStatus::new(self.delegate.clone()));
        status.activate();
        let delivery = PcmDelivery::new(format, callback, Arc::clone(&status));

        match self.backend.start(delivery) {
            Ok(()) => {
                self.status = Some(status);
                self.started_at = Some(Utc::now());
                self.transition(TapState::Capturing);
                log::info!("Capturing pid {} via {}", self.pid, self.backend.name());
                Ok(())
            }
            Err(e) => {
                status.deactivate();
                if let Err(stop_err) = self.backend.stop() {
                    log::warn!("Cleanup after failed start: {}", stop_err);
                }
                Err(self.fail(e))
            }
        }
    }

    /// Stop capture and release every resource in reverse acquisition order.
    ///
    /// Transitions: prepared/capturing → stopped. A no-op in any other state.
    /// Every teardown step runs even when an earlier one fails; the first
    /// failure is returned and kept as the error message.
    pub fn stop(&mut self) -> Result<(), CaptureError> {
        if !self.state.holds_resources() {
            return Ok(());
        }

        log::info!("Stopping tap for pid {}", self.pid);
        if let Some(status) = &self.status {
            status.deactivate();
        }

        let stop_result = self.backend.stop();
        let release_result = self.backend.release();
        self.transition(TapState::Stopped);

        match stop_result.and(release_result) {
            Ok(()) => Ok(()),
            Err(e) => {
                log::error!("Teardown of tap for pid {} reported: {}", self.pid, e);
                self.error_message = Some(e.to_string());
                if let Some(delegate) = &self.delegate {
                    delegate.on_error(&e);
                }
                Err(e)
            }
        }
    }

    pub fn state(&self) -> &TapState {
        &self.state
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn format(&self) -> Option<AudioFormatDescriptor> {
        self.format
    }

    /// Whether the tap is capturing and its stream has not faulted.
    pub fn is_capturing(&self) -> bool {
        self.state.is_capturing() && self.status.as_ref().is_some_and(|s| s.is_active())
    }

    /// Stream status shared with the audio thread, once started.
    pub fn status(&self) -> Option<Arc<StreamStatus>> {
        self.status.clone()
    }

    /// Reason the stream stopped on its own, if it did.
    pub fn fault(&self) -> Option<String> {
        self.status.as_ref().and_then(|s| s.fault())
    }

    /// Most recent failure message: a lifecycle error, a teardown error or a
    /// stream fault.
    pub fn error_message(&self) -> Option<String> {
        self.error_message.clone().or_else(|| self.fault())
    }

    pub fn diagnostics(&self) -> CaptureDiagnostics {
        let stats = self.status.as_ref().map(|s| s.stats()).unwrap_or_default();
        CaptureDiagnostics {
            pid: self.pid,
            backend: self.backend.name().to_string(),
            state: self.state.name().to_string(),
            format: self.format,
            started_at: self.started_at,
            batches_delivered: stats.batches_delivered,
            frames_delivered: stats.frames_delivered,
            silent_batches_skipped: stats.silent_batches_skipped,
            stream_errors: stats.stream_errors,
            callback_panics: stats.callback_panics,
            fault: self.fault(),
        }
    }

    fn transition(&mut self, state: TapState) {
        log::debug!("Tap pid {}: {} → {}", self.pid, self.state.name(), state.name());
        self.state = state;
        if let Some(delegate) = &self.delegate {
            delegate.on_state_changed(&self.state);
        }
    }

    /// Record an error that leaves the state untouched.
    fn reject(&mut self, error: CaptureError) -> CaptureError {
        log::warn!("Tap pid {}: {}", self.pid, error);
        self.error_message = Some(error.to_string());
        error
    }

    /// Enter `failed`, releasing whatever the backend still holds.
    fn fail(&mut self, error: CaptureError) -> CaptureError {
        log::error!("Tap pid {} failed: {}", self.pid, error);
        if let Some(status) = &self.status {
            status.deactivate();
        }
        if let Err(e) = self.backend.release() {
            log::error!("Release after failure: {}", e);
        }
        self.error_message = Some(error.to_string());
        if let Some(delegate) = &self.delegate {
            delegate.on_error(&error);
        }
        self.transition(TapState::Failed(error.clone()));
        error
    }
}

impl Drop for ProcessTap {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("Teardown on drop: {}", e);
        }
    }
}

impl std::fmt::Debug for ProcessTap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessTap")
            .field("backend", &self.backend.name())
            .field("pid", &self.pid)
            .field("state", &self.state)
            .field("format", &self.format)
            .finish()
    }
}
