use std::time::Duration;

use super::error::CaptureError;
use super::format::AudioFormatDescriptor;

/// Which processes a tap includes besides the target pid.
///
/// Tree inclusion is an OS capability: WASAPI process loopback always
/// includes the target's process tree, CoreAudio taps list process objects
/// explicitly and can add the target's descendants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessScope {
    /// The target process and every process it spawned.
    #[default]
    ProcessTree,
    /// Only the target process, where the OS can express that.
    SingleProcess,
}

/// Configuration for a process tap.
#[derive(Debug, Clone, PartialEq)]
pub struct TapConfiguration {
    /// Upper bound on waiting for asynchronous route activation (default: 10s).
    pub activation_timeout: Duration,

    /// Process tree inclusion policy (default: whole tree).
    pub process_scope: ProcessScope,

    /// Format requested from backends that let the client choose
    /// (default: 48 kHz stereo float32 interleaved).
    pub requested_format: AudioFormatDescriptor,

    /// OS-side buffer duration (default: 20ms).
    pub buffer_duration: Duration,

    /// Longest single wait of a capture thread before it re-checks its stop
    /// flag (default: 200ms).
    pub wake_interval: Duration,

    /// Raise the capture thread to real-time priority (default: true).
    pub elevate_thread_priority: bool,

    /// Name prefix for synthetic devices created by the tap.
    pub device_name: String,
}

impl TapConfiguration {
    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.activation_timeout.is_zero() {
            return Err(CaptureError::ConfigurationFailed(
                "activation timeout must be positive".into(),
            ));
        }
        if self.buffer_duration.is_zero() {
            return Err(CaptureError::ConfigurationFailed(
                "buffer duration must be positive".into(),
            ));
        }
        if self.wake_interval.is_zero() {
            return Err(CaptureError::ConfigurationFailed(
                "wake interval must be positive".into(),
            ));
        }
        self.requested_format.validate()?;
        if !self.requested_format.sample_format.is_supported() {
            return Err(CaptureError::ConfigurationFailed(format!(
                "unsupported requested sample format: {:?}",
                self.requested_format.sample_format
            )));
        }
        if !self.requested_format.interleaved {
            return Err(CaptureError::ConfigurationFailed(
                "requested format must be interleaved".into(),
            ));
        }
        Ok(())
    }

    /// Buffer duration in 100-nanosecond units, as WASAPI expects.
    pub fn buffer_duration_hns(&self) -> i64 {
        (self.buffer_duration.as_nanos() / 100) as i64
    }
}

impl Default for TapConfiguration {
    fn default() -> Self {
        Self {
            activation_timeout: Duration::from_secs(10),
            process_scope: ProcessScope::ProcessTree,
            requested_format: AudioFormatDescriptor::default(),
            buffer_duration: Duration::from_millis(20),
            wake_interval: Duration::from_millis(200),
            elevate_thread_priority: true,
            device_name: "Process Tap".into(),
        }
    }
}
