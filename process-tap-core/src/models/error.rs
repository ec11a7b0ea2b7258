use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while preparing, running or tearing down a process tap.
///
/// Every OS status code is translated into one of these at the backend
/// boundary; the message is also kept as the session's last error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("invalid target process {pid}: {reason}")]
    InvalidTarget { pid: u32, reason: String },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("activation failed: {0}")]
    ActivationFailed(String),

    #[error("timed out after {0:?} waiting for audio activation")]
    Timeout(Duration),

    #[error("a capture session is already active")]
    AlreadyCapturing,

    #[error("no capture session is active")]
    NotCapturing,

    #[error("tap has not been prepared")]
    NotPrepared,

    #[error("invalid state transition: {0}")]
    InvalidState(String),

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("stream error: {0}")]
    StreamError(String),

    #[error("teardown failed: {0}")]
    TeardownFailed(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl CaptureError {
    pub fn invalid_target(pid: u32, reason: impl Into<String>) -> Self {
        Self::InvalidTarget {
            pid,
            reason: reason.into(),
        }
    }

    /// Errors raised before any OS resource was acquired.
    pub fn is_invalid_target(&self) -> bool {
        matches!(self, Self::InvalidTarget { .. })
    }
}
