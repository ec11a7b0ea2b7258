use crate::models::error::CaptureError;
use crate::processing::delivery::AudioDataCallback;

/// Public capture contract: one process at a time, PCM through a callback.
///
/// All methods take `&self` and may be called from any thread. Start and
/// stop are expected to be serialized by the caller; `is_capturing` may run
/// concurrently with either.
pub trait CaptureSession: Send + Sync {
    /// Start capturing the audio output of `pid`.
    ///
    /// Fails fast with [`CaptureError::AlreadyCapturing`] while a capture is
    /// active. Returns once the audio clock is running; `callback` then fires
    /// zero or more times on the audio thread until [`stop_capture`].
    ///
    /// [`stop_capture`]: CaptureSession::stop_capture
    fn start_capture(&self, pid: u32, callback: AudioDataCallback) -> Result<(), CaptureError>;

    /// Stop capturing and release every native resource.
    ///
    /// Fails with [`CaptureError::NotCapturing`] when there is nothing to
    /// stop. An OS failure while stopping is reported, but teardown still
    /// completes.
    fn stop_capture(&self) -> Result<(), CaptureError>;

    /// Whether audio is currently being delivered.
    fn is_capturing(&self) -> bool;

    /// Message of the most recent failure, if any.
    fn last_error(&self) -> Option<String>;
}
