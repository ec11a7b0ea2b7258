use crate::models::error::CaptureError;
use crate::models::state::TapState;

/// Event delegate for process tap notifications.
///
/// `on_state_changed` is called on the thread driving the session.
/// `on_error` may also be called from the OS audio thread when the stream
/// faults. Implementations should marshal to a UI thread if needed and must
/// not call back into the session.
pub trait CaptureDelegate: Send + Sync {
    /// Called when the tap state changes.
    fn on_state_changed(&self, state: &TapState);

    /// Called when an error occurs during preparation, capture or teardown.
    fn on_error(&self, error: &CaptureError);
}
