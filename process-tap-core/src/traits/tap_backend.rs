use crate::models::config::TapConfiguration;
use crate::models::error::CaptureError;
use crate::models::format::AudioFormatDescriptor;
use crate::processing::delivery::PcmDelivery;

/// Platform half of a process tap.
///
/// Implemented by:
/// - `WasapiProcessTap` (Windows, process loopback activation)
/// - `CoreAudioProcessTap` (macOS, process tap + private aggregate device)
/// - [`SimulatedTap`](crate::backend::simulated::SimulatedTap) (tests)
///
/// The backend owns every native handle it acquires. [`ProcessTap`] drives
/// it through `prepare → start → stop → release` and guarantees `release`
/// runs after any failure; backends only need to make each call safe to
/// repeat.
///
/// [`ProcessTap`]: crate::session::process_tap::ProcessTap
pub trait TapBackend: Send {
    /// Short backend name for logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Verify the target process, acquire a route scoped to it and report the
    /// format the route delivers.
    ///
    /// On failure every resource acquired by this call is already released.
    fn prepare(&mut self, pid: u32, config: &TapConfiguration) -> Result<AudioFormatDescriptor, CaptureError>;

    /// Register IO delivery and start the audio clock.
    ///
    /// `delivery` is moved onto the audio thread.
    fn start(&mut self, delivery: PcmDelivery) -> Result<(), CaptureError>;

    /// Stop the clock and unregister IO delivery. When this returns no
    /// further batches reach `delivery`.
    fn stop(&mut self) -> Result<(), CaptureError>;

    /// Release the route acquired by `prepare`, in reverse acquisition order.
    fn release(&mut self) -> Result<(), CaptureError>;
}
