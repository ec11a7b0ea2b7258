//! # process-tap-core
//!
//! Platform-agnostic core for capturing the audio output of one process.
//!
//! Provides the tap lifecycle state machine, PCM format conversion, the
//! capture manager and the ownership primitives every backend builds on.
//! Platform backends (Windows WASAPI process loopback, macOS CoreAudio
//! process taps) implement the `TapBackend` trait and plug into the generic
//! `ProcessTap` / `ProcessAudioCapture`.
//!
//! ## Architecture
//!
//! ```text
//! process-tap-core (this crate)
//! ├── traits/       ← TapBackend, CaptureSession, CaptureDelegate
//! ├── models/       ← CaptureError, TapState, TapConfiguration, AudioFormatDescriptor, diagnostics
//! ├── processing/   ← FormatConverter, PcmDelivery, StreamStatus
//! ├── lifecycle/    ← Completion (bounded async wait), NativeResource (RAII handles)
//! ├── session/      ← ProcessTap (state machine), ProcessAudioCapture (manager)
//! └── backend/      ← SimulatedTap (in-process OS stand-in)
//! ```
//!
//! ## Data flow
//!
//! ```text
//! [OS audio thread] → PcmBatch (borrowed OS memory)
//!                   → FormatConverter (f32 interleaved, reused buffer)
//!                   → AudioDataCallback(samples, channels, sample_rate)
//! ```

pub mod backend;
pub mod lifecycle;
pub mod models;
pub mod processing;
pub mod session;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use backend::simulated::{PrepareStep, ResourceLedger, SimulatedPacket, SimulatedTap, SimulationScript};
pub use lifecycle::completion::{Completer, Completion};
pub use lifecycle::resource::{NativeResource, TeardownReport};
pub use models::config::{ProcessScope, TapConfiguration};
pub use models::diagnostics::CaptureDiagnostics;
pub use models::error::CaptureError;
pub use models::format::{AudioFormatDescriptor, SampleFormat, MAX_CHANNELS};
pub use models::state::TapState;
pub use processing::converter::FormatConverter;
pub use processing::delivery::{AudioDataCallback, BatchData, DeliveryOutcome, PcmBatch, PcmDelivery, StreamStats, StreamStatus};
pub use session::manager::{BackendFactory, ProcessAudioCapture};
pub use session::process_tap::ProcessTap;
pub use traits::capture_delegate::CaptureDelegate;
pub use traits::capture_session::CaptureSession;
pub use traits::tap_backend::TapBackend;
