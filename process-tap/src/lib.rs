//! # process-tap
//!
//! Capture the audio output of one process and receive it as interleaved
//! float32 PCM.
//!
//! ```text
//! host ──► ProcessAudioCapture (one session at a time)
//!              │ BackendFactory (BackendKind::detect)
//!              ▼
//!          ProcessTap state machine
//!              │
//!     ┌────────┴─────────┐
//!     ▼                  ▼
//! WasapiProcessTap   CoreAudioProcessTap
//! (Windows 20348+)   (macOS 14.4+)
//! ```
//!
//! ## Usage
//! ```ignore
//! use std::sync::Arc;
//! use process_tap::{create_platform_capture, CaptureSession};
//!
//! let capture = create_platform_capture()?;
//! capture.start_capture(pid, Arc::new(|samples: &[f32], channels, rate| {
//!     // runs on the OS audio thread
//! }))?;
//! // ...
//! capture.stop_capture()?;
//! ```
//!
//! Without audio hardware, [`simulated_capture`] drives the same manager
//! against a scripted [`SimulatedTap`].

pub mod platform;

pub use platform::{create_backend, create_platform_capture, create_platform_capture_with, platform_factory, simulated_capture, BackendKind};

pub use process_tap_core::{
    AudioDataCallback, AudioFormatDescriptor, BackendFactory, CaptureDelegate, CaptureDiagnostics, CaptureError,
    CaptureSession, PrepareStep, ProcessAudioCapture, ProcessScope, ProcessTap, ResourceLedger, SampleFormat,
    SimulatedPacket, SimulatedTap, SimulationScript, TapBackend, TapConfiguration, TapState,
};

pub use process_tap_macos as macos;
pub use process_tap_windows as windows;
