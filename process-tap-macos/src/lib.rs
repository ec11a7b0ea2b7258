//! # process-tap-macos
//!
//! macOS CoreAudio backend for process-tap.
//!
//! Provides:
//! - `CoreAudioProcessTap`: process-scoped capture via a CoreAudio process tap
//!   wrapped in a private aggregate device
//! - `buffer_layout`: locating the tap's buffers in the aggregate's input list
//! - `capability`: macOS version check for process taps
//! - `format`: mapping from the tap's stream description to `AudioFormatDescriptor`
//! - `process_tree`: selecting the audio process objects that belong to a target
//! - `status`: `OSStatus` formatting
//!
//! ## Route
//! ```text
//! pid ──► audio process object(s) ──► process tap ──► private aggregate device
//!                                                            │
//!                                         IOProc (HAL thread) ▼
//!                                              PcmDelivery ──► callback
//! ```
//!
//! ## Platform Requirements
//! - macOS 14.4+ for `AudioHardwareCreateProcessTap`
//! - The host app needs the audio-capture TCC permission (`NSAudioCaptureUsageDescription`)
//!
//! ## Usage
//! ```ignore
//! use process_tap_core::{ProcessTap, TapConfiguration};
//! use process_tap_macos::CoreAudioProcessTap;
//!
//! let mut tap = ProcessTap::new(Box::new(CoreAudioProcessTap::new()), TapConfiguration::default());
//! tap.initialize(pid)?;
//! ```

pub mod buffer_layout;
pub mod capability;
pub mod format;
pub mod process_tree;
pub mod status;

#[cfg(target_os = "macos")]
mod aggregate;
#[cfg(target_os = "macos")]
pub mod core_audio_tap;
#[cfg(target_os = "macos")]
mod ffi;
#[cfg(target_os = "macos")]
mod io_proc;
#[cfg(target_os = "macos")]
mod process_probe;
#[cfg(target_os = "macos")]
mod properties;

pub use buffer_layout::TapBufferRange;
pub use capability::{CapabilityError, MacOsVersion, MIN_PROCESS_TAP_VERSION};
pub use format::StreamDescription;
#[cfg(target_os = "macos")]
pub use core_audio_tap::CoreAudioProcessTap;
