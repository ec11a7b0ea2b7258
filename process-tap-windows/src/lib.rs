//! # process-tap-windows
//!
//! Windows WASAPI backend for process-tap.
//!
//! Provides:
//! - `WasapiProcessTap`: process-scoped capture via
//!   `AUDIOCLIENT_ACTIVATION_TYPE_PROCESS_LOOPBACK`
//! - `process_probe`: target process liveness and access check
//! - `capability`: Windows build check for process loopback
//! - `wave_format`: mapping between `AudioFormatDescriptor` and `WAVEFORMATEX` fields
//!
//! ## Platform Requirements
//! - Windows 10 build 20348+ (Windows 11 / Server 2022) for process loopback
//! - Visual Studio Build Tools 2022 + Windows SDK for linking
//!
//! ## Usage
//! ```ignore
//! use process_tap_core::{ProcessTap, TapConfiguration};
//! use process_tap_windows::WasapiProcessTap;
//!
//! let mut tap = ProcessTap::new(Box::new(WasapiProcessTap::new()), TapConfiguration::default());
//! tap.initialize(pid)?;
//! ```

pub mod capability;
pub mod wave_format;

#[cfg(target_os = "windows")]
mod activation;
#[cfg(target_os = "windows")]
mod capture_thread;
#[cfg(target_os = "windows")]
mod handles;
#[cfg(target_os = "windows")]
pub mod process_probe;
#[cfg(target_os = "windows")]
pub mod wasapi_process_tap;

pub use capability::{CapabilityError, MIN_PROCESS_LOOPBACK_BUILD};
#[cfg(target_os = "windows")]
pub use wasapi_process_tap::WasapiProcessTap;
