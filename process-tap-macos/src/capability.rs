//! macOS version check for process taps.
//!
//! `AudioHardwareCreateProcessTap` exists from macOS 14.2 but only works
//! reliably from 14.4, where the tap format and aggregate auto-start settled.
//! On older systems the symbol lookup itself may fail at load time, so the
//! version is checked before anything touches the tap API.

use std::fmt;

use thiserror::Error;

use process_tap_core::CaptureError;

/// First macOS release with usable process taps.
pub const MIN_PROCESS_TAP_VERSION: MacOsVersion = MacOsVersion {
    major: 14,
    minor: 4,
    patch: 0,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MacOsVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl MacOsVersion {
    /// Parse `"14"`, `"14.4"` or `"14.4.1"`. Missing components are zero.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim_matches(|c: char| c == '\0' || c.is_whitespace());
        let mut parts = raw.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = match parts.next() {
            Some(p) => p.parse().ok()?,
            None => 0,
        };
        let patch = match parts.next() {
            Some(p) => p.parse().ok()?,
            None => 0,
        };
        if parts.next().is_some() {
            return None;
        }
        Some(Self { major, minor, patch })
    }
}

impl fmt::Display for MacOsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("cannot read macOS version: {0}")]
    VersionUnknown(String),

    #[error("per-process audio capture requires macOS {required}+, this system runs {version}")]
    VersionTooOld { version: MacOsVersion, required: MacOsVersion },

    #[error("per-process audio capture requires macOS")]
    NotMacOs,
}

impl From<CapabilityError> for CaptureError {
    fn from(e: CapabilityError) -> Self {
        CaptureError::Unsupported(e.to_string())
    }
}

pub fn check_version(version: MacOsVersion) -> Result<MacOsVersion, CapabilityError> {
    if version < MIN_PROCESS_TAP_VERSION {
        return Err(CapabilityError::VersionTooOld {
            version,
            required: MIN_PROCESS_TAP_VERSION,
        });
    }
    Ok(version)
}

/// Verify that this system supports process taps. Returns the version.
#[cfg(target_os = "macos")]
pub fn process_tap_supported() -> Result<MacOsVersion, CapabilityError> {
    let raw = read_product_version()?;
    let version = MacOsVersion::parse(&raw)
        .ok_or_else(|| CapabilityError::VersionUnknown(format!("unparseable version {:?}", raw)))?;
    log::debug!("macOS {}", version);
    check_version(version)
}

#[cfg(not(target_os = "macos"))]
pub fn process_tap_supported() -> Result<MacOsVersion, CapabilityError> {
    Err(CapabilityError::NotMacOs)
}

#[cfg(target_os = "macos")]
fn read_product_version() -> Result<String, CapabilityError> {
    let name = c"kern.osproductversion";
    let mut buf = [0u8; 32];
    let mut len = buf.len();
    let rc = unsafe {
        libc::sysctlbyname(
            name.as_ptr(),
            buf.as_mut_ptr() as *mut libc::c_void,
            &mut len,
            std::ptr::null_mut(),
            0,
        )
    };
    if rc != 0 {
        return Err(CapabilityError::VersionUnknown(format!(
            "sysctl kern.osproductversion failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    let len = len.min(buf.len());
    Ok(String::from_utf8_lossy(&buf[..len]).into_owned())
}
