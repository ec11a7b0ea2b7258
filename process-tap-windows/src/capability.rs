//! Windows build check for process loopback.
//!
//! `AUDIOCLIENT_ACTIVATION_TYPE_PROCESS_LOOPBACK` first shipped in build
//! 20348. Older builds fail activation with an unhelpful `E_INVALIDARG`, so
//! the build is checked up front.

use thiserror::Error;

use process_tap_core::CaptureError;

/// First Windows build with process loopback activation.
pub const MIN_PROCESS_LOOPBACK_BUILD: u32 = 20348;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("cannot read Windows build number: {0}")]
    BuildUnknown(String),

    #[error("per-process audio capture requires Windows build {required}+, this system has build {build}")]
    BuildTooOld { build: u32, required: u32 },

    #[error("per-process audio capture requires Windows")]
    NotWindows,
}

impl From<CapabilityError> for CaptureError {
    fn from(e: CapabilityError) -> Self {
        CaptureError::Unsupported(e.to_string())
    }
}

/// Parse the registry's `CurrentBuildNumber` string (UTF-16 decoded,
/// possibly NUL-terminated).
pub fn parse_build_number(raw: &str) -> Option<u32> {
    raw.trim_matches(|c: char| c == '\0' || c.is_whitespace()).parse().ok()
}

pub fn check_build(build: u32) -> Result<u32, CapabilityError> {
    if build < MIN_PROCESS_LOOPBACK_BUILD {
        return Err(CapabilityError::BuildTooOld {
            build,
            required: MIN_PROCESS_LOOPBACK_BUILD,
        });
    }
    Ok(build)
}

/// Verify that this system supports process loopback. Returns the build.
#[cfg(target_os = "windows")]
pub fn process_loopback_supported() -> Result<u32, CapabilityError> {
    let build = read_build_number()?;
    log::debug!("Windows build {}", build);
    check_build(build)
}

#[cfg(not(target_os = "windows"))]
pub fn process_loopback_supported() -> Result<u32, CapabilityError> {
    Err(CapabilityError::NotWindows)
}

#[cfg(target_os = "windows")]
fn read_build_number() -> Result<u32, CapabilityError> {
    use windows::core::w;
    use windows::Win32::System::Registry::*;

    unsafe {
        let mut hkey = HKEY::default();
        let status = RegOpenKeyExW(
            HKEY_LOCAL_MACHINE,
            w!("SOFTWARE\\Microsoft\\Windows NT\\CurrentVersion"),
            None,
            KEY_READ,
            &mut hkey,
        );
        if status.is_err() {
            return Err(CapabilityError::BuildUnknown(format!(
                "RegOpenKeyExW failed ({})",
                status.0
            )));
        }

        let mut buf = [0u16; 32];
        let mut size = std::mem::size_of_val(&buf) as u32;
        let mut kind = REG_VALUE_TYPE::default();
        let result = RegQueryValueExW(
            hkey,
            w!("CurrentBuildNumber"),
            None,
            Some(&mut kind),
            Some(buf.as_mut_ptr() as *mut u8),
            Some(&mut size),
        );
        let _ = RegCloseKey(hkey);

        if result.is_err() {
            return Err(CapabilityError::BuildUnknown(format!(
                "RegQueryValueExW failed ({})",
                result.0
            )));
        }

        let chars = (size as usize / 2).min(buf.len());
        let raw = String::from_utf16_lossy(&buf[..chars]);
        parse_build_number(&raw).ok_or_else(|| CapabilityError::BuildUnknown(format!("unparseable build {:?}", raw)))
    }
}
