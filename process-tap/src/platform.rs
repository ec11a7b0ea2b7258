//! Capability-keyed backend selection.

use std::fmt;

use process_tap_core::{
    BackendFactory, CaptureError, ProcessAudioCapture, ResourceLedger, SimulatedTap, SimulationScript, TapBackend,
    TapConfiguration,
};

/// The OS mechanisms a process tap can be built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// WASAPI process-loopback activation.
    Wasapi,
    /// CoreAudio process tap read through a private aggregate device.
    CoreAudio,
}

impl BackendKind {
    /// The backend this system supports, after checking the OS version.
    #[cfg(target_os = "windows")]
    pub fn detect() -> Result<Self, CaptureError> {
        let build = process_tap_windows::capability::process_loopback_supported()?;
        log::debug!("Process loopback available on build {}", build);
        Ok(Self::Wasapi)
    }

    /// The backend this system supports, after checking the OS version.
    #[cfg(target_os = "macos")]
    pub fn detect() -> Result<Self, CaptureError> {
        let version = process_tap_macos::capability::process_tap_supported()?;
        log::debug!("Process taps available on macOS {}", version);
        Ok(Self::CoreAudio)
    }

    /// The backend this system supports, after checking the OS version.
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    pub fn detect() -> Result<Self, CaptureError> {
        Err(CaptureError::Unsupported(format!(
            "no process audio capture backend for {}",
            std::env::consts::OS
        )))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Wasapi => "wasapi",
            Self::CoreAudio => "coreaudio",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn unavailable(kind: BackendKind) -> CaptureError {
    CaptureError::Unsupported(format!("{} backend is not available on {}", kind, std::env::consts::OS))
}

/// A fresh, unprepared backend of `kind`.
pub fn create_backend(kind: BackendKind) -> Result<Box<dyn TapBackend>, CaptureError> {
    match kind {
        #[cfg(target_os = "windows")]
        BackendKind::Wasapi => Ok(Box::new(process_tap_windows::WasapiProcessTap::new())),
        #[cfg(target_os = "macos")]
        BackendKind::CoreAudio => Ok(Box::new(process_tap_macos::CoreAudioProcessTap::new())),
        #[allow(unreachable_patterns)]
        other => Err(unavailable(other)),
    }
}

/// Factory producing the detected backend for every session.
pub fn platform_factory() -> Result<BackendFactory, CaptureError> {
    let kind = BackendKind::detect()?;
    log::info!("Using {} process tap backend", kind);
    Ok(Box::new(move || create_backend(kind)))
}

/// Capture manager on this platform's backend with default configuration.
pub fn create_platform_capture() -> Result<ProcessAudioCapture, CaptureError> {
    create_platform_capture_with(TapConfiguration::default())
}

pub fn create_platform_capture_with(config: TapConfiguration) -> Result<ProcessAudioCapture, CaptureError> {
    config.validate()?;
    Ok(ProcessAudioCapture::new(platform_factory()?, config))
}

/// Capture manager whose sessions run on [`SimulatedTap`]s following
/// `script`, all recording into `ledger`.
pub fn simulated_capture(script: SimulationScript, ledger: ResourceLedger, config: TapConfiguration) -> ProcessAudioCapture {
    let factory: BackendFactory = Box::new(move || {
        Ok(Box::new(SimulatedTap::with_ledger(script.clone(), ledger.clone())) as Box<dyn TapBackend>)
    });
    ProcessAudioCapture::new(factory, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names() {
        assert_eq!(BackendKind::Wasapi.to_string(), "wasapi");
        assert_eq!(BackendKind::CoreAudio.name(), "coreaudio");
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    #[test]
    fn unsupported_platform_has_no_backend() {
        assert!(matches!(BackendKind::detect(), Err(CaptureError::Unsupported(_))));
        assert!(matches!(create_backend(BackendKind::Wasapi), Err(CaptureError::Unsupported(_))));
        assert!(matches!(create_backend(BackendKind::CoreAudio), Err(CaptureError::Unsupported(_))));
        assert!(create_platform_capture().is_err());
    }

    #[cfg(target_os = "windows")]
    #[test]
    fn coreaudio_is_unavailable_on_windows() {
        assert!(matches!(create_backend(BackendKind::CoreAudio), Err(CaptureError::Unsupported(_))));
    }

    #[cfg(target_os = "macos")]
    #[test]
    fn wasapi_is_unavailable_on_macos() {
        assert!(matches!(create_backend(BackendKind::Wasapi), Err(CaptureError::Unsupported(_))));
    }

    #[test]
    fn invalid_configuration_is_rejected_before_detection() {
        let config = TapConfiguration {
            activation_timeout: std::time::Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(
            create_platform_capture_with(config),
            Err(CaptureError::ConfigurationFailed(_))
        ));
    }

    #[test]
    fn simulated_capture_uses_simulated_backend() {
        use process_tap_core::CaptureSession;
        use std::sync::Arc;

        let script = SimulationScript {
            live_pids: vec![42],
            ..Default::default()
        };
        let capture = simulated_capture(script, ResourceLedger::new(), TapConfiguration::default());
        capture.start_capture(42, Arc::new(|_: &[f32], _: u16, _: u32| {})).unwrap();
        assert_eq!(capture.diagnostics().unwrap().backend, "simulated");
        capture.stop_capture().unwrap();
    }
}
