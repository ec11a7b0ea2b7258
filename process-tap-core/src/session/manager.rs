use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::config::TapConfiguration;
use crate::models::diagnostics::CaptureDiagnostics;
use crate::models::error::CaptureError;
use crate::processing::delivery::{AudioDataCallback, StreamStatus};
use crate::session::process_tap::ProcessTap;
use crate::traits::capture_delegate::CaptureDelegate;
use crate::traits::capture_session::CaptureSession;
use crate::traits::tap_backend::TapBackend;

/// Creates a fresh backend for every capture session.
pub type BackendFactory = Box<dyn Fn() -> Result<Box<dyn TapBackend>, CaptureError> + Send + Sync>;

/// Capture manager: at most one [`ProcessTap`] in flight.
///
/// A second start while capturing fails instead of queueing. A session whose
/// stream faulted on its own (device invalidated, audio service gone) no
/// longer counts as capturing; it is torn down by `stop_capture` or by the
/// next `start_capture`.
pub struct ProcessAudioCapture {
    factory: BackendFactory,
    config: TapConfiguration,
    delegate: Option<Arc<dyn CaptureDelegate>>,
    session: Mutex<Option<ProcessTap>>,
    // Short-lived lock so `is_capturing` never waits on a start or stop.
    active: Mutex<Option<Arc<StreamStatus>>>,
    last_error: Mutex<Option<String>>,
}

impl ProcessAudioCapture {
    pub fn new(factory: BackendFactory, config: TapConfiguration) -> Self {
        Self {
            factory,
            config,
            delegate: None,
            session: Mutex::new(None),
            active: Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }

    pub fn with_delegate(mut self, delegate: Arc<dyn CaptureDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    pub fn config(&self) -> &TapConfiguration {
        &self.config
    }

    /// Snapshot of the current or most recently stopped session.
    pub fn diagnostics(&self) -> Option<CaptureDiagnostics> {
        self.session.lock().as_ref().map(ProcessTap::diagnostics)
    }

    /// Pid of the session currently held, capturing or faulted.
    pub fn current_pid(&self) -> Option<u32> {
        self.session.lock().as_ref().map(ProcessTap::pid)
    }

    fn record_error(&self, error: &CaptureError) {
        *self.last_error.lock() = Some(error.to_string());
    }

    fn launch(&self, pid: u32, callback: AudioDataCallback) -> Result<ProcessTap, CaptureError> {
        let backend = (self.factory)()?;
        let mut tap = ProcessTap::new(backend, self.config.clone());
        if let Some(delegate) = &self.delegate {
            tap = tap.with_delegate(Arc::clone(delegate));
        }
        tap.initialize(pid)?;
        tap.start(callback)?;
        Ok(tap)
    }
}

impl CaptureSession for ProcessAudioCapture {
    fn start_capture(&self, pid: u32, callback: AudioDataCallback) -> Result<(), CaptureError> {
        let mut session = self.session.lock();

        if let Some(previous) = session.as_mut() {
            if previous.is_capturing() {
                let err = CaptureError::AlreadyCapturing;
                log::warn!("Start for pid {} rejected: pid {} is still capturing", pid, previous.pid());
                return Err(err);
            }
            if let Some(fault) = previous.fault() {
                log::info!("Tearing down faulted session for pid {} before restart: {}", previous.pid(), fault);
            }
            *self.active.lock() = None;
            if let Err(e) = previous.stop() {
                log::warn!("Teardown of previous session: {}", e);
            }
        }
        *session = None;

        match self.launch(pid, callback) {
            Ok(tap) => {
                *self.active.lock() = tap.status();
                *session = Some(tap);
                *self.last_error.lock() = None;
                Ok(())
            }
            Err(e) => {
                self.record_error(&e);
                Err(e)
            }
        }
    }

    fn stop_capture(&self) -> Result<(), CaptureError> {
        let mut session = self.session.lock();

        let Some(tap) = session.as_mut().filter(|tap| tap.state().holds_resources()) else {
            let err = CaptureError::NotCapturing;
            self.record_error(&err);
            return Err(err);
        };

        *self.active.lock() = None;
        let fault = tap.fault();
        let result = tap.stop();

        match &result {
            Err(e) => self.record_error(e),
            Ok(()) => {
                if let Some(fault) = fault {
                    *self.last_error.lock() = Some(fault);
                }
            }
        }
        result
    }

    fn is_capturing(&self) -> bool {
        self.active.lock().as_ref().is_some_and(|status| status.is_active())
    }

    fn last_error(&self) -> Option<String> {
        if let Some(message) = self.last_error.lock().clone() {
            return Some(message);
        }
        self.active.lock().as_ref().and_then(|status| status.fault())
    }
}

impl Drop for ProcessAudioCapture {
    fn drop(&mut self) {
        *self.active.get_mut() = None;
        if let Some(mut tap) = self.session.get_mut().take() {
            if let Err(e) = tap.stop() {
                log::error!("Teardown on drop: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::backend::simulated::{ResourceLedger, SimulatedPacket, SimulatedTap, SimulationScript};

    const PID: u32 = 1234;

    fn manager(script: SimulationScript) -> (ProcessAudioCapture, ResourceLedger) {
        let ledger = ResourceLedger::new();
        let factory_ledger = ledger.clone();
        let factory: BackendFactory = Box::new(move || {
            Ok(Box::new(SimulatedTap::with_ledger(script.clone(), factory_ledger.clone())) as Box<dyn TapBackend>)
        });
        (ProcessAudioCapture::new(factory, TapConfiguration::default()), ledger)
    }

    fn script() -> SimulationScript {
        SimulationScript {
            live_pids: vec![PID],
            packets: vec![SimulatedPacket::from_f32(&[0.1, 0.2], 2)],
            packet_interval: Duration::from_millis(2),
            repeat: true,
            ..Default::default()
        }
    }

    fn noop() -> AudioDataCallback {
        Arc::new(|_: &[f32], _: u16, _: u32| {})
    }

    #[test]
    fn stop_without_session_fails() {
        let (capture, ledger) = manager(script());
        assert_eq!(capture.stop_capture(), Err(CaptureError::NotCapturing));
        assert!(capture.last_error().is_some());
        assert!(ledger.events().is_empty());
    }

    #[test]
    fn start_failure_leaves_manager_idle() {
        let (capture, ledger) = manager(script());
        assert!(capture.start_capture(999, noop()).is_err());
        assert!(!capture.is_capturing());
        assert!(capture.last_error().unwrap().contains("999"));
        assert!(ledger.outstanding().is_empty());
        assert_eq!(capture.stop_capture(), Err(CaptureError::NotCapturing));
    }

    #[test]
    fn successful_start_clears_previous_error() {
        let (capture, _ledger) = manager(script());
        let _ = capture.stop_capture();
        capture.start_capture(PID, noop()).unwrap();
        assert!(capture.last_error().is_none());
        assert_eq!(capture.current_pid(), Some(PID));
        capture.stop_capture().unwrap();
    }

    #[test]
    fn faulted_session_is_replaced_on_next_start() {
        let (capture, ledger) = manager(SimulationScript {
            terminal_after: Some(1),
            ..script()
        });
        capture.start_capture(PID, noop()).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while capture.is_capturing() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!capture.is_capturing());
        assert!(capture.last_error().is_some());

        capture.start_capture(PID, noop()).unwrap();
        assert_eq!(ledger.acquired_count("process-tap"), 2);
        assert_eq!(ledger.released_count("process-tap"), 1);

        drop(capture);
        assert!(ledger.outstanding().is_empty());
    }

    #[test]
    fn stopped_session_is_replaced_without_fault() {
        let (capture, ledger) = manager(script());
        capture.start_capture(PID, noop()).unwrap();
        capture.stop_capture().unwrap();
        assert!(capture.session.lock().as_ref().is_some_and(|tap| tap.fault().is_none()));

        capture.start_capture(PID, noop()).unwrap();
        assert!(capture.last_error().is_none());
        assert_eq!(ledger.released_count("process-tap"), 1);
        capture.stop_capture().unwrap();
    }

    #[test]
    fn rejected_second_start_keeps_last_error() {
        let (capture, _ledger) = manager(script());
        capture.start_capture(PID, noop()).unwrap();
        *capture.last_error.lock() = Some("earlier stream error".into());

        assert_eq!(capture.start_capture(PID, noop()), Err(CaptureError::AlreadyCapturing));
        assert_eq!(capture.last_error().as_deref(), Some("earlier stream error"));
        assert!(capture.is_capturing());
        capture.stop_capture().unwrap();
    }

    #[test]
    fn factory_error_is_recorded() {
        let factory: BackendFactory = Box::new(|| Err(CaptureError::Unsupported("no backend".into())));
        let capture = ProcessAudioCapture::new(factory, TapConfiguration::default());
        assert_eq!(
            capture.start_capture(PID, noop()),
            Err(CaptureError::Unsupported("no backend".into()))
        );
        assert_eq!(capture.last_error().as_deref(), Some("unsupported: no backend"));
    }
}
