//! Session lifecycle against the simulated backend: exclusivity, teardown
//! ordering, delivery after stop, silence handling and repeated sessions.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use approx::assert_abs_diff_eq;
use parking_lot::Mutex;

use process_tap::{
    simulated_capture, AudioDataCallback, AudioFormatDescriptor, CaptureDelegate, CaptureError, CaptureSession,
    PrepareStep, ResourceLedger, SampleFormat, SimulatedPacket, SimulationScript, TapConfiguration, TapState,
};

const PID: u32 = 4242;

type Received = Arc<Mutex<Vec<(Vec<f32>, u16, u32)>>>;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn recorder() -> (Received, AudioDataCallback) {
    let received: Received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let callback: AudioDataCallback = Arc::new(move |samples: &[f32], channels: u16, rate: u32| {
        sink.lock().push((samples.to_vec(), channels, rate));
    });
    (received, callback)
}

fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

fn tone(frames: usize, channels: u16) -> Vec<f32> {
    (0..frames * channels as usize).map(|i| ((i % 64) as f32 / 64.0) - 0.5).collect()
}

fn streaming_script() -> SimulationScript {
    SimulationScript {
        live_pids: vec![PID],
        format: AudioFormatDescriptor::float32(48_000, 2),
        packets: vec![SimulatedPacket::from_f32(&tone(480, 2), 2)],
        packet_interval: Duration::from_millis(5),
        repeat: true,
        ..Default::default()
    }
}

#[test]
fn stop_without_session_fails_and_holds_nothing() {
    init_logging();
    let ledger = ResourceLedger::new();
    let capture = simulated_capture(streaming_script(), ledger.clone(), TapConfiguration::default());

    for _ in 0..5 {
        assert_eq!(capture.stop_capture(), Err(CaptureError::NotCapturing));
        assert!(!capture.is_capturing());
    }
    assert!(ledger.events().is_empty());

    let (_, callback) = recorder();
    capture.start_capture(PID, callback).unwrap();
    capture.stop_capture().unwrap();
    for _ in 0..5 {
        assert_eq!(capture.stop_capture(), Err(CaptureError::NotCapturing));
    }
    assert!(ledger.outstanding().is_empty());
    assert!(ledger.violations().is_empty());
    assert!(capture.last_error().is_some());
}

#[test]
fn second_start_is_rejected_and_first_keeps_delivering() {
    init_logging();
    let capture = simulated_capture(streaming_script(), ResourceLedger::new(), TapConfiguration::default());

    let (first, first_callback) = recorder();
    capture.start_capture(PID, first_callback).unwrap();
    assert!(wait_for(Duration::from_secs(2), || !first.lock().is_empty()));

    let (second, second_callback) = recorder();
    assert_eq!(capture.start_capture(PID, second_callback), Err(CaptureError::AlreadyCapturing));
    assert!(capture.is_capturing());

    let seen = first.lock().len();
    assert!(wait_for(Duration::from_secs(2), || first.lock().len() > seen));
    assert!(second.lock().is_empty());

    capture.stop_capture().unwrap();
}

#[test]
fn int16_round_trips_within_one_lsb() {
    init_logging();
    let original: Vec<i16> = (i16::MIN..=i16::MAX).collect();
    let script = SimulationScript {
        live_pids: vec![PID],
        format: AudioFormatDescriptor::new(48_000, 1, SampleFormat::Int16, true),
        packets: vec![SimulatedPacket::from_i16(&original, 1)],
        ..Default::default()
    };
    let capture = simulated_capture(script, ResourceLedger::new(), TapConfiguration::default());

    let (received, callback) = recorder();
    capture.start_capture(PID, callback).unwrap();
    assert!(wait_for(Duration::from_secs(2), || !received.lock().is_empty()));
    capture.stop_capture().unwrap();

    let batches = received.lock();
    let (samples, channels, rate) = &batches[0];
    assert_eq!((*channels, *rate), (1, 48_000));
    assert_eq!(samples.len(), original.len());
    for (&sample, &expected) in samples.iter().zip(&original) {
        assert!((-1.0..=1.0).contains(&sample));
        let back = (sample * 32768.0).round().clamp(i16::MIN as f32, i16::MAX as f32);
        assert_abs_diff_eq!(back, expected as f32, epsilon = 1.0);
    }
}

#[test]
fn float32_passes_through_exactly() {
    init_logging();
    let samples = tone(256, 2);
    let script = SimulationScript {
        live_pids: vec![PID],
        format: AudioFormatDescriptor::float32(44_100, 2),
        packets: vec![SimulatedPacket::from_f32(&samples, 2)],
        ..Default::default()
    };
    let capture = simulated_capture(script, ResourceLedger::new(), TapConfiguration::default());

    let (received, callback) = recorder();
    capture.start_capture(PID, callback).unwrap();
    assert!(wait_for(Duration::from_secs(2), || !received.lock().is_empty()));
    capture.stop_capture().unwrap();

    assert_eq!(received.lock()[0].0, samples);
}

#[test]
fn planar_input_is_interleaved() {
    init_logging();
    let left = [0.1f32, 0.2, 0.3];
    let right = [-0.1f32, -0.2, -0.3];
    let script = SimulationScript {
        live_pids: vec![PID],
        format: AudioFormatDescriptor::new(48_000, 2, SampleFormat::Float32, false),
        packets: vec![SimulatedPacket::planar_f32(&[&left, &right])],
        ..Default::default()
    };
    let capture = simulated_capture(script, ResourceLedger::new(), TapConfiguration::default());

    let (received, callback) = recorder();
    capture.start_capture(PID, callback).unwrap();
    assert!(wait_for(Duration::from_secs(2), || !received.lock().is_empty()));
    capture.stop_capture().unwrap();

    assert_eq!(received.lock()[0].0, vec![0.1, -0.1, 0.2, -0.2, 0.3, -0.3]);
}

#[test]
fn failed_prepare_releases_exactly_what_it_acquired() {
    init_logging();
    for step in PrepareStep::ALL {
        let ledger = ResourceLedger::new();
        let script = SimulationScript {
            fail_at: Some(step),
            ..streaming_script()
        };
        let capture = simulated_capture(script, ledger.clone(), TapConfiguration::default());

        let (received, callback) = recorder();
        assert!(capture.start_capture(PID, callback).is_err(), "{:?} should fail", step);
        assert!(!capture.is_capturing());
        assert!(capture.last_error().is_some_and(|e| !e.is_empty()));
        assert!(ledger.outstanding().is_empty(), "{:?} leaked {:?}", step, ledger.outstanding());
        assert!(ledger.violations().is_empty(), "{:?} double-released", step);

        let expected: &[&str] = match step {
            PrepareStep::ProcessCheck | PrepareStep::RouteCreation => &[],
            PrepareStep::FormatQuery | PrepareStep::DeviceAssembly => &["process-tap"],
        };
        assert_eq!(ledger.release_order(), expected, "{:?}", step);
        assert!(received.lock().is_empty());
        assert_eq!(capture.stop_capture(), Err(CaptureError::NotCapturing));
    }
}

#[test]
fn activation_timeout_fails_and_late_route_is_released() {
    init_logging();
    let ledger = ResourceLedger::new();
    let script = SimulationScript {
        activation_delay: Duration::from_millis(200),
        ..streaming_script()
    };
    let config = TapConfiguration {
        activation_timeout: Duration::from_millis(20),
        ..Default::default()
    };
    let capture = simulated_capture(script, ledger.clone(), config);

    let (_, callback) = recorder();
    assert_eq!(
        capture.start_capture(PID, callback),
        Err(CaptureError::Timeout(Duration::from_millis(20)))
    );
    assert!(capture.last_error().is_some_and(|e| e.contains("timed out")));

    assert!(wait_for(Duration::from_secs(2), || ledger.released_count("process-tap") == 1));
    assert!(ledger.outstanding().is_empty());
}

#[test]
fn no_callbacks_after_stop_returns() {
    init_logging();
    let script = SimulationScript {
        packet_interval: Duration::from_millis(15),
        ..streaming_script()
    };
    let capture = simulated_capture(script, ResourceLedger::new(), TapConfiguration::default());

    let calls = Arc::new(Mutex::new(0usize));
    let counter = Arc::clone(&calls);
    let callback: AudioDataCallback = Arc::new(move |_: &[f32], _: u16, _: u32| {
        // A slow consumer keeps the audio thread inside the callback.
        thread::sleep(Duration::from_millis(10));
        *counter.lock() += 1;
    });

    capture.start_capture(PID, callback).unwrap();
    assert!(wait_for(Duration::from_secs(2), || *calls.lock() >= 2));
    capture.stop_capture().unwrap();
    assert!(!capture.is_capturing());

    let after_stop = *calls.lock();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(*calls.lock(), after_stop);
}

#[test]
fn silent_batches_never_reach_the_callback() {
    init_logging();
    let samples = tone(128, 2);
    let script = SimulationScript {
        live_pids: vec![PID],
        format: AudioFormatDescriptor::float32(48_000, 2),
        packets: vec![
            SimulatedPacket::silence(128, 2),
            SimulatedPacket::silence(128, 2),
            SimulatedPacket::from_f32(&samples, 2),
        ],
        ..Default::default()
    };
    let capture = simulated_capture(script, ResourceLedger::new(), TapConfiguration::default());

    let (received, callback) = recorder();
    capture.start_capture(PID, callback).unwrap();
    assert!(wait_for(Duration::from_secs(2), || !received.lock().is_empty()));

    let diagnostics = capture.diagnostics().unwrap();
    assert_eq!(diagnostics.silent_batches_skipped, 2);
    assert_eq!(diagnostics.batches_delivered, 1);
    assert!(capture.is_capturing());
    capture.stop_capture().unwrap();

    let batches = received.lock();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].0, samples);
}

#[test]
fn live_process_delivers_then_stops_cleanly() {
    init_logging();
    let ledger = ResourceLedger::new();
    let capture = simulated_capture(streaming_script(), ledger.clone(), TapConfiguration::default());

    let (received, callback) = recorder();
    capture.start_capture(PID, callback).unwrap();
    assert!(capture.is_capturing());
    assert_eq!(capture.current_pid(), Some(PID));

    assert!(wait_for(Duration::from_secs(2), || !received.lock().is_empty()));
    {
        let batches = received.lock();
        let (samples, channels, rate) = &batches[0];
        assert!((1..=32).contains(channels));
        assert!(*rate > 0);
        assert_eq!(samples.len() % *channels as usize, 0);
    }

    capture.stop_capture().unwrap();
    assert!(!capture.is_capturing());
    assert_eq!(capture.last_error(), None);
    assert_eq!(ledger.release_order(), vec!["io-proc", "aggregate-device", "process-tap"]);
    assert!(ledger.outstanding().is_empty());
}

#[test]
fn invalid_or_exited_pid_fails_without_handles() {
    init_logging();
    let ledger = ResourceLedger::new();
    let capture = simulated_capture(streaming_script(), ledger.clone(), TapConfiguration::default());

    for pid in [0, PID + 1] {
        let (received, callback) = recorder();
        let err = capture.start_capture(pid, callback).unwrap_err();
        assert!(err.is_invalid_target(), "pid {}: {:?}", pid, err);
        assert!(capture.last_error().is_some_and(|e| !e.is_empty()));
        assert!(!capture.is_capturing());
        assert!(received.lock().is_empty());
    }
    assert!(ledger.events().is_empty());
}

#[test]
fn sequential_sessions_behave_identically() {
    init_logging();
    let samples = tone(480, 2);
    let ledger = ResourceLedger::new();
    let script = SimulationScript {
        live_pids: vec![PID],
        format: AudioFormatDescriptor::float32(48_000, 2),
        packets: vec![SimulatedPacket::from_f32(&samples, 2); 3],
        ..Default::default()
    };
    let capture = simulated_capture(script, ledger.clone(), TapConfiguration::default());

    let mut runs = Vec::new();
    for _ in 0..2 {
        let (received, callback) = recorder();
        capture.start_capture(PID, callback).unwrap();
        assert!(wait_for(Duration::from_secs(2), || received.lock().len() == 3));
        capture.stop_capture().unwrap();

        let diagnostics = capture.diagnostics().unwrap();
        assert_eq!(diagnostics.batches_delivered, 3);
        assert_eq!(diagnostics.frames_delivered, 3 * 480);
        assert_eq!(diagnostics.fault, None);
        runs.push(received.lock().clone());
    }

    assert_eq!(runs[0], runs[1]);
    assert_eq!(ledger.acquired_count("process-tap"), 2);
    assert_eq!(ledger.released_count("io-proc"), 2);
    assert!(ledger.outstanding().is_empty());
    assert!(ledger.violations().is_empty());
}

#[test]
fn terminal_stream_error_faults_session_until_restart() {
    init_logging();
    let ledger = ResourceLedger::new();
    let script = SimulationScript {
        terminal_after: Some(2),
        ..streaming_script()
    };
    let capture = simulated_capture(script, ledger.clone(), TapConfiguration::default());

    let (received, callback) = recorder();
    capture.start_capture(PID, callback).unwrap();
    assert!(wait_for(Duration::from_secs(2), || !capture.is_capturing()));
    assert!(capture.last_error().is_some_and(|e| e.contains("invalidated")));
    assert_eq!(received.lock().len(), 2);

    // The faulted session still holds its route until torn down.
    assert!(!ledger.outstanding().is_empty());
    let (_, callback) = recorder();
    capture.start_capture(PID, callback).unwrap();
    assert!(capture.is_capturing());
    capture.stop_capture().unwrap();

    assert_eq!(ledger.acquired_count("aggregate-device"), 2);
    assert!(ledger.outstanding().is_empty());
}

#[test]
fn stop_reports_clock_failure_but_still_releases() {
    init_logging();
    let ledger = ResourceLedger::new();
    let script = SimulationScript {
        fail_clock_stop: true,
        ..streaming_script()
    };
    let capture = simulated_capture(script, ledger.clone(), TapConfiguration::default());

    let (_, callback) = recorder();
    capture.start_capture(PID, callback).unwrap();
    assert!(capture.stop_capture().is_err());
    assert!(!capture.is_capturing());
    assert!(capture.last_error().is_some_and(|e| e.contains("clock stop")));
    assert!(ledger.outstanding().is_empty());
}

#[derive(Default)]
struct StateLog {
    states: Mutex<Vec<&'static str>>,
    errors: Mutex<Vec<String>>,
}

impl CaptureDelegate for StateLog {
    fn on_state_changed(&self, state: &TapState) {
        self.states.lock().push(state.name());
    }

    fn on_error(&self, error: &CaptureError) {
        self.errors.lock().push(error.to_string());
    }
}

#[test]
fn delegate_sees_every_transition() {
    init_logging();
    let log = Arc::new(StateLog::default());
    let capture = simulated_capture(streaming_script(), ResourceLedger::new(), TapConfiguration::default())
        .with_delegate(Arc::clone(&log) as Arc<dyn CaptureDelegate>);

    let (_, callback) = recorder();
    capture.start_capture(PID, callback).unwrap();
    capture.stop_capture().unwrap();

    let (_, callback) = recorder();
    assert!(capture.start_capture(0, callback).is_err());

    let states = log.states.lock().clone();
    assert_eq!(states, vec!["prepared", "capturing", "stopped", "failed"]);
    assert_eq!(log.errors.lock().len(), 1);
}
