//! In-process stand-in for an OS process tap.
//!
//! `SimulatedTap` walks the same steps as the platform backends (process
//! check, asynchronous route activation, format query, device assembly, IO
//! registration) and records every native-like acquisition and release in a
//! [`ResourceLedger`]. Any step can be made to fail, so lifecycle guarantees
//! can be checked without audio hardware.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::lifecycle::completion::Completion;
use crate::lifecycle::resource::{NativeResource, TeardownReport};
use crate::models::config::TapConfiguration;
use crate::models::error::CaptureError;
use crate::models::format::{AudioFormatDescriptor, SampleFormat};
use crate::processing::delivery::{PcmBatch, PcmDelivery};
use crate::traits::tap_backend::TapBackend;

pub const PROCESS_TAP: &str = "process-tap";
pub const AGGREGATE_DEVICE: &str = "aggregate-device";
pub const IO_PROC: &str = "io-proc";

/// Steps of `prepare`, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareStep {
    ProcessCheck,
    RouteCreation,
    FormatQuery,
    DeviceAssembly,
}

impl PrepareStep {
    pub const ALL: [PrepareStep; 4] = [
        PrepareStep::ProcessCheck,
        PrepareStep::RouteCreation,
        PrepareStep::FormatQuery,
        PrepareStep::DeviceAssembly,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerEvent {
    Acquired(&'static str),
    Released(&'static str),
}

/// Shared record of simulated resource acquisitions and releases.
#[derive(Debug, Clone, Default)]
pub struct ResourceLedger {
    events: Arc<Mutex<Vec<LedgerEvent>>>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn acquire(&self, label: &'static str) -> NativeResource<u32> {
        let id = {
            let mut events = self.events.lock();
            events.push(LedgerEvent::Acquired(label));
            events.len() as u32
        };
        let events = Arc::clone(&self.events);
        NativeResource::new(label, id, move |_| {
            events.lock().push(LedgerEvent::Released(label));
            Ok(())
        })
    }

    pub fn events(&self) -> Vec<LedgerEvent> {
        self.events.lock().clone()
    }

    pub fn acquired_count(&self, label: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| matches!(event, LedgerEvent::Acquired(l) if *l == label))
            .count()
    }

    pub fn released_count(&self, label: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| matches!(event, LedgerEvent::Released(l) if *l == label))
            .count()
    }

    /// Resources acquired and not yet released, most recent last.
    pub fn outstanding(&self) -> Vec<&'static str> {
        let mut held = Vec::new();
        for event in self.events.lock().iter() {
            match *event {
                LedgerEvent::Acquired(label) => held.push(label),
                LedgerEvent::Released(label) => {
                    if let Some(pos) = held.iter().rposition(|l| *l == label) {
                        held.remove(pos);
                    }
                }
            }
        }
        held
    }

    /// Releases without a matching acquisition (double releases).
    pub fn violations(&self) -> Vec<&'static str> {
        let mut held: Vec<&'static str> = Vec::new();
        let mut violations = Vec::new();
        for event in self.events.lock().iter() {
            match *event {
                LedgerEvent::Acquired(label) => held.push(label),
                LedgerEvent::Released(label) => match held.iter().rposition(|l| *l == label) {
                    Some(pos) => {
                        held.remove(pos);
                    }
                    None => violations.push(label),
                },
            }
        }
        violations
    }

    /// Labels in the order they were released.
    pub fn release_order(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                LedgerEvent::Released(label) => Some(*label),
                LedgerEvent::Acquired(_) => None,
            })
            .collect()
    }
}

/// One batch the simulated OS hands to the IO callback.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedPacket {
    pub frames: usize,
    pub planes: Vec<Vec<u8>>,
    pub silent: bool,
}

impl SimulatedPacket {
    /// Interleaved float32 samples.
    pub fn from_f32(samples: &[f32], channels: u16) -> Self {
        Self {
            frames: samples.len() / channels.max(1) as usize,
            planes: vec![samples.iter().flat_map(|s| s.to_ne_bytes()).collect()],
            silent: false,
        }
    }

    /// Interleaved int16 samples.
    pub fn from_i16(samples: &[i16], channels: u16) -> Self {
        Self {
            frames: samples.len() / channels.max(1) as usize,
            planes: vec![samples.iter().flat_map(|s| s.to_ne_bytes()).collect()],
            silent: false,
        }
    }

    /// Planar float32, one slice per channel.
    pub fn planar_f32(channels: &[&[f32]]) -> Self {
        Self {
            frames: channels.iter().map(|c| c.len()).min().unwrap_or(0),
            planes: channels
                .iter()
                .map(|c| c.iter().flat_map(|s| s.to_ne_bytes()).collect())
                .collect(),
            silent: false,
        }
    }

    /// A silence-flagged batch of `frames` zeroed float32 frames.
    pub fn silence(frames: usize, channels: u16) -> Self {
        Self {
            frames,
            planes: vec![vec![0; frames * channels as usize * 4]],
            silent: true,
        }
    }
}

/// Behavior of one simulated tap.
#[derive(Debug, Clone)]
pub struct SimulationScript {
    /// Pids the simulated OS reports as running.
    pub live_pids: Vec<u32>,
    pub format: AudioFormatDescriptor,
    pub packets: Vec<SimulatedPacket>,
    pub packet_interval: Duration,
    /// Cycle through `packets` until stopped.
    pub repeat: bool,
    /// Delay before the asynchronous activation completes.
    pub activation_delay: Duration,
    pub fail_at: Option<PrepareStep>,
    /// Make stopping the audio clock report an error.
    pub fail_clock_stop: bool,
    /// Report the device as invalidated after this many packets.
    pub terminal_after: Option<usize>,
}

impl Default for SimulationScript {
    fn default() -> Self {
        Self {
            live_pids: Vec::new(),
            format: AudioFormatDescriptor::default(),
            packets: Vec::new(),
            packet_interval: Duration::from_millis(10),
            repeat: false,
            activation_delay: Duration::ZERO,
            fail_at: None,
            fail_clock_stop: false,
            terminal_after: None,
        }
    }
}

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    fn stop(&self) {
        *self.stopped.lock() = true;
        self.wake.notify_all();
    }

    /// Wait up to `timeout`; returns `true` once stop was requested.
    fn wait(&self, timeout: Duration) -> bool {
        let mut stopped = self.stopped.lock();
        if !*stopped {
            let _ = self.wake.wait_for(&mut stopped, timeout);
        }
        *stopped
    }
}

// Declaration order is release order.
struct SimulatedRoute {
    device: NativeResource<u32>,
    tap: NativeResource<u32>,
}

struct IoRegistration {
    signal: Arc<StopSignal>,
    thread: JoinHandle<()>,
    io_proc: NativeResource<u32>,
}

/// [`TapBackend`] driven by a [`SimulationScript`].
pub struct SimulatedTap {
    script: SimulationScript,
    ledger: ResourceLedger,
    route: Option<SimulatedRoute>,
    io: Option<IoRegistration>,
}

impl SimulatedTap {
    pub fn new(script: SimulationScript) -> Self {
        Self::with_ledger(script, ResourceLedger::new())
    }

    /// Record into an existing ledger, so several sessions can be audited
    /// together.
    pub fn with_ledger(script: SimulationScript, ledger: ResourceLedger) -> Self {
        Self {
            script,
            ledger,
            route: None,
            io: None,
        }
    }

    pub fn ledger(&self) -> ResourceLedger {
        self.ledger.clone()
    }

    fn injected(&self, step: PrepareStep) -> bool {
        self.script.fail_at == Some(step)
    }

    fn activate_route(&self, timeout: Duration) -> Result<NativeResource<u32>, CaptureError> {
        let (completion, completer) = Completion::new();
        let ledger = self.ledger.clone();
        let delay = self.script.activation_delay;
        let fail = self.injected(PrepareStep::RouteCreation);

        thread::Builder::new()
            .name("process-tap-sim-activation".into())
            .spawn(move || {
                thread::sleep(delay);
                let result = if fail {
                    Err(CaptureError::ActivationFailed("route creation refused (simulated)".into()))
                } else {
                    Ok(ledger.acquire(PROCESS_TAP))
                };
                completer.complete(result);
            })
            .map_err(|e| CaptureError::ActivationFailed(format!("failed to spawn activation thread: {}", e)))?;

        completion
            .wait_timeout(timeout)
            .unwrap_or(Err(CaptureError::Timeout(timeout)))
    }
}

impl TapBackend for SimulatedTap {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn prepare(&mut self, pid: u32, config: &TapConfiguration) -> Result<AudioFormatDescriptor, CaptureError> {
        if self.route.is_some() {
            return Err(CaptureError::InvalidState("route already prepared".into()));
        }

        if !self.script.live_pids.contains(&pid) {
            return Err(CaptureError::invalid_target(pid, "process not found"));
        }
        if self.injected(PrepareStep::ProcessCheck) {
            return Err(CaptureError::PermissionDenied(format!(
                "access to process {} denied (simulated)",
                pid
            )));
        }

        let tap = self.activate_route(config.activation_timeout)?;

        if self.injected(PrepareStep::FormatQuery) {
            return Err(CaptureError::ConfigurationFailed("format query failed (simulated)".into()));
        }
        let format = self.script.format;
        format.validate()?;

        if self.injected(PrepareStep::DeviceAssembly) {
            return Err(CaptureError::ActivationFailed("device assembly failed (simulated)".into()));
        }
        let device = self.ledger.acquire(AGGREGATE_DEVICE);

        self.route = Some(SimulatedRoute { device, tap });
        Ok(format)
    }

    fn start(&mut self, mut delivery: PcmDelivery) -> Result<(), CaptureError> {
        if self.route.is_none() {
            return Err(CaptureError::NotPrepared);
        }
        if self.io.is_some() {
            return Err(CaptureError::AlreadyCapturing);
        }

        let io_proc = self.ledger.acquire(IO_PROC);
        let signal = Arc::new(StopSignal::default());
        let thread_signal = Arc::clone(&signal);
        let packets = self.script.packets.clone();
        let interval = self.script.packet_interval;
        let repeat = self.script.repeat;
        let terminal_after = self.script.terminal_after;

        let thread = thread::Builder::new()
            .name("process-tap-sim-io".into())
            .spawn(move || {
                if packets.is_empty() {
                    while !thread_signal.wait(Duration::from_secs(1)) {}
                    return;
                }
                let mut sent = 0usize;
                let mut planes: Vec<&[u8]> = Vec::with_capacity(32);
                'outer: loop {
                    for packet in &packets {
                        if thread_signal.wait(interval) || !delivery.is_active() {
                            break 'outer;
                        }
                        planes.clear();
                        planes.extend(packet.planes.iter().map(Vec::as_slice));
                        let batch = if planes.len() == 1 {
                            PcmBatch::interleaved(planes[0], packet.frames)
                        } else {
                            PcmBatch::planar(&planes, packet.frames)
                        };
                        delivery.deliver(batch.silent(packet.silent));
                        sent += 1;
                        if terminal_after == Some(sent) {
                            delivery.fail("audio device invalidated (simulated)");
                            break 'outer;
                        }
                    }
                    if !repeat {
                        break;
                    }
                }
            })
            .map_err(|e| CaptureError::StreamError(format!("failed to spawn IO thread: {}", e)))?;

        self.io = Some(IoRegistration {
            signal,
            thread,
            io_proc,
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        let Some(io) = self.io.take() else {
            return Ok(());
        };

        io.signal.stop();
        if io.thread.join().is_err() {
            log::error!("Simulated IO thread panicked");
        }

        let mut report = TeardownReport::new();
        if self.script.fail_clock_stop {
            report.record(Err(CaptureError::StreamError("audio clock stop failed (simulated)".into())));
        }
        report.record(io.io_proc.release());
        report.finish()
    }

    fn release(&mut self) -> Result<(), CaptureError> {
        let Some(route) = self.route.take() else {
            return Ok(());
        };
        let mut report = TeardownReport::new();
        report.record(route.device.release());
        report.record(route.tap.release());
        report.finish()
    }
}

impl Drop for SimulatedTap {
    fn drop(&mut self) {
        if let Err(e) = self.stop().and(self.release()) {
            log::error!("Simulated tap teardown on drop: {}", e);
        }
    }
}

/// Interleaved int16, as a route without client-side conversion reports it.
pub fn int16_format(sample_rate: u32, channels: u16) -> AudioFormatDescriptor {
    AudioFormatDescriptor::new(sample_rate, channels, SampleFormat::Int16, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::delivery::{AudioDataCallback, StreamStatus};

    fn delivery(format: AudioFormatDescriptor, received: Arc<Mutex<Vec<Vec<f32>>>>) -> PcmDelivery {
        let callback: AudioDataCallback = Arc::new(move |samples: &[f32], _: u16, _: u32| {
            received.lock().push(samples.to_vec());
        });
        let status = Arc::new(StreamStatus::new(None));
        status.activate();
        PcmDelivery::new(format, callback, status)
    }

    #[test]
    fn unknown_pid_acquires_nothing() {
        let mut tap = SimulatedTap::new(SimulationScript::default());
        let err = tap.prepare(77, &TapConfiguration::default()).unwrap_err();
        assert!(err.is_invalid_target());
        assert!(tap.ledger().events().is_empty());
    }

    #[test]
    fn release_runs_in_reverse_acquisition_order() {
        let mut tap = SimulatedTap::new(SimulationScript {
            live_pids: vec![1],
            ..Default::default()
        });
        let format = tap.prepare(1, &TapConfiguration::default()).unwrap();
        tap.start(delivery(format, Arc::default())).unwrap();
        tap.stop().unwrap();
        tap.release().unwrap();

        let ledger = tap.ledger();
        assert_eq!(ledger.release_order(), vec![IO_PROC, AGGREGATE_DEVICE, PROCESS_TAP]);
        assert!(ledger.outstanding().is_empty());
    }

    #[test]
    fn activation_timeout_is_a_failure_and_late_route_is_released() {
        let mut tap = SimulatedTap::new(SimulationScript {
            live_pids: vec![1],
            activation_delay: Duration::from_millis(100),
            ..Default::default()
        });
        let config = TapConfiguration {
            activation_timeout: Duration::from_millis(10),
            ..Default::default()
        };
        assert_eq!(
            tap.prepare(1, &config),
            Err(CaptureError::Timeout(Duration::from_millis(10)))
        );

        let ledger = tap.ledger();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while ledger.released_count(PROCESS_TAP) == 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(ledger.acquired_count(PROCESS_TAP), 1);
        assert!(ledger.outstanding().is_empty());
    }

    #[test]
    fn packets_are_delivered_in_order() {
        let mut tap = SimulatedTap::new(SimulationScript {
            live_pids: vec![1],
            format: int16_format(44100, 1),
            packets: vec![
                SimulatedPacket::from_i16(&[16384], 1),
                SimulatedPacket::from_i16(&[-16384], 1),
                SimulatedPacket::from_i16(&[0], 1),
            ],
            packet_interval: Duration::from_millis(1),
            ..Default::default()
        });
        let format = tap.prepare(1, &TapConfiguration::default()).unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        tap.start(delivery(format, Arc::clone(&received))).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while received.lock().len() < 3 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        tap.stop().unwrap();
        assert_eq!(*received.lock(), vec![vec![0.5], vec![-0.5], vec![0.0]]);
    }
}
