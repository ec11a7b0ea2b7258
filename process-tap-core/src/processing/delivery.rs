use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::error::CaptureError;
use crate::models::format::AudioFormatDescriptor;
use crate::processing::converter::FormatConverter;
use crate::traits::capture_delegate::CaptureDelegate;

/// Callback invoked for every delivered batch.
///
/// Parameters:
/// - `samples`: Interleaved f32 samples in [-1.0, 1.0]. Valid only for the call.
/// - `channels`: Number of interleaved channels (1..=32).
/// - `sample_rate`: Sample rate of the session in Hz.
///
/// Fires on the OS audio thread; keep processing minimal.
pub type AudioDataCallback = Arc<dyn Fn(&[f32], u16, u32) + Send + Sync + 'static>;

/// Layout of the bytes in one OS batch.
#[derive(Debug, Clone, Copy)]
pub enum BatchData<'a> {
    Interleaved(&'a [u8]),
    /// One buffer per channel.
    Planar(&'a [&'a [u8]]),
}

/// Borrowed view of OS memory, valid for one IO callback or one
/// `GetBuffer`/`ReleaseBuffer` pair.
#[derive(Debug, Clone, Copy)]
pub struct PcmBatch<'a> {
    pub frames: usize,
    pub data: BatchData<'a>,
    pub silent: bool,
}

impl<'a> PcmBatch<'a> {
    pub fn interleaved(data: &'a [u8], frames: usize) -> Self {
        Self {
            frames,
            data: BatchData::Interleaved(data),
            silent: false,
        }
    }

    pub fn planar(planes: &'a [&'a [u8]], frames: usize) -> Self {
        Self {
            frames,
            data: BatchData::Planar(planes),
            silent: false,
        }
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }
}

/// What happened to one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    SkippedSilent,
    SkippedEmpty,
    /// The stream is no longer active; nothing was touched.
    Inactive,
    CallbackPanicked,
}

/// Counters for one stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub batches_delivered: u64,
    pub frames_delivered: u64,
    pub silent_batches_skipped: u64,
    pub stream_errors: u64,
    pub callback_panics: u64,
}

/// State shared between a session and its audio thread.
///
/// The `active` flag is the fast path checked on every batch; everything
/// else is bookkeeping.
pub struct StreamStatus {
    active: AtomicBool,
    fault: Mutex<Option<String>>,
    delegate: Option<Arc<dyn CaptureDelegate>>,
    batches_delivered: AtomicU64,
    frames_delivered: AtomicU64,
    silent_batches_skipped: AtomicU64,
    stream_errors: AtomicU64,
    callback_panics: AtomicU64,
}

impl StreamStatus {
    pub fn new(delegate: Option<Arc<dyn CaptureDelegate>>) -> Self {
        Self {
            active: AtomicBool::new(false),
            fault: Mutex::new(None),
            delegate,
            batches_delivered: AtomicU64::new(0),
            frames_delivered: AtomicU64::new(0),
            silent_batches_skipped: AtomicU64::new(0),
            stream_errors: AtomicU64::new(0),
            callback_panics: AtomicU64::new(0),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn activate(&self) {
        self.active.store(true, Ordering::Release);
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Mark the stream as terminally failed. Delivery stops; the owning
    /// session still has to be stopped to release its resources.
    ///
    /// Only the first fault is kept and reported.
    pub fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.deactivate();
        {
            let mut fault = self.fault.lock();
            if fault.is_some() {
                return;
            }
            *fault = Some(reason.clone());
        }
        log::error!("Capture stream faulted: {}", reason);
        if let Some(delegate) = &self.delegate {
            delegate.on_error(&CaptureError::StreamError(reason));
        }
    }

    pub fn fault(&self) -> Option<String> {
        self.fault.lock().clone()
    }

    /// Count a recoverable mid-stream error. Only the first few are logged.
    pub fn record_stream_error(&self, detail: &str) {
        let count = self.stream_errors.fetch_add(1, Ordering::Relaxed) + 1;
        if count <= 5 || count.is_power_of_two() {
            log::warn!("Stream error #{}: {}", count, detail);
        }
    }

    pub fn stats(&self) -> StreamStats {
        StreamStats {
            batches_delivered: self.batches_delivered.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            silent_batches_skipped: self.silent_batches_skipped.load(Ordering::Relaxed),
            stream_errors: self.stream_errors.load(Ordering::Relaxed),
            callback_panics: self.callback_panics.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for StreamStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamStatus")
            .field("active", &self.is_active())
            .field("fault", &self.fault())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Converts OS batches and hands them to the user callback.
///
/// Owned by whatever runs on the audio thread (a capture loop or an IO
/// proc context). Nothing here allocates after the first batch of a given
/// size.
pub struct PcmDelivery {
    converter: FormatConverter,
    callback: AudioDataCallback,
    status: Arc<StreamStatus>,
}

impl PcmDelivery {
    pub fn new(format: AudioFormatDescriptor, callback: AudioDataCallback, status: Arc<StreamStatus>) -> Self {
        Self {
            converter: FormatConverter::new(format),
            callback,
            status,
        }
    }

    pub fn format(&self) -> &AudioFormatDescriptor {
        self.converter.format()
    }

    pub fn status(&self) -> &Arc<StreamStatus> {
        &self.status
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn deliver(&mut self, batch: PcmBatch<'_>) -> DeliveryOutcome {
        if !self.status.is_active() {
            return DeliveryOutcome::Inactive;
        }
        if batch.silent {
            self.status.silent_batches_skipped.fetch_add(1, Ordering::Relaxed);
            return DeliveryOutcome::SkippedSilent;
        }
        if batch.frames == 0 {
            return DeliveryOutcome::SkippedEmpty;
        }

        let format = *self.converter.format();
        let samples = match batch.data {
            BatchData::Interleaved(data) => self.converter.convert_interleaved(data, batch.frames),
            BatchData::Planar(planes) => self.converter.convert_planar(planes, batch.frames),
        };
        if samples.is_empty() {
            return DeliveryOutcome::SkippedEmpty;
        }

        let channels = format.channels;
        let sample_rate = format.sample_rate;
        let frames = samples.len() / channels.max(1) as usize;
        let callback = &self.callback;

        match panic::catch_unwind(AssertUnwindSafe(|| callback(samples, channels, sample_rate))) {
            Ok(()) => {
                self.status.batches_delivered.fetch_add(1, Ordering::Relaxed);
                self.status.frames_delivered.fetch_add(frames as u64, Ordering::Relaxed);
                DeliveryOutcome::Delivered
            }
            Err(_) => {
                let count = self.status.callback_panics.fetch_add(1, Ordering::Relaxed) + 1;
                if count == 1 {
                    log::error!("Audio data callback panicked; panic contained on the audio thread");
                }
                DeliveryOutcome::CallbackPanicked
            }
        }
    }

    /// See [`StreamStatus::record_stream_error`].
    pub fn record_stream_error(&self, detail: &str) {
        self.status.record_stream_error(detail);
    }

    /// See [`StreamStatus::fail`].
    pub fn fail(&self, reason: impl Into<String>) {
        self.status.fail(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::format::SampleFormat;
    use crate::models::state::TapState;

    type Received = Arc<Mutex<Vec<(Vec<f32>, u16, u32)>>>;

    fn capture_callback() -> (Received, AudioDataCallback) {
        let received: Received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let callback: AudioDataCallback = Arc::new(move |samples: &[f32], channels: u16, rate: u32| {
            sink.lock().push((samples.to_vec(), channels, rate));
        });
        (received, callback)
    }

    fn active_delivery(format: AudioFormatDescriptor, callback: AudioDataCallback) -> PcmDelivery {
        let status = Arc::new(StreamStatus::new(None));
        status.activate();
        PcmDelivery::new(format, callback, status)
    }

    fn f32_bytes(samples: &[f32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
    }

    #[test]
    fn silent_batch_is_skipped_and_next_one_delivered() {
        let (received, callback) = capture_callback();
        let mut delivery = active_delivery(AudioFormatDescriptor::float32(48000, 2), callback);

        let data = f32_bytes(&[0.5, -0.5]);
        let silent = PcmBatch::interleaved(&data, 1).silent(true);
        assert_eq!(delivery.deliver(silent), DeliveryOutcome::SkippedSilent);
        assert!(received.lock().is_empty());

        assert_eq!(delivery.deliver(PcmBatch::interleaved(&data, 1)), DeliveryOutcome::Delivered);
        let received = received.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0], (vec![0.5, -0.5], 2, 48000));

        let stats = delivery.status().stats();
        assert_eq!(stats.silent_batches_skipped, 1);
        assert_eq!(stats.batches_delivered, 1);
        assert_eq!(stats.frames_delivered, 1);
    }

    #[test]
    fn inactive_stream_never_calls_back() {
        let (received, callback) = capture_callback();
        let status = Arc::new(StreamStatus::new(None));
        let mut delivery = PcmDelivery::new(AudioFormatDescriptor::float32(48000, 1), callback, status);

        let data = f32_bytes(&[0.1]);
        assert_eq!(delivery.deliver(PcmBatch::interleaved(&data, 1)), DeliveryOutcome::Inactive);
        assert!(received.lock().is_empty());
    }

    #[test]
    fn callback_panic_is_contained() {
        let callback: AudioDataCallback = Arc::new(|_: &[f32], _: u16, _: u32| panic!("host bug"));
        let mut delivery = active_delivery(AudioFormatDescriptor::float32(48000, 1), callback);

        let data = f32_bytes(&[0.1, 0.2]);
        assert_eq!(delivery.deliver(PcmBatch::interleaved(&data, 2)), DeliveryOutcome::CallbackPanicked);
        assert_eq!(delivery.deliver(PcmBatch::interleaved(&data, 2)), DeliveryOutcome::CallbackPanicked);
        assert_eq!(delivery.status().stats().callback_panics, 2);
        assert!(delivery.is_active());
    }

    #[test]
    fn planar_batches_arrive_interleaved() {
        let (received, callback) = capture_callback();
        let format = AudioFormatDescriptor::new(44100, 2, SampleFormat::Float32, false);
        let mut delivery = active_delivery(format, callback);

        let left = f32_bytes(&[0.25, 0.5]);
        let right = f32_bytes(&[-0.25, -0.5]);
        let planes: [&[u8]; 2] = [&left, &right];
        assert_eq!(delivery.deliver(PcmBatch::planar(&planes, 2)), DeliveryOutcome::Delivered);
        assert_eq!(received.lock()[0].0, vec![0.25, -0.25, 0.5, -0.5]);
    }

    struct RecordingDelegate {
        errors: Mutex<Vec<CaptureError>>,
    }

    impl CaptureDelegate for RecordingDelegate {
        fn on_state_changed(&self, _state: &TapState) {}

        fn on_error(&self, error: &CaptureError) {
            self.errors.lock().push(error.clone());
        }
    }

    #[test]
    fn fault_deactivates_and_notifies_once() {
        let delegate = Arc::new(RecordingDelegate {
            errors: Mutex::new(Vec::new()),
        });
        let status = StreamStatus::new(Some(delegate.clone()));
        status.activate();

        status.fail("device invalidated");
        status.fail("second fault");

        assert!(!status.is_active());
        assert_eq!(status.fault().as_deref(), Some("device invalidated"));
        assert_eq!(
            *delegate.errors.lock(),
            vec![CaptureError::StreamError("device invalidated".into())]
        );
    }

    #[test]
    fn stream_errors_are_counted() {
        let status = StreamStatus::new(None);
        for _ in 0..10 {
            status.record_stream_error("glitch");
        }
        assert_eq!(status.stats().stream_errors, 10);
    }
}
