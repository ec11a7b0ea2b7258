use crate::models::format::{AudioFormatDescriptor, SampleFormat};

const INT16_SCALE: f32 = 32768.0;
const INT32_SCALE: f64 = 2147483648.0;

/// Convert one 16-bit sample to float.
#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    (sample as f32 / INT16_SCALE).clamp(-1.0, 1.0)
}

/// Convert one 32-bit integer sample to float.
///
/// The division runs in f64 so large magnitudes do not round past full scale
/// before the clamp.
#[inline]
pub fn i32_to_f32(sample: i32) -> f32 {
    ((sample as f64 / INT32_SCALE) as f32).clamp(-1.0, 1.0)
}

/// Converts OS-native PCM into interleaved f32.
///
/// One converter lives for one session: its output buffer is reused across
/// batches, and an unknown sample format is reported once.
#[derive(Debug)]
pub struct FormatConverter {
    format: AudioFormatDescriptor,
    output: Vec<f32>,
    unsupported_reported: bool,
}

impl FormatConverter {
    pub fn new(format: AudioFormatDescriptor) -> Self {
        Self {
            format,
            output: Vec::new(),
            unsupported_reported: false,
        }
    }

    pub fn format(&self) -> &AudioFormatDescriptor {
        &self.format
    }

    /// Convert `frames` frames of interleaved data.
    ///
    /// Reads at most what `data` holds; a short buffer yields fewer whole
    /// frames rather than reading past the end.
    pub fn convert_interleaved(&mut self, data: &[u8], frames: usize) -> &[f32] {
        self.report_unsupported();

        let channels = self.format.channels as usize;
        let width = self.format.sample_format.bytes_per_sample();
        let available = data.len() / width / channels.max(1) * channels;
        let count = (frames * channels).min(available);

        self.output.clear();
        self.output.reserve(count);

        let samples = data.chunks_exact(width).take(count);
        match self.format.sample_format {
            SampleFormat::Int16 => self
                .output
                .extend(samples.map(|b| i16_to_f32(i16::from_ne_bytes([b[0], b[1]])))),
            SampleFormat::Int32 => self
                .output
                .extend(samples.map(|b| i32_to_f32(i32::from_ne_bytes([b[0], b[1], b[2], b[3]])))),
            SampleFormat::Float32 | SampleFormat::Unsupported { .. } => self
                .output
                .extend(samples.map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))),
        }

        &self.output
    }

    /// Convert planar data (one buffer per channel), interleaving as it goes:
    /// `output[frame * C + ch] = planes[ch][frame]`.
    ///
    /// A single plane carrying all channels is treated as interleaved.
    pub fn convert_planar(&mut self, planes: &[&[u8]], frames: usize) -> &[f32] {
        let channels = self.format.channels as usize;
        if planes.len() == 1 && channels > 1 {
            return self.convert_interleaved(planes[0], frames);
        }

        self.report_unsupported();

        self.output.clear();
        if planes.is_empty() {
            return &self.output;
        }

        let width = self.format.sample_format.bytes_per_sample();
        let planes = &planes[..planes.len().min(channels)];
        let frames = planes
            .iter()
            .map(|plane| plane.len() / width)
            .fold(frames, usize::min);

        self.output.resize(frames * channels, 0.0);

        for (ch, plane) in planes.iter().enumerate() {
            for (frame, bytes) in plane.chunks_exact(width).take(frames).enumerate() {
                self.output[frame * channels + ch] = decode(self.format.sample_format, bytes);
            }
        }

        &self.output
    }

    fn report_unsupported(&mut self) {
        if self.unsupported_reported {
            return;
        }
        if let SampleFormat::Unsupported { bits } = self.format.sample_format {
            log::warn!(
                "Unexpected sample format ({}-bit); treating captured data as float32",
                bits
            );
            self.unsupported_reported = true;
        }
    }
}

#[inline]
fn decode(format: SampleFormat, b: &[u8]) -> f32 {
    match format {
        SampleFormat::Int16 => i16_to_f32(i16::from_ne_bytes([b[0], b[1]])),
        SampleFormat::Int32 => i32_to_f32(i32::from_ne_bytes([b[0], b[1], b[2], b[3]])),
        SampleFormat::Float32 | SampleFormat::Unsupported { .. } => {
            f32::from_ne_bytes([b[0], b[1], b[2], b[3]])
        }
    }
}
