//! Mapping between [`AudioFormatDescriptor`] and `WAVEFORMATEX` fields.

use process_tap_core::{AudioFormatDescriptor, CaptureError, SampleFormat};

pub const WAVE_FORMAT_PCM: u16 = 1;
pub const WAVE_FORMAT_IEEE_FLOAT: u16 = 3;

/// The plain-data part of a `WAVEFORMATEX` (`cbSize` is always 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveFormatFields {
    pub format_tag: u16,
    pub channels: u16,
    pub samples_per_sec: u32,
    pub avg_bytes_per_sec: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
}

impl WaveFormatFields {
    /// Describe `format` for `IAudioClient::Initialize`. Only interleaved
    /// int16, int32 and float32 can be requested.
    pub fn from_descriptor(format: &AudioFormatDescriptor) -> Result<Self, CaptureError> {
        format.validate()?;
        if !format.interleaved {
            return Err(CaptureError::ConfigurationFailed("WASAPI delivers interleaved audio only".into()));
        }
        let format_tag = match format.sample_format {
            SampleFormat::Int16 | SampleFormat::Int32 => WAVE_FORMAT_PCM,
            SampleFormat::Float32 => WAVE_FORMAT_IEEE_FLOAT,
            SampleFormat::Unsupported { bits } => {
                return Err(CaptureError::ConfigurationFailed(format!(
                    "cannot request {}-bit samples",
                    bits
                )))
            }
        };
        let block_align = format.bytes_per_frame() as u16;
        Ok(Self {
            format_tag,
            channels: format.channels,
            samples_per_sec: format.sample_rate,
            avg_bytes_per_sec: format.sample_rate * block_align as u32,
            block_align,
            bits_per_sample: format.sample_format.bits(),
        })
    }

    /// Describe what a capture buffer in this format contains.
    pub fn to_descriptor(&self) -> AudioFormatDescriptor {
        let sample_format = match (self.format_tag, self.bits_per_sample) {
            (WAVE_FORMAT_IEEE_FLOAT, 32) => SampleFormat::Float32,
            (WAVE_FORMAT_PCM, 16) => SampleFormat::Int16,
            (WAVE_FORMAT_PCM, 32) => SampleFormat::Int32,
            (_, bits) => SampleFormat::Unsupported { bits },
        };
        AudioFormatDescriptor::new(self.samples_per_sec, self.channels, sample_format, true)
    }
}
