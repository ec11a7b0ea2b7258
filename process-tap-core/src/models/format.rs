use serde::{Deserialize, Serialize};

use super::error::CaptureError;

/// Highest channel count a tap may report.
pub const MAX_CHANNELS: u16 = 32;

/// Native sample representation delivered by the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    Int16,
    Int32,
    Float32,
    /// Anything else the OS reports. Converted on a best-effort basis as float32.
    Unsupported { bits: u16 },
}

impl SampleFormat {
    /// Width in bytes of one sample as it will be read.
    ///
    /// Unsupported formats are read as 32-bit floats.
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            Self::Int16 => 2,
            Self::Int32 | Self::Float32 | Self::Unsupported { .. } => 4,
        }
    }

    pub fn bits(&self) -> u16 {
        match self {
            Self::Int16 => 16,
            Self::Int32 | Self::Float32 => 32,
            Self::Unsupported { bits } => *bits,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported { .. })
    }
}

/// Audio format produced once per session during tap activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormatDescriptor {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
    pub interleaved: bool,
}

impl AudioFormatDescriptor {
    pub fn new(sample_rate: u32, channels: u16, sample_format: SampleFormat, interleaved: bool) -> Self {
        Self {
            sample_rate,
            channels,
            sample_format,
            interleaved,
        }
    }

    /// Interleaved 32-bit float at the given rate and channel count.
    pub fn float32(sample_rate: u32, channels: u16) -> Self {
        Self::new(sample_rate, channels, SampleFormat::Float32, true)
    }

    /// Bytes occupied by one frame of interleaved data.
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * self.sample_format.bytes_per_sample()
    }

    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.sample_rate == 0 {
            return Err(CaptureError::ConfigurationFailed("sample rate must be positive".into()));
        }
        if self.channels == 0 || self.channels > MAX_CHANNELS {
            return Err(CaptureError::ConfigurationFailed(format!(
                "unsupported channel count: {}",
                self.channels
            )));
        }
        Ok(())
    }
}

impl Default for AudioFormatDescriptor {
    fn default() -> Self {
        Self::float32(48000, 2)
    }
}

impl std::fmt::Display for AudioFormatDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let repr = match self.sample_format {
            SampleFormat::Int16 => "int16".to_string(),
            SampleFormat::Int32 => "int32".to_string(),
            SampleFormat::Float32 => "float32".to_string(),
            SampleFormat::Unsupported { bits } => format!("unsupported({}-bit)", bits),
        };
        write!(
            f,
            "{} Hz, {} ch, {}, {}",
            self.sample_rate,
            self.channels,
            repr,
            if self.interleaved { "interleaved" } else { "planar" }
        )
    }
}
