//! Tap stream description → `AudioFormatDescriptor`.
//!
//! The tap reports its format as an `AudioStreamBasicDescription`
//! (`kAudioTapPropertyFormat`). Only the fields that decide the sample
//! layout are mirrored here so the mapping is testable off-platform.

use process_tap_core::{AudioFormatDescriptor, CaptureError, SampleFormat, MAX_CHANNELS};

/// `kAudioFormatLinearPCM` (`'lpcm'`).
pub const FORMAT_LINEAR_PCM: u32 = u32::from_be_bytes(*b"lpcm");

pub const FLAG_IS_FLOAT: u32 = 1 << 0;
pub const FLAG_IS_SIGNED_INTEGER: u32 = 1 << 2;
pub const FLAG_IS_NON_INTERLEAVED: u32 = 1 << 5;

/// The layout-relevant subset of an `AudioStreamBasicDescription`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamDescription {
    pub sample_rate: f64,
    pub format_id: u32,
    pub format_flags: u32,
    pub bytes_per_frame: u32,
    pub channels_per_frame: u32,
    pub bits_per_channel: u32,
}

impl StreamDescription {
    pub fn is_float(&self) -> bool {
        self.format_flags & FLAG_IS_FLOAT != 0
    }

    pub fn is_interleaved(&self) -> bool {
        self.format_flags & FLAG_IS_NON_INTERLEAVED == 0
    }

    fn sample_format(&self) -> SampleFormat {
        if self.format_id != FORMAT_LINEAR_PCM {
            return SampleFormat::Unsupported {
                bits: self.bits_per_channel as u16,
            };
        }
        match (self.is_float(), self.bits_per_channel) {
            (true, 32) => SampleFormat::Float32,
            (false, 16) if self.format_flags & FLAG_IS_SIGNED_INTEGER != 0 => SampleFormat::Int16,
            (false, 32) if self.format_flags & FLAG_IS_SIGNED_INTEGER != 0 => SampleFormat::Int32,
            (_, bits) => SampleFormat::Unsupported { bits: bits as u16 },
        }
    }

    /// Map to the descriptor the converter works from.
    ///
    /// Unknown sample representations map to `SampleFormat::Unsupported` and
    /// are read as float32 downstream; only a rate or channel count that
    /// cannot describe a stream is an error.
    pub fn to_descriptor(&self) -> Result<AudioFormatDescriptor, CaptureError> {
        if !self.sample_rate.is_finite() || self.sample_rate < 1.0 {
            return Err(CaptureError::ConfigurationFailed(format!(
                "tap reports invalid sample rate {}",
                self.sample_rate
            )));
        }
        if self.channels_per_frame == 0 || self.channels_per_frame > MAX_CHANNELS as u32 {
            return Err(CaptureError::ConfigurationFailed(format!(
                "tap reports unsupported channel count {}",
                self.channels_per_frame
            )));
        }

        let descriptor = AudioFormatDescriptor::new(
            self.sample_rate.round() as u32,
            self.channels_per_frame as u16,
            self.sample_format(),
            self.is_interleaved(),
        );
        if !descriptor.sample_format.is_supported() {
            log::warn!(
                "Tap format id {:#010x} flags {:#x} ({} bits) is not a known PCM layout; reading as float32",
                self.format_id,
                self.format_flags,
                self.bits_per_channel
            );
        }
        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn float_stereo() -> StreamDescription {
        StreamDescription {
            sample_rate: 48_000.0,
            format_id: FORMAT_LINEAR_PCM,
            format_flags: FLAG_IS_FLOAT | FLAG_IS_NON_INTERLEAVED,
            bytes_per_frame: 4,
            channels_per_frame: 2,
            bits_per_channel: 32,
        }
    }

    #[test]
    fn default_tap_format_is_planar_float() {
        let d = float_stereo().to_descriptor().unwrap();
        assert_eq!(d.sample_rate, 48_000);
        assert_eq!(d.channels, 2);
        assert_eq!(d.sample_format, SampleFormat::Float32);
        assert!(!d.interleaved);
    }

    #[test]
    fn signed_integer_layouts() {
        let mut desc = float_stereo();
        desc.format_flags = FLAG_IS_SIGNED_INTEGER;
        desc.bits_per_channel = 16;
        let d = desc.to_descriptor().unwrap();
        assert_eq!(d.sample_format, SampleFormat::Int16);
        assert!(d.interleaved);

        desc.bits_per_channel = 32;
        assert_eq!(desc.to_descriptor().unwrap().sample_format, SampleFormat::Int32);
    }

    #[test]
    fn unknown_layouts_are_not_errors() {
        let mut desc = float_stereo();
        desc.bits_per_channel = 64;
        assert_eq!(
            desc.to_descriptor().unwrap().sample_format,
            SampleFormat::Unsupported { bits: 64 }
        );

        let mut desc = float_stereo();
        desc.format_id = u32::from_be_bytes(*b"aac ");
        assert!(!desc.to_descriptor().unwrap().sample_format.is_supported());

        let mut desc = float_stereo();
        desc.format_flags = FLAG_IS_SIGNED_INTEGER;
        desc.bits_per_channel = 24;
        assert_eq!(
            desc.to_descriptor().unwrap().sample_format,
            SampleFormat::Unsupported { bits: 24 }
        );
    }

    #[test]
    fn fractional_rates_round() {
        let mut desc = float_stereo();
        desc.sample_rate = 44_099.6;
        assert_eq!(desc.to_descriptor().unwrap().sample_rate, 44_100);
    }

    #[test]
    fn rejects_impossible_streams() {
        let mut desc = float_stereo();
        desc.sample_rate = 0.0;
        assert!(matches!(desc.to_descriptor(), Err(CaptureError::ConfigurationFailed(_))));

        let mut desc = float_stereo();
        desc.channels_per_frame = 0;
        assert!(desc.to_descriptor().is_err());

        desc.channels_per_frame = 33;
        assert!(desc.to_descriptor().is_err());
    }
}
