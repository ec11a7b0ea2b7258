//! Where the tap's buffers sit in the aggregate device's input list.
//!
//! The aggregate lists its sub-devices' input streams first and the tap's
//! streams last. An output device with inputs of its own (a USB interface
//! with a mic) therefore pushes the tap behind its buffers.

use process_tap_core::AudioFormatDescriptor;

/// The trailing run of input buffers that belongs to the tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TapBufferRange {
    count: usize,
}

impl TapBufferRange {
    /// Buffers the tap occupies by its format alone: one interleaved buffer or
    /// one per channel.
    pub fn from_format(format: &AudioFormatDescriptor) -> Self {
        let count = if format.interleaved { 1 } else { format.channels.max(1) as usize };
        Self { count }
    }

    /// Locate the tap in the aggregate's input stream configuration, given as
    /// the channel count of each buffer in list order.
    ///
    /// Walks back from the last buffer until the tap's channels are covered.
    pub fn locate(buffer_channels: &[u32], format: &AudioFormatDescriptor) -> Result<Self, String> {
        let wanted = u32::from(format.channels);
        let mut covered = 0u32;
        for (count, &channels) in buffer_channels.iter().rev().enumerate() {
            covered += channels;
            if covered == wanted {
                return Ok(Self { count: count + 1 });
            }
            if covered > wanted {
                break;
            }
        }
        Err(format!(
            "aggregate input layout {:?} has no trailing buffers matching the {}-channel tap",
            buffer_channels, wanted
        ))
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// The tap's buffers within one IO cycle's input list, or `None` when the
    /// list is shorter than the tap.
    pub fn select<'a, T>(&self, buffers: &'a [T]) -> Option<&'a [T]> {
        let offset = buffers.len().checked_sub(self.count)?;
        Some(&buffers[offset..])
    }
}
