//! Images and captured frames.

use std::time::Duration;

use crate::buffer::MemoryBuffer;
use crate::format::ImageFormat;

/// An image format paired with a buffer of exactly its data size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    format: ImageFormat,
    buffer: MemoryBuffer,
}

impl Image {
    /// Allocate a zeroed image of the given format.
    #[must_use]
    pub fn new(format: ImageFormat) -> Self {
        Self {
            format,
            buffer: MemoryBuffer::new(format.data_size_in_bytes() as usize),
        }
    }

    /// Image format.
    #[must_use]
    pub const fn format(&self) -> &ImageFormat {
        &self.format
    }

    /// Pixel data.
    #[must_use]
    pub const fn buffer(&self) -> &MemoryBuffer {
        &self.buffer
    }

    /// Mutable pixel data. Its size stays fixed.
    pub fn buffer_mut(&mut self) -> &mut MemoryBuffer {
        &mut self.buffer
    }
}

/// The device's frame target: an image plus capture sequence and time.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedImage {
    image: Image,
    sequence_number: u32,
    timestamp_in_seconds: f64,
}

impl CapturedImage {
    /// Allocate a capture target for the given format.
    #[must_use]
    pub fn new(format: ImageFormat) -> Self {
        Self {
            image: Image::new(format),
            sequence_number: 0,
            timestamp_in_seconds: 0.0,
        }
    }

    /// Latest frame.
    #[must_use]
    pub const fn image(&self) -> &Image {
        &self.image
    }

    pub(crate) fn image_mut(&mut self) -> &mut Image {
        &mut self.image
    }

    /// Number of frames captured since capture started.
    #[must_use]
    pub const fn sequence_number(&self) -> u32 {
        self.sequence_number
    }

    /// Device completion time of the latest frame, in seconds at millisecond resolution.
    #[must_use]
    pub const fn timestamp_in_seconds(&self) -> f64 {
        self.timestamp_in_seconds
    }

    /// Record one more captured frame completed at `timestamp`.
    pub(crate) fn advance(&mut self, timestamp: Duration) {
        self.sequence_number = self.sequence_number.wrapping_add(1);
        self.timestamp_in_seconds = truncated_seconds(timestamp);
    }
}

/// Seconds of `timestamp`, truncated to whole milliseconds first.
#[allow(clippy::cast_precision_loss)]
fn truncated_seconds(timestamp: Duration) -> f64 {
    timestamp.as_millis() as f64 / 1000.0
}
