//! Capture configuration.

/// Default device node.
pub const DEFAULT_DEVICE: &str = "/dev/video0";

/// Resolutions tried for a pixel format whose frame sizes cannot be enumerated.
pub const FALLBACK_FRAME_SIZES: [(u32, u32); 4] = [(320, 240), (640, 480), (720, 480), (720, 576)];

/// Configuration for a capture device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureConfig {
    buffer_count: u32,
    min_buffer_count: u32,
    fallback_frame_sizes: Vec<(u32, u32)>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            buffer_count: 3,
            min_buffer_count: 2,
            fallback_frame_sizes: FALLBACK_FRAME_SIZES.to_vec(),
        }
    }
}

impl CaptureConfig {
    /// Set how many buffers to request from the device.
    #[must_use]
    pub const fn with_buffer_count(mut self, buffer_count: u32) -> Self {
        self.buffer_count = buffer_count;
        self
    }

    /// Set the fewest buffers the device may grant before start fails.
    #[must_use]
    pub const fn with_min_buffer_count(mut self, min_buffer_count: u32) -> Self {
        self.min_buffer_count = min_buffer_count;
        self
    }

    /// Set the fallback resolutions.
    #[must_use]
    pub fn with_fallback_frame_sizes(mut self, sizes: Vec<(u32, u32)>) -> Self {
        self.fallback_frame_sizes = sizes;
        self
    }

    // Getters
    /// Buffers requested from the device.
    pub const fn buffer_count(&self) -> u32 {
        self.buffer_count
    }

    /// Fewest buffers accepted.
    pub const fn min_buffer_count(&self) -> u32 {
        self.min_buffer_count
    }

    /// Resolutions used when frame sizes cannot be enumerated.
    pub fn fallback_frame_sizes(&self) -> &[(u32, u32)] {
        &self.fallback_frame_sizes
    }
}
