//! Core traits and types for the V4L2 control surface.
//!
//! The capture engine only ever talks to hardware through [`DeviceControl`],
//! which keeps the kernel-facing backend and the test mock interchangeable.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// Pixel format representation (e.g., YUYV, BA81).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// MJPEG pixel format (Motion JPEG).
    pub const MJPG: Self = Self::new(b"MJPG");
    /// 8-bit Bayer, BGBG.. GRGR..
    pub const SBGGR8: Self = Self::new(b"BA81");
    /// 8-bit Bayer, GBGB.. RGRG..
    pub const SGBRG8: Self = Self::new(b"GBRG");
    /// 8-bit Bayer, GRGR.. BGBG..
    pub const SGRBG8: Self = Self::new(b"GRBG");
    /// 8-bit Bayer, RGRG.. GBGB..
    pub const SRGGB8: Self = Self::new(b"RGGB");

    /// The code as the little-endian integer the kernel uses.
    #[must_use]
    pub const fn code(self) -> u32 {
        u32::from_le_bytes(self.0)
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            let c = if byte.is_ascii_graphic() || byte == b' ' {
                char::from(byte)
            } else {
                '.'
            };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// Active device format, as reported back by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Bytes per line (stride).
    pub stride: u32,
    /// Total frame size in bytes.
    pub size: u32,
}

impl Format {
    /// Create a format request. Stride and size are left for the driver to fill in.
    #[must_use]
    pub const fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        Self {
            width,
            height,
            fourcc,
            stride: 0,
            size: 0,
        }
    }

    /// Whether the geometry and pixel format match `other`, ignoring layout fields.
    #[must_use]
    pub fn same_geometry(&self, other: &Self) -> bool {
        self.width == other.width && self.height == other.height && self.fourcc == other.fourcc
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} {}", self.width, self.height, self.fourcc)
    }
}

/// Device capability flags.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming.
    pub can_stream: bool,
}

/// A pixel format advertised by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDescription {
    /// Device pixel-format code.
    pub fourcc: FourCC,
    /// Human-readable name reported by the driver.
    pub description: String,
}

/// A `{min, max, step}` range of frame sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeRange {
    /// Minimum width in pixels.
    pub min_width: u32,
    /// Maximum width in pixels.
    pub max_width: u32,
    /// Width increment.
    pub step_width: u32,
    /// Minimum height in pixels.
    pub min_height: u32,
    /// Maximum height in pixels.
    pub max_height: u32,
    /// Height increment.
    pub step_height: u32,
}

/// One frame size entry reported for a pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSize {
    /// A single supported resolution.
    Discrete {
        /// Width in pixels.
        width: u32,
        /// Height in pixels.
        height: u32,
    },
    /// Any resolution on the range's grid.
    Stepwise(SizeRange),
    /// Any resolution inside the range.
    Continuous(SizeRange),
}

/// A time-per-frame value, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Fraction {
    /// Numerator.
    pub numerator: u32,
    /// Denominator.
    pub denominator: u32,
}

impl Fraction {
    /// Create a new fraction.
    #[must_use]
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// The fraction used for "no interval requested".
    pub const UNSET: Self = Self::new(0, 0);

    /// Whether both terms are nonzero.
    #[must_use]
    pub const fn is_set(self) -> bool {
        self.numerator != 0 && self.denominator != 0
    }
}

impl fmt::Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// One frame interval entry reported for a pixel format and size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameInterval {
    /// A single supported interval.
    Discrete(Fraction),
    /// Any interval on the `{min, max, step}` grid.
    Stepwise {
        /// Shortest interval.
        min: Fraction,
        /// Longest interval.
        max: Fraction,
        /// Interval increment.
        step: Fraction,
    },
    /// Any interval between `min` and `max`.
    Continuous {
        /// Shortest interval.
        min: Fraction,
        /// Longest interval.
        max: Fraction,
    },
}

/// A buffer the device has finished filling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DequeuedBuffer {
    /// Slot index within the pool.
    pub index: u32,
    /// Number of valid bytes at the start of the slot.
    pub bytes_used: u32,
    /// Completion time reported by the driver.
    pub timestamp: Duration,
}

/// Error type for capture operations.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// Path exists but is not a character device.
    #[error("{} is not a device", .0.display())]
    NotCharDevice(PathBuf),
    /// Failed to stat or open the device node.
    #[error("cannot open {}: {source}", .path.display())]
    DeviceOpenFailed {
        /// Device path.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
    /// The device lacks a capability the engine requires.
    #[error("{device} does not support {capability}")]
    MissingCapability {
        /// Device name.
        device: String,
        /// Missing capability.
        capability: &'static str,
    },
    /// Operation on a device whose probing failed.
    #[error("device {0} is not valid")]
    InvalidDevice(String),
    /// `start_capture` while already capturing.
    #[error("device {0} is already capturing")]
    AlreadyCapturing(String),
    /// Capture settings index out of range.
    #[error("capture settings index {index} out of range ({len} available)")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of published settings.
        len: usize,
    },
    /// The driver substituted a different format.
    #[error("failed to set capture format: requested {requested}, device reports {actual}")]
    FormatMismatch {
        /// What was requested.
        requested: Format,
        /// What the device applied.
        actual: Format,
    },
    /// The driver's frame size disagrees with the encoding table.
    #[error("device frame size is {actual} bytes, expected {expected}")]
    FrameSizeMismatch {
        /// Size computed from the image format.
        expected: u32,
        /// Size reported by the device.
        actual: u32,
    },
    /// The driver substituted a different frame interval.
    #[error("failed to set frame interval: requested {requested}, device reports {actual}")]
    IntervalMismatch {
        /// What was requested.
        requested: Fraction,
        /// What the device applied.
        actual: Fraction,
    },
    /// The device granted fewer buffers than required.
    #[error("insufficient buffer memory: device granted {granted}, need at least {required}")]
    InsufficientBuffers {
        /// Buffers granted.
        granted: u32,
        /// Minimum accepted.
        required: u32,
    },
    /// A byte copy between differently sized buffers.
    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch {
        /// Target size.
        expected: usize,
        /// Source size.
        actual: usize,
    },
    /// A device request failed.
    #[error("{request} failed: {source}")]
    Ioctl {
        /// Request name, e.g. `VIDIOC_S_FMT`.
        request: &'static str,
        /// Underlying error.
        source: io::Error,
    },
    /// Memory-mapping a buffer slot failed.
    #[error("failed to map buffer {index}: {source}")]
    MapFailed {
        /// Slot index.
        index: u32,
        /// Underlying error.
        source: io::Error,
    },
    /// Malformed or unsupported portable bitmap.
    #[error("bitmap error: {0}")]
    Bitmap(String),
    /// No conversion between these encodings.
    #[error("cannot convert {from} images to {to}")]
    UnsupportedConversion {
        /// Source encoding name.
        from: &'static str,
        /// Target encoding name.
        to: &'static str,
    },
    /// A captured image does not hold the expected test pattern.
    #[error("validation failed: {0}")]
    Validation(String),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CaptureError {
    /// Wrap an I/O error from the named device request.
    #[must_use]
    pub const fn ioctl(request: &'static str, source: io::Error) -> Self {
        Self::Ioctl { request, source }
    }
}

/// Result type for capture operations.
pub type Result<T> = std::result::Result<T, CaptureError>;

/// A memory-mapped buffer slot. Dropping it releases the mapping.
pub trait MappedSlot {
    /// Mapped length in bytes.
    fn len(&self) -> usize;

    /// Whether the mapping is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` over the mapped bytes.
    fn with_bytes<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&[u8]) -> R;
}

/// Abstraction over the device control surface.
///
/// Implementations retry requests interrupted by a signal and surface any
/// other failure once.
pub trait DeviceControl {
    /// Mapped slot type returned by `map_buffer`.
    type Slot: MappedSlot;

    /// Query device capabilities.
    fn capabilities(&self) -> Result<DeviceCapabilities>;

    /// Enumerate the pixel formats the device advertises for capture.
    fn enum_formats(&self) -> Result<Vec<FormatDescription>>;

    /// Enumerate frame sizes for a pixel format.
    fn enum_frame_sizes(&self, fourcc: FourCC) -> Result<Vec<FrameSize>>;

    /// Enumerate frame intervals for a pixel format and size.
    fn enum_frame_intervals(
        &self,
        fourcc: FourCC,
        width: u32,
        height: u32,
    ) -> Result<Vec<FrameInterval>>;

    /// Get current format.
    fn format(&self) -> Result<Format>;

    /// Request a capture format. Callers re-read with `format` to see what was applied.
    fn set_format(&mut self, format: &Format) -> Result<()>;

    /// Get the current time-per-frame.
    fn frame_interval(&self) -> Result<Fraction>;

    /// Request a time-per-frame.
    fn set_frame_interval(&mut self, interval: Fraction) -> Result<()>;

    /// Request `count` mmap buffers. Returns how many the device granted.
    fn request_buffers(&mut self, count: u32) -> Result<u32>;

    /// Query and map buffer `index`.
    fn map_buffer(&mut self, index: u32) -> Result<Self::Slot>;

    /// Submit buffer `index` to the device's intake queue.
    fn queue_buffer(&mut self, index: u32) -> Result<()>;

    /// Take a completed buffer without blocking. `Ok(None)` means none is ready yet.
    fn dequeue_buffer(&mut self) -> Result<Option<DequeuedBuffer>>;

    /// Arm streaming.
    fn stream_on(&mut self) -> Result<()>;

    /// Disarm streaming.
    fn stream_off(&mut self) -> Result<()>;
}
