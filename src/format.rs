//! Image formats: dimensions, pixel encoding and the byte layout they imply.

use std::fmt;

/// Pixel encodings understood by the capture engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Encoding {
    /// One byte of luma per pixel.
    #[default]
    Grayscale8,
    /// Packed 8-bit R, G, B.
    Rgb24,
    /// Packed 4:2:2 `Y0 U Y1 V`.
    Yuyv,
    /// Four bytes per pixel.
    Bits32,
}

const ENCODING_NAMES: [&str; Encoding::COUNT] = ["Grayscale8", "RGB24", "YUYV", "32Bits"];
const ENCODING_BITS_PER_PIXEL: [u32; Encoding::COUNT] = [8, 24, 16, 32];

impl Encoding {
    /// Number of encodings.
    pub const COUNT: usize = 4;

    /// All encodings, in table order.
    pub const ALL: [Self; Self::COUNT] = [Self::Grayscale8, Self::Rgb24, Self::Yuyv, Self::Bits32];

    /// Table index of this encoding.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Look up an encoding by table index.
    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Display name.
    #[must_use]
    pub fn name(self) -> &'static str {
        name_of(self.index())
    }

    /// Bits per pixel.
    #[must_use]
    pub fn bits_per_pixel(self) -> u32 {
        bits_per_pixel_of(self.index())
    }
}

/// Encoding name for a raw table index, `"Unknown"` when out of range.
#[must_use]
pub fn name_of(index: usize) -> &'static str {
    ENCODING_NAMES.get(index).copied().unwrap_or("Unknown")
}

/// Bits per pixel for a raw table index, `0` when out of range.
#[must_use]
pub fn bits_per_pixel_of(index: usize) -> u32 {
    ENCODING_BITS_PER_PIXEL.get(index).copied().unwrap_or(0)
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Width, height and encoding of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ImageFormat {
    width: u32,
    height: u32,
    encoding: Encoding,
}

impl ImageFormat {
    /// Create a new image format.
    #[must_use]
    pub const fn new(width: u32, height: u32, encoding: Encoding) -> Self {
        Self {
            width,
            height,
            encoding,
        }
    }

    /// Width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Pixel encoding.
    #[must_use]
    pub const fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Name of the pixel encoding.
    #[must_use]
    pub fn encoding_name(&self) -> &'static str {
        self.encoding.name()
    }

    /// Bits per pixel of the encoding.
    #[must_use]
    pub fn bits_per_pixel(&self) -> u32 {
        self.encoding.bits_per_pixel()
    }

    /// Bytes per line, rounded up to a whole byte.
    #[must_use]
    pub fn bytes_per_line(&self) -> u32 {
        stride_in_bytes(self.bits_per_pixel(), self.width)
    }

    /// Size of one image in bytes: `height * bytes_per_line`.
    #[must_use]
    pub fn data_size_in_bytes(&self) -> u32 {
        self.height.saturating_mul(self.bytes_per_line())
    }

    /// Size of one image in bytes, or `None` if it does not fit in a `u32`.
    #[must_use]
    pub fn checked_data_size_in_bytes(&self) -> Option<u32> {
        let bits = u64::from(self.bits_per_pixel()) * u64::from(self.width);
        u32::try_from(bits.div_ceil(8) * u64::from(self.height)).ok()
    }
}

/// Bytes needed for `width` pixels of `bits_per_pixel` each, rounded up.
fn stride_in_bytes(bits_per_pixel: u32, width: u32) -> u32 {
    let bits = u64::from(bits_per_pixel) * u64::from(width);
    u32::try_from(bits.div_ceil(8)).unwrap_or(u32::MAX)
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} pixels, {} encoding",
            self.width,
            self.height,
            self.encoding_name()
        )
    }
}
