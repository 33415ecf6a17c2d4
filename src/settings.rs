//! Capture settings published by a device, and the raw entries behind them.

use std::fmt;

use crate::format::{Encoding, ImageFormat};
use crate::traits::{FourCC, Fraction};

/// A selectable (resolution, encoding, frame rate) combination.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CaptureSettings {
    image_format: ImageFormat,
    frame_rate_hz: f32,
}

/// The ordered settings a device advertises.
pub type CaptureSettingsList = Vec<CaptureSettings>;

impl CaptureSettings {
    /// Create capture settings.
    #[must_use]
    pub const fn new(image_format: ImageFormat, frame_rate_hz: f32) -> Self {
        Self {
            image_format,
            frame_rate_hz,
        }
    }

    /// Image format delivered by these settings.
    #[must_use]
    pub const fn image_format(&self) -> &ImageFormat {
        &self.image_format
    }

    /// Nominal frame rate, `0.0` when the device gave no interval.
    #[must_use]
    pub const fn frame_rate_hz(&self) -> f32 {
        self.frame_rate_hz
    }
}

impl fmt::Display for CaptureSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {:.3}hz", self.image_format, self.frame_rate_hz)
    }
}

/// The raw device-reported tuple one published setting comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InternalCaptureSettings {
    pub pixel_format_name: String,
    pub fourcc: FourCC,
    pub width: u32,
    pub height: u32,
    pub interval: Fraction,
}

impl InternalCaptureSettings {
    #[allow(clippy::cast_precision_loss)]
    pub fn frame_rate_hz(&self) -> f32 {
        if self.interval.numerator == 0 {
            return 0.0;
        }
        self.interval.denominator as f32 / self.interval.numerator as f32
    }

    /// The public settings for this entry, if its pixel format is understood.
    pub fn to_capture_settings(&self) -> Option<CaptureSettings> {
        let encoding = image_format_encoding(self.fourcc)?;
        Some(CaptureSettings::new(
            ImageFormat::new(self.width, self.height, encoding),
            self.frame_rate_hz(),
        ))
    }
}

impl fmt::Display for InternalCaptureSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pixelFormatName:'{}' pixelFormat:{} width:{}px height:{}px frameInterval:{} (rate:{:.3}hz)",
            self.pixel_format_name,
            self.fourcc,
            self.width,
            self.height,
            self.interval,
            self.frame_rate_hz()
        )
    }
}

/// Map a device pixel-format code to the encoding frames are delivered in.
#[must_use]
pub fn image_format_encoding(fourcc: FourCC) -> Option<Encoding> {
    match fourcc {
        FourCC::YUYV => Some(Encoding::Yuyv),
        // TODO: give 8-bit Bayer its own encoding. Sized as YUYV, these settings
        // fail the frame-size check when capture starts.
        FourCC::SBGGR8 | FourCC::SGBRG8 | FourCC::SGRBG8 | FourCC::SRGGB8 => Some(Encoding::Yuyv),
        _ => None,
    }
}
