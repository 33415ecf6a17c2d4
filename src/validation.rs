//! Test-pattern checks for captured images.
//!
//! These check that a frame really made it from the driver into the captured
//! image, e.g. from a vivid virtual camera or the mock device's patterns.

use crate::format::Encoding;
use crate::image::Image;
use crate::traits::{CaptureError, Result};

/// YUYV samples of the eight SMPTE bars: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black.
pub(crate) const SMPTE_COLOR_BARS_YUV: [(u8, u8, u8); 8] = [
    (235, 128, 128),
    (210, 16, 146),
    (170, 166, 16),
    (145, 54, 34),
    (106, 202, 222),
    (81, 90, 240),
    (41, 240, 110),
    (16, 128, 128),
];

/// Per-channel tolerance when matching bar colors.
const COLOR_TOLERANCE: u8 = 15;

/// Smallest left-to-right luma rise accepted as a gradient.
const MIN_GRADIENT_RISE: i32 = 50;

/// Validates that a YUYV image holds the SMPTE color bar pattern.
///
/// Samples the center of each of the eight vertical bars on the middle row.
///
/// # Errors
///
/// Returns `Validation` if the image is not YUYV, is too small to sample, or
/// any bar differs from its expected color by more than the tolerance.
pub fn validate_color_bars(image: &Image) -> Result<()> {
    let format = image.format();
    if format.encoding() != Encoding::Yuyv {
        return Err(CaptureError::Validation(format!(
            "color bars need YUYV, image is {}",
            format.encoding_name()
        )));
    }

    let bar_width = format.width() / 8;
    let center_y = format.height() / 2;

    for (bar, expected) in SMPTE_COLOR_BARS_YUV.iter().enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        let x = (bar as u32 * bar_width) + (bar_width / 2);
        let actual = yuv_at(image, x, center_y).ok_or_else(|| {
            CaptureError::Validation(format!("no pixel at ({x}, {center_y})"))
        })?;

        if !colors_match(actual, *expected, COLOR_TOLERANCE) {
            return Err(CaptureError::Validation(format!(
                "color bar {bar} mismatch at ({x}, {center_y}): \
                 expected YUV{expected:?}, got YUV{actual:?}"
            )));
        }
    }

    Ok(())
}

/// Validates that luma rises from left to right along the middle row.
///
/// Works on YUYV and 8-bit grayscale images. Samples every 10 pixels, allows
/// a one-step dip for rounding, and requires an overall rise.
///
/// # Errors
///
/// Returns `Validation` if the image has another encoding, the luma falls
/// anywhere along the row, or the total rise is too small.
pub fn validate_gradient(image: &Image) -> Result<()> {
    let format = image.format();
    let center_y = format.height() / 2;

    let mut samples = Vec::new();
    for x in (0..format.width()).step_by(10) {
        let luma = luma_at(image, x, center_y).ok_or_else(|| {
            CaptureError::Validation(format!(
                "no luma at ({x}, {center_y}) in a {} image",
                format.encoding_name()
            ))
        })?;
        samples.push((x, i32::from(luma)));
    }

    for pair in samples.windows(2) {
        let (_, previous) = pair[0];
        let (x, luma) = pair[1];
        if luma < previous - 1 {
            return Err(CaptureError::Validation(format!(
                "gradient falls at x={x}: luma {luma} < previous {previous}"
            )));
        }
    }

    let rise = match (samples.first(), samples.last()) {
        (Some(&(_, first)), Some(&(_, last))) => last - first,
        _ => 0,
    };
    if rise < MIN_GRADIENT_RISE {
        return Err(CaptureError::Validation(format!(
            "insufficient luma rise for a gradient: {rise} (expected at least {MIN_GRADIENT_RISE})"
        )));
    }

    Ok(())
}

/// Validates that sequence numbers increase by exactly one.
///
/// # Errors
///
/// Returns `Validation` if `sequence` is empty or has a gap.
pub fn validate_sequence(sequence: &[u32]) -> Result<()> {
    if sequence.is_empty() {
        return Err(CaptureError::Validation(
            "cannot validate an empty frame sequence".to_owned(),
        ));
    }

    for (index, pair) in sequence.windows(2).enumerate() {
        let expected = pair[0].wrapping_add(1);
        if pair[1] != expected {
            return Err(CaptureError::Validation(format!(
                "frame sequence gap at index {}: expected {expected}, got {}",
                index + 1,
                pair[1]
            )));
        }
    }

    Ok(())
}

/// Luma of pixel (x, y) for YUYV and 8-bit grayscale images.
#[must_use]
pub fn luma_at(image: &Image, x: u32, y: u32) -> Option<u8> {
    let format = image.format();
    if x >= format.width() || y >= format.height() {
        return None;
    }
    let offset = y as usize * format.bytes_per_line() as usize;
    let bytes = image.buffer().as_bytes();
    match format.encoding() {
        Encoding::Grayscale8 => bytes.get(offset + x as usize).copied(),
        Encoding::Yuyv => bytes.get(offset + x as usize * 2).copied(),
        Encoding::Rgb24 | Encoding::Bits32 => None,
    }
}

/// Y, U and V of pixel (x, y) in a YUYV image.
fn yuv_at(image: &Image, x: u32, y: u32) -> Option<(u8, u8, u8)> {
    let luma = luma_at(image, x, y)?;
    let format = image.format();
    // Each 4-byte macropixel is Y0 U Y1 V, shared by an even/odd pixel pair.
    let pair = y as usize * format.bytes_per_line() as usize + (x as usize & !1) * 2;
    let chroma = image.buffer().as_bytes().get(pair..pair + 4)?;
    Some((luma, chroma[1], chroma[3]))
}

fn colors_match(actual: (u8, u8, u8), expected: (u8, u8, u8), tolerance: u8) -> bool {
    actual.0.abs_diff(expected.0) <= tolerance
        && actual.1.abs_diff(expected.1) <= tolerance
        && actual.2.abs_diff(expected.2) <= tolerance
}
