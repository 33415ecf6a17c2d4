//! Encoding conversion for captured YUYV images.

use crate::format::{Encoding, ImageFormat};
use crate::image::Image;
use crate::traits::{CaptureError, Result};

/// Convert a YUYV image to RGB24 (ITU-R BT.601).
///
/// # Errors
///
/// Returns `UnsupportedConversion` unless the image is YUYV.
pub fn yuyv_to_rgb24(image: &Image) -> Result<Image> {
    let mut rgb = converted(image, Encoding::Rgb24)?;
    let source = image.buffer().as_bytes();

    // Two pixels per 4-byte macropixel: Y0 U Y1 V.
    for (yuyv, out) in source
        .chunks_exact(4)
        .zip(rgb.buffer_mut().as_bytes_mut().chunks_exact_mut(6))
    {
        if let &[y0, u, y1, v] = yuyv {
            let (r0, g0, b0) = yuv_to_rgb(y0, u, v);
            let (r1, g1, b1) = yuv_to_rgb(y1, u, v);
            out.copy_from_slice(&[r0, g0, b0, r1, g1, b1]);
        }
    }
    Ok(rgb)
}

/// Extract the luma plane of a YUYV image as Grayscale8.
///
/// # Errors
///
/// Returns `UnsupportedConversion` unless the image is YUYV.
pub fn yuyv_to_grayscale(image: &Image) -> Result<Image> {
    let mut gray = converted(image, Encoding::Grayscale8)?;
    gray.buffer_mut()
        .as_bytes_mut()
        .iter_mut()
        .zip(image.buffer().as_bytes().iter().step_by(2))
        .for_each(|(out, &luma)| *out = luma);
    Ok(gray)
}

fn converted(image: &Image, to: Encoding) -> Result<Image> {
    let format = image.format();
    if format.encoding() != Encoding::Yuyv {
        return Err(CaptureError::UnsupportedConversion {
            from: format.encoding_name(),
            to: to.name(),
        });
    }
    Ok(Image::new(ImageFormat::new(format.width(), format.height(), to)))
}

#[allow(clippy::many_single_char_names)]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y = f32::from(y);
    let u = f32::from(u) - 128.0;
    let v = f32::from(v) - 128.0;

    let r = 1.402f32.mul_add(v, y);
    let g = 0.714_14f32.mul_add(-v, 0.344_14f32.mul_add(-u, y));
    let b = 1.772f32.mul_add(u, y);

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let clamp = |value: f32| value.round().clamp(0.0, 255.0) as u8;
    (clamp(r), clamp(g), clamp(b))
}
