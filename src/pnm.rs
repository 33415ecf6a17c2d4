//! Binary portable bitmaps: PGM (`P5`) in and out, PPM (`P6`) out.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use log::debug;

use crate::format::{Encoding, ImageFormat};
use crate::image::Image;
use crate::traits::{CaptureError, Result};

/// Read a binary PGM file into a Grayscale8 image.
///
/// # Errors
///
/// Returns `Io` if the file cannot be read and `Bitmap` if it is not an
/// 8-bit binary PGM.
pub fn read_pgm<P: AsRef<Path>>(path: P) -> Result<Image> {
    let path = path.as_ref();
    let image = read_pgm_from(BufReader::new(File::open(path)?))?;
    debug!("read {} from {}", image.format(), path.display());
    Ok(image)
}

/// Read a binary PGM from `reader`.
///
/// The header is `P5`, width, height and max value separated by whitespace,
/// with `#` comments allowed between fields. A single whitespace byte
/// separates the header from the pixel data.
///
/// # Errors
///
/// Returns `Bitmap` for a malformed header, a zero size, an image too large
/// to address, a max value above 255 or truncated pixel data.
pub fn read_pgm_from<R: BufRead>(mut reader: R) -> Result<Image> {
    let magic = read_token(&mut reader)?;
    if magic != "P5" {
        return Err(CaptureError::Bitmap(format!(
            "expected binary PGM magic 'P5', found '{magic}'"
        )));
    }

    let width = read_number(&mut reader, "width")?;
    let height = read_number(&mut reader, "height")?;
    let max_value = read_number(&mut reader, "max value")?;
    if width == 0 || height == 0 {
        return Err(CaptureError::Bitmap(format!(
            "invalid image size {width}x{height}"
        )));
    }
    if max_value == 0 || max_value > 255 {
        return Err(CaptureError::Bitmap(format!(
            "max value {max_value} unsupported, only 1-byte samples are"
        )));
    }

    let format = ImageFormat::new(width, height, Encoding::Grayscale8);
    let Some(size) = format.checked_data_size_in_bytes() else {
        return Err(CaptureError::Bitmap(format!(
            "image size {width}x{height} is too large"
        )));
    };

    // Grows with the data actually present, so a lying header allocates nothing up front.
    let mut pixels = Vec::new();
    reader.take(u64::from(size)).read_to_end(&mut pixels)?;
    if u64::try_from(pixels.len()).ok() != Some(u64::from(size)) {
        return Err(CaptureError::Bitmap(format!(
            "truncated pixel data for {width}x{height} image"
        )));
    }
    let mut image = Image::new(format);
    image.buffer_mut().copy_from(&pixels)?;
    Ok(image)
}

/// Write a Grayscale8 image as a binary PGM file.
///
/// # Errors
///
/// Returns `Bitmap` without creating the file if the image is not Grayscale8,
/// and `Io` if writing fails.
pub fn write_pgm<P: AsRef<Path>>(path: P, image: &Image) -> Result<()> {
    check_encoding(image, Encoding::Grayscale8, "PGM")?;
    write_file(path.as_ref(), image, |writer, image| write_pgm_to(writer, image))
}

/// Write a Grayscale8 image as a binary PGM to `writer`.
///
/// # Errors
///
/// Returns `Bitmap` if the image is not Grayscale8, and `Io` if writing fails.
pub fn write_pgm_to<W: Write>(writer: W, image: &Image) -> Result<()> {
    check_encoding(image, Encoding::Grayscale8, "PGM")?;
    write_binary(writer, "P5", image)
}

/// Write an RGB24 image as a binary PPM file.
///
/// # Errors
///
/// Returns `Bitmap` without creating the file if the image is not RGB24,
/// and `Io` if writing fails.
pub fn write_ppm<P: AsRef<Path>>(path: P, image: &Image) -> Result<()> {
    check_encoding(image, Encoding::Rgb24, "PPM")?;
    write_file(path.as_ref(), image, |writer, image| write_ppm_to(writer, image))
}

/// Write an RGB24 image as a binary PPM to `writer`.
///
/// # Errors
///
/// Returns `Bitmap` if the image is not RGB24, and `Io` if writing fails.
pub fn write_ppm_to<W: Write>(writer: W, image: &Image) -> Result<()> {
    check_encoding(image, Encoding::Rgb24, "PPM")?;
    write_binary(writer, "P6", image)
}

fn check_encoding(image: &Image, encoding: Encoding, kind: &str) -> Result<()> {
    let actual = image.format().encoding();
    if actual == encoding {
        return Ok(());
    }
    Err(CaptureError::Bitmap(format!(
        "{kind} needs {} pixels, image is {}",
        encoding.name(),
        actual.name()
    )))
}

fn write_file<F>(path: &Path, image: &Image, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>, &Image) -> Result<()>,
{
    let mut writer = BufWriter::new(File::create(path)?);
    write(&mut writer, image)?;
    writer.flush()?;
    debug!("wrote {} to {}", image.format(), path.display());
    Ok(())
}

fn write_binary<W: Write>(mut writer: W, magic: &str, image: &Image) -> Result<()> {
    let format = image.format();
    write!(writer, "{magic}\n{} {}\n255\n", format.width(), format.height())?;
    writer.write_all(image.buffer().as_bytes())?;
    Ok(())
}

fn next_byte<R: BufRead>(reader: &mut R) -> Result<Option<u8>> {
    let mut byte = [0u8; 1];
    match reader.read(&mut byte) {
        Ok(0) => Ok(None),
        Ok(_) => Ok(Some(byte[0])),
        Err(err) if err.kind() == io::ErrorKind::Interrupted => next_byte(reader),
        Err(err) => Err(err.into()),
    }
}

/// Next whitespace-delimited header field, skipping comments.
///
/// Consumes exactly one whitespace byte after the field.
fn read_token<R: BufRead>(reader: &mut R) -> Result<String> {
    let mut token = Vec::new();
    loop {
        let Some(byte) = next_byte(reader)? else {
            break;
        };
        if byte == b'#' && token.is_empty() {
            let mut comment = Vec::new();
            reader.read_until(b'\n', &mut comment)?;
        } else if byte.is_ascii_whitespace() {
            if !token.is_empty() {
                break;
            }
        } else {
            token.push(byte);
        }
    }

    if token.is_empty() {
        return Err(CaptureError::Bitmap("unexpected end of header".to_owned()));
    }
    String::from_utf8(token)
        .map_err(|_| CaptureError::Bitmap("header is not ASCII".to_owned()))
}

fn read_number<R: BufRead>(reader: &mut R, field: &str) -> Result<u32> {
    let token = read_token(reader)?;
    token
        .parse()
        .map_err(|_| CaptureError::Bitmap(format!("invalid {field} '{token}'")))
}
