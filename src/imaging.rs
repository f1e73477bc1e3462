use std::io::Cursor;

use image::{DynamicImage, ImageFormat, ImageReader, imageops::FilterType};

use crate::error::{ERR_NOT_IMAGE, Error, Result};
use crate::media;

/// Resampling filter shared by ingestion and on-demand preview generation.
pub const PREVIEW_FILTER: FilterType = FilterType::Lanczos3;

/// An image decoded from stored bytes, along with the format its content was
/// sniffed as.
pub struct Decoded {
    pub image: DynamicImage,
    pub format: Option<ImageFormat>,
}

/// Decodes `bytes`, guessing the format from the content rather than from any
/// declared type.
pub fn decode(bytes: &[u8]) -> Result<Decoded> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|err| not_image(&err))?;
    let format = reader.format();
    let image = reader.decode().map_err(|err| not_image(&err))?;
    Ok(Decoded { image, format })
}

/// Resizes to exactly `width`x`height` and encodes the result for a file with
/// the given extension.
///
/// Extensions without an encoder fall back to the sniffed source format, then
/// PNG.
pub fn render_preview(
    decoded: Decoded,
    extension: &str,
    width: u32,
    height: u32,
) -> Result<Vec<u8>> {
    let format = media::encoder_format(extension)
        .or(decoded.format.filter(|format| {
            matches!(
                format,
                ImageFormat::Png
                    | ImageFormat::Jpeg
                    | ImageFormat::Gif
                    | ImageFormat::Bmp
                    | ImageFormat::WebP
            )
        }))
        .unwrap_or(ImageFormat::Png);
    let resized = decoded.image.resize_exact(width, height, PREVIEW_FILTER);
    encode(prepare_for(resized, format), format)
}

pub fn encode(image: DynamicImage, format: ImageFormat) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut output), format)
        .map_err(|err| Error::storage(format!("encode {format:?} failed: {err}")))?;
    Ok(output)
}

fn prepare_for(image: DynamicImage, format: ImageFormat) -> DynamicImage {
    match format {
        ImageFormat::Png => image,
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8()),
        _ => match image {
            DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_) => image,
            other => DynamicImage::ImageRgba8(other.to_rgba8()),
        },
    }
}

fn not_image(err: &dyn std::fmt::Display) -> Error {
    tracing::warn!(error = %err, "payload does not decode as an image");
    Error::unsupported_media_type(ERR_NOT_IMAGE)
}
