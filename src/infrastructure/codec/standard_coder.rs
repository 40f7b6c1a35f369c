//! Still-image coder backed by the `image` crate.

use std::io::Cursor;

use bytes::Bytes;
use image::DynamicImage;
use image::codecs::jpeg::JpegEncoder;
use tracing::trace;

use crate::domain::entities::{ImageFormat, WebImage};
use crate::domain::errors::CodecError;
use crate::domain::ports::{CoderOptions, ImageCoder, IncrementalDecoder, ProgressiveImageCoder};

/// JPEG quality used when the caller does not pick one.
const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Decodes JPEG, PNG, GIF (first frame), TIFF and WebP; encodes PNG, JPEG,
/// GIF and TIFF.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardCoder;

impl StandardCoder {
    /// Creates the coder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

/// Decodes `data` as `format`, honoring scale and thumbnail options.
pub(crate) fn decode_still(
    data: &[u8],
    format: ImageFormat,
    options: &CoderOptions,
) -> Result<WebImage, CodecError> {
    let target = format.to_image_format().ok_or(CodecError::UnsupportedFormat)?;
    let bitmap = image::load_from_memory_with_format(data, target)?;
    let bitmap = match options.thumbnail_bytes_limit {
        Some(limit) => scale_down(bitmap, limit),
        None => bitmap,
    };
    Ok(WebImage::new(bitmap, format).with_scale(options.scale_factor))
}

/// Shrinks `bitmap`, keeping its aspect ratio, until its decoded size in
/// RGBA bytes fits `limit`.
fn scale_down(bitmap: DynamicImage, limit: u64) -> DynamicImage {
    let (width, height) = (bitmap.width(), bitmap.height());
    let bytes = u64::from(width) * u64::from(height) * 4;
    if limit == 0 || bytes <= limit {
        return bitmap;
    }
    #[allow(clippy::cast_precision_loss)]
    let ratio = (limit as f64 / bytes as f64).sqrt();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let (w, h) = (
        ((f64::from(width) * ratio).floor() as u32).max(1),
        ((f64::from(height) * ratio).floor() as u32).max(1),
    );
    trace!(from = ?(width, height), to = ?(w, h), "scaling down large image");
    bitmap.thumbnail_exact(w, h)
}

/// Picks the concrete format used when the caller asks for `Undefined`.
pub(crate) const fn resolve_encode_format(format: ImageFormat, has_alpha: bool) -> ImageFormat {
    match format {
        ImageFormat::Undefined if has_alpha => ImageFormat::Png,
        ImageFormat::Undefined => ImageFormat::Jpeg,
        other => other,
    }
}

pub(crate) fn encode_still(
    bitmap: &DynamicImage,
    format: ImageFormat,
    options: &CoderOptions,
) -> Result<Bytes, CodecError> {
    let mut out = Cursor::new(Vec::new());
    match format {
        ImageFormat::Jpeg => {
            let quality = options.compression_quality.map_or(DEFAULT_JPEG_QUALITY, |q| {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let q = (q.clamp(0.0, 1.0) * 100.0).round() as u8;
                q.max(1)
            });
            let encoder = JpegEncoder::new_with_quality(&mut out, quality);
            DynamicImage::ImageRgb8(bitmap.to_rgb8()).write_with_encoder(encoder)?;
        }
        ImageFormat::Gif => {
            DynamicImage::ImageRgba8(bitmap.to_rgba8())
                .write_to(&mut out, image::ImageFormat::Gif)?;
        }
        ImageFormat::Png | ImageFormat::Tiff => {
            let target = format.to_image_format().ok_or(CodecError::UnsupportedFormat)?;
            bitmap.write_to(&mut out, target)?;
        }
        _ => return Err(CodecError::UnsupportedFormat),
    }
    Ok(Bytes::from(out.into_inner()))
}

impl ImageCoder for StandardCoder {
    fn name(&self) -> &'static str {
        "standard"
    }

    fn can_decode(&self, data: &[u8]) -> bool {
        ImageFormat::detect(data).to_image_format().is_some()
    }

    fn decode(&self, data: &Bytes, options: &CoderOptions) -> Result<WebImage, CodecError> {
        decode_still(data, ImageFormat::detect(data), options)
    }

    fn can_encode(&self, format: ImageFormat) -> bool {
        matches!(
            format,
            ImageFormat::Undefined
                | ImageFormat::Jpeg
                | ImageFormat::Png
                | ImageFormat::Gif
                | ImageFormat::Tiff
        )
    }

    fn encode(
        &self,
        image: &WebImage,
        format: ImageFormat,
        options: &CoderOptions,
    ) -> Result<Bytes, CodecError> {
        let format = resolve_encode_format(format, image.has_alpha());
        encode_still(image.bitmap(), format, options)
    }

    fn as_progressive(&self) -> Option<&dyn ProgressiveImageCoder> {
        Some(self)
    }
}

impl ProgressiveImageCoder for StandardCoder {
    fn can_incremental_decode(&self, data: &[u8]) -> bool {
        matches!(
            ImageFormat::detect(data),
            ImageFormat::Jpeg | ImageFormat::Png
        )
    }

    fn incremental_decoder(&self, options: &CoderOptions) -> Box<dyn IncrementalDecoder> {
        Box::new(ProgressiveDecoder {
            options: *options,
            data: Bytes::new(),
            finished: false,
            decoded_len: 0,
        })
    }
}

/// Retries a full decode whenever more bytes have arrived. Truncated input
/// usually fails, so previews are best-effort.
struct ProgressiveDecoder {
    options: CoderOptions,
    data: Bytes,
    finished: bool,
    decoded_len: usize,
}

impl IncrementalDecoder for ProgressiveDecoder {
    fn update(&mut self, data: &Bytes, finished: bool) {
        self.data = data.clone();
        self.finished = finished;
    }

    fn decode_current(&mut self) -> Option<WebImage> {
        if self.data.is_empty() || (self.data.len() == self.decoded_len && !self.finished) {
            return None;
        }
        self.decoded_len = self.data.len();
        let format = ImageFormat::detect(&self.data);
        let image = decode_still(&self.data, format, &self.options).ok()?;
        Some(if self.finished {
            image
        } else {
            image.into_incremental()
        })
    }
}
