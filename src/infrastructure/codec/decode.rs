//! Option-aware decoding shared by the cache and the downloader.

use bytes::Bytes;

use super::CodersManager;
use crate::domain::entities::{LoadContext, WebImage, WebImageOptions, scale_factor_for_key};
use crate::domain::errors::WebImageError;
use crate::domain::ports::{CoderOptions, ImageCoder};

/// Decoded size ceiling used by scale-down when the context sets none.
pub const DEFAULT_THUMBNAIL_BYTES_LIMIT: u64 = 60 * 1024 * 1024;

/// Builds coder options from load options and context.
#[must_use]
pub fn coder_options(
    key: Option<&str>,
    options: WebImageOptions,
    context: &LoadContext,
) -> CoderOptions {
    let scale_factor = context
        .image_scale_factor
        .unwrap_or_else(|| key.map_or(1.0, scale_factor_for_key));
    let thumbnail_bytes_limit = options
        .scales_down()
        .then(|| {
            context
                .thumbnail_bytes_limit
                .unwrap_or(DEFAULT_THUMBNAIL_BYTES_LIMIT)
        });
    CoderOptions {
        decode_first_frame_only: options.contains(WebImageOptions::DECODE_FIRST_FRAME_ONLY),
        scale_factor,
        thumbnail_bytes_limit,
        ..CoderOptions::default()
    }
}

/// Decodes `data` with the registered coders and applies the post-decode
/// options.
///
/// # Errors
/// `BadImageData` if the data is empty, no coder accepts it, or an
/// animated image was required but a still one came out.
pub fn decode_image_data(
    data: &Bytes,
    key: Option<&str>,
    options: WebImageOptions,
    context: &LoadContext,
    coders: &CodersManager,
) -> Result<WebImage, WebImageError> {
    if data.is_empty() {
        return Err(WebImageError::bad_data("image data is empty"));
    }
    let coder_options = coder_options(key, options, context);
    let image = coders.decode(data, &coder_options)?;
    if options.preloads_frames() {
        if let Some(animation) = image.animation() {
            animation.preload_all_frames();
        }
    }
    if options.requires_animated() && !image.is_animated() {
        return Err(WebImageError::bad_data("expected an animated image"));
    }
    Ok(image)
}
