//! Animated GIF coder.

use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, Frame};

use super::animated::AnimatedGif;
use super::standard_coder::{decode_still, encode_still};
use crate::domain::entities::{ImageFormat, WebImage};
use crate::domain::errors::CodecError;
use crate::domain::ports::{
    AnimatedImageCoder, AnimatedImageProvider, CoderOptions, ImageCoder,
};

/// Decodes GIF data into animated images with lazily decoded frames and
/// encodes animated images back into GIF.
#[derive(Debug, Default, Clone, Copy)]
pub struct GifCoder;

impl GifCoder {
    /// Creates the coder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ImageCoder for GifCoder {
    fn name(&self) -> &'static str {
        "gif"
    }

    fn can_decode(&self, data: &[u8]) -> bool {
        ImageFormat::detect(data) == ImageFormat::Gif
    }

    fn decode(&self, data: &Bytes, options: &CoderOptions) -> Result<WebImage, CodecError> {
        if options.decode_first_frame_only {
            return decode_still(data, ImageFormat::Gif, options);
        }
        let provider = self.animated_provider(data.clone(), options)?;
        if provider.frame_count() <= 1 {
            return decode_still(data, ImageFormat::Gif, options);
        }
        let poster = provider
            .frame_at(0)
            .ok_or_else(|| CodecError::Decode("GIF has no decodable frame".to_string()))?;
        Ok(
            WebImage::animated(poster.bitmap().clone(), ImageFormat::Gif, provider)
                .with_scale(options.scale_factor),
        )
    }

    fn can_encode(&self, format: ImageFormat) -> bool {
        format == ImageFormat::Gif
    }

    fn encode(
        &self,
        image: &WebImage,
        format: ImageFormat,
        options: &CoderOptions,
    ) -> Result<Bytes, CodecError> {
        if format != ImageFormat::Gif {
            return Err(CodecError::UnsupportedFormat);
        }
        let Some(animation) = image.animation().filter(|_| !options.encode_first_frame_only)
        else {
            return encode_still(image.bitmap(), ImageFormat::Gif, options);
        };
        if image.format() == ImageFormat::Gif {
            return Ok(animation.animated_data().clone());
        }

        let mut out = Cursor::new(Vec::new());
        {
            let mut encoder = GifEncoder::new(&mut out);
            let repeat = match u16::try_from(animation.loop_count()) {
                Ok(0) | Err(_) => Repeat::Infinite,
                Ok(n) => Repeat::Finite(n),
            };
            encoder.set_repeat(repeat)?;
            for index in 0..animation.frame_count() {
                let frame = animation
                    .frame_at(index)
                    .ok_or_else(|| CodecError::Encode(format!("frame {index} unavailable")))?;
                let delay = animation
                    .duration_at(index)
                    .map_or_else(|| Delay::from_numer_denom_ms(100, 1), Delay::from_saturating_duration);
                encoder.encode_frame(Frame::from_parts(frame.bitmap().to_rgba8(), 0, 0, delay))?;
            }
        }
        Ok(Bytes::from(out.into_inner()))
    }

    fn as_animated(&self) -> Option<&dyn AnimatedImageCoder> {
        Some(self)
    }
}

impl AnimatedImageCoder for GifCoder {
    fn animated_provider(
        &self,
        data: Bytes,
        options: &CoderOptions,
    ) -> Result<Arc<dyn AnimatedImageProvider>, CodecError> {
        Ok(Arc::new(AnimatedGif::new(data, options.scale_factor)?))
    }
}
