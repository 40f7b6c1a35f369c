//! Port definitions for image coders.

use std::time::Duration;

use bytes::Bytes;

use crate::domain::entities::{ImageFormat, WebImage};
use crate::domain::errors::CodecError;

/// Options passed to a single decode or encode call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoderOptions {
    /// Produce a still image even for animated data.
    pub decode_first_frame_only: bool,
    /// Display scale attached to decoded images.
    pub scale_factor: f32,
    /// Downsample so the decoded bitmap stays under this many bytes.
    pub thumbnail_bytes_limit: Option<u64>,
    /// Lossy encoder quality in `0.0..=1.0`.
    pub compression_quality: Option<f32>,
    /// Encode only the poster frame of animated images.
    pub encode_first_frame_only: bool,
}

impl Default for CoderOptions {
    fn default() -> Self {
        Self {
            decode_first_frame_only: false,
            scale_factor: 1.0,
            thumbnail_bytes_limit: None,
            compression_quality: None,
            encode_first_frame_only: false,
        }
    }
}

/// Translates between encoded bytes and decoded images.
///
/// Implementations must be thread-safe; one instance serves every request.
pub trait ImageCoder: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Returns true if this coder understands `data`.
    fn can_decode(&self, data: &[u8]) -> bool;

    /// Decodes `data`.
    ///
    /// # Errors
    /// Returns `CodecError` if the bytes cannot be decoded.
    fn decode(&self, data: &Bytes, options: &CoderOptions) -> Result<WebImage, CodecError>;

    /// Returns true if this coder can produce `format`.
    fn can_encode(&self, format: ImageFormat) -> bool;

    /// Encodes `image` as `format`.
    ///
    /// # Errors
    /// Returns `CodecError` if encoding fails.
    fn encode(
        &self,
        image: &WebImage,
        format: ImageFormat,
        options: &CoderOptions,
    ) -> Result<Bytes, CodecError>;

    /// Progressive decoding capability, if any.
    fn as_progressive(&self) -> Option<&dyn ProgressiveImageCoder> {
        None
    }

    /// Animated frame access capability, if any.
    fn as_animated(&self) -> Option<&dyn AnimatedImageCoder> {
        None
    }
}

/// A coder that can decode partially downloaded data.
pub trait ProgressiveImageCoder: ImageCoder {
    /// Returns true if incremental decoding applies to `data`.
    fn can_incremental_decode(&self, data: &[u8]) -> bool;

    /// Creates a fresh stateful decoder for one download.
    fn incremental_decoder(&self, options: &CoderOptions) -> Box<dyn IncrementalDecoder>;
}

/// Per-download progressive decode state. Never shared between downloads.
pub trait IncrementalDecoder: Send {
    /// Feeds the cumulative bytes received so far.
    fn update(&mut self, data: &Bytes, finished: bool);

    /// Best-effort decode of the current bytes. After a `finished` update
    /// this is the authoritative result.
    fn decode_current(&mut self) -> Option<WebImage>;
}

/// A coder that exposes frames of animated data individually.
pub trait AnimatedImageCoder: ImageCoder {
    /// Creates a frame provider over `data`.
    ///
    /// # Errors
    /// Returns `CodecError` if the container cannot be parsed.
    fn animated_provider(
        &self,
        data: Bytes,
        options: &CoderOptions,
    ) -> Result<std::sync::Arc<dyn AnimatedImageProvider>, CodecError>;
}

/// Lazy, index-addressed access to the frames of one animated container.
///
/// Calls may be repeated, out of order, and concurrent.
pub trait AnimatedImageProvider: Send + Sync {
    /// The original encoded bytes.
    fn animated_data(&self) -> &Bytes;

    /// Number of frames.
    fn frame_count(&self) -> usize;

    /// Loop count, 0 meaning forever.
    fn loop_count(&self) -> u32;

    /// Decodes (or returns the cached) frame at `index`.
    fn frame_at(&self, index: usize) -> Option<WebImage>;

    /// Display duration of the frame at `index`.
    fn duration_at(&self, index: usize) -> Option<Duration>;

    /// Decodes every frame and keeps them resident.
    fn preload_all_frames(&self);
}
