//! Decoded image handle shared between cache tiers and callers.

use std::sync::{Arc, Weak};

use bytes::Bytes;
use image::DynamicImage;

use super::{CacheType, ImageFormat};
use crate::domain::ports::AnimatedImageProvider;

/// Bytes per pixel used for memory cost accounting.
const BYTES_PER_PIXEL: u64 = 4;

struct ImageData {
    bitmap: DynamicImage,
    format: ImageFormat,
    scale: f32,
    incremental: bool,
    animation: Option<Arc<dyn AnimatedImageProvider>>,
}

/// A decoded bitmap plus the metadata the pipeline carries along with it.
///
/// Cloning is cheap; every clone refers to the same pixels. Memory cache
/// residency and the weak secondary index both track this shared allocation.
#[derive(Clone)]
pub struct WebImage {
    inner: Arc<ImageData>,
}

impl WebImage {
    /// Wraps a still bitmap.
    #[must_use]
    pub fn new(bitmap: DynamicImage, format: ImageFormat) -> Self {
        Self::from_parts(bitmap, format, 1.0, false, None)
    }

    /// Wraps the poster frame of an animated image together with its frame provider.
    #[must_use]
    pub fn animated(
        poster: DynamicImage,
        format: ImageFormat,
        provider: Arc<dyn AnimatedImageProvider>,
    ) -> Self {
        Self::from_parts(poster, format, 1.0, false, Some(provider))
    }

    fn from_parts(
        bitmap: DynamicImage,
        format: ImageFormat,
        scale: f32,
        incremental: bool,
        animation: Option<Arc<dyn AnimatedImageProvider>>,
    ) -> Self {
        Self {
            inner: Arc::new(ImageData {
                bitmap,
                format,
                scale,
                incremental,
                animation,
            }),
        }
    }

    /// Returns the image tagged with the given display scale.
    #[must_use]
    pub fn with_scale(self, scale: f32) -> Self {
        let scale = if scale.is_finite() && scale >= 1.0 { scale } else { 1.0 };
        if (self.inner.scale - scale).abs() < f32::EPSILON {
            return self;
        }
        match Arc::try_unwrap(self.inner) {
            Ok(mut data) => {
                data.scale = scale;
                Self {
                    inner: Arc::new(data),
                }
            }
            Err(shared) => Self::from_parts(
                shared.bitmap.clone(),
                shared.format,
                scale,
                shared.incremental,
                shared.animation.clone(),
            ),
        }
    }

    /// Returns a copy marked as a partial, progressive preview.
    #[must_use]
    pub fn into_incremental(self) -> Self {
        match Arc::try_unwrap(self.inner) {
            Ok(mut data) => {
                data.incremental = true;
                Self {
                    inner: Arc::new(data),
                }
            }
            Err(shared) => Self::from_parts(
                shared.bitmap.clone(),
                shared.format,
                shared.scale,
                true,
                shared.animation.clone(),
            ),
        }
    }

    /// Returns a still copy holding only the poster frame.
    #[must_use]
    pub fn first_frame(&self) -> Self {
        if self.inner.animation.is_none() {
            return self.clone();
        }
        Self::from_parts(
            self.inner.bitmap.clone(),
            self.inner.format,
            self.inner.scale,
            self.inner.incremental,
            None,
        )
    }

    /// The decoded pixels (the poster frame for animated images).
    #[must_use]
    pub fn bitmap(&self) -> &DynamicImage {
        &self.inner.bitmap
    }

    /// Pixel width.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.inner.bitmap.width()
    }

    /// Pixel height.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.inner.bitmap.height()
    }

    /// The format the image was decoded from.
    #[must_use]
    pub fn format(&self) -> ImageFormat {
        self.inner.format
    }

    /// Display scale factor (1.0 unless derived from the key or context).
    #[must_use]
    pub fn scale(&self) -> f32 {
        self.inner.scale
    }

    /// True for progressive previews produced before the download finished.
    #[must_use]
    pub fn is_incremental(&self) -> bool {
        self.inner.incremental
    }

    /// True if the bitmap carries an alpha channel.
    #[must_use]
    pub fn has_alpha(&self) -> bool {
        self.inner.bitmap.color().has_alpha()
    }

    /// The frame provider of an animated image.
    #[must_use]
    pub fn animation(&self) -> Option<&Arc<dyn AnimatedImageProvider>> {
        self.inner.animation.as_ref()
    }

    /// True if the image has more than one frame.
    #[must_use]
    pub fn is_animated(&self) -> bool {
        self.inner.animation.is_some()
    }

    /// Number of frames (1 for still images).
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.inner
            .animation
            .as_ref()
            .map_or(1, |a| a.frame_count().max(1))
    }

    /// Approximate resident size in bytes, used for memory cache cost limits.
    #[must_use]
    pub fn memory_cost(&self) -> u64 {
        let pixels = u64::from(self.width()) * u64::from(self.height());
        pixels * BYTES_PER_PIXEL * self.frame_count() as u64
    }

    /// Creates a non-owning reference.
    #[must_use]
    pub fn downgrade(&self) -> WeakImage {
        WeakImage(Arc::downgrade(&self.inner))
    }

    /// True if both handles refer to the same decoded allocation.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl std::fmt::Debug for WebImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebImage")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("format", &self.inner.format)
            .field("scale", &self.inner.scale)
            .field("frames", &self.frame_count())
            .field("incremental", &self.inner.incremental)
            .finish()
    }
}

/// Non-owning reference to a [`WebImage`].
#[derive(Clone)]
pub struct WeakImage(Weak<ImageData>);

impl WeakImage {
    /// Returns the image if some other owner still keeps it alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<WebImage> {
        self.0.upgrade().map(|inner| WebImage { inner })
    }

    /// True once every strong owner is gone.
    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.0.strong_count() == 0
    }
}

impl std::fmt::Debug for WeakImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("WeakImage")
            .field(&self.0.strong_count())
            .finish()
    }
}

/// Outcome of a cache lookup.
#[derive(Debug, Clone)]
pub struct CacheHit {
    /// The decoded image, absent when only raw bytes were requested and found.
    pub image: Option<WebImage>,
    /// Raw bytes, present when read from disk.
    pub data: Option<Bytes>,
    /// The tier that answered.
    pub cache_type: CacheType,
}
