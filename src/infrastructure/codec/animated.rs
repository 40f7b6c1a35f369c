//! Lazy frame provider for animated GIF data.

use std::io::Cursor;
use std::num::NonZeroUsize;
use std::time::Duration;

use bytes::Bytes;
use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, DynamicImage};
use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::entities::{ImageFormat, WebImage};
use crate::domain::errors::CodecError;
use crate::domain::ports::AnimatedImageProvider;

/// Frames kept decoded unless all frames were preloaded.
const DEFAULT_FRAME_CACHE: usize = 8;

/// Delays at or below this are treated as unset, as browsers do.
const MIN_FRAME_DELAY: Duration = Duration::from_millis(10);
const FALLBACK_FRAME_DELAY: Duration = Duration::from_millis(100);

/// Frame count, delays and loop count read from the GIF block structure
/// without decompressing any pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GifLayout {
    /// Per-frame display durations.
    pub durations: Vec<Duration>,
    /// Loop count, 0 meaning forever.
    pub loop_count: u32,
}

impl GifLayout {
    /// Scans `data`. Returns `None` if it is not a GIF or holds no frames.
    #[must_use]
    pub fn scan(data: &[u8]) -> Option<Self> {
        if data.len() < 13 || !(data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a")) {
            return None;
        }
        let mut pos = 13 + color_table_len(data[10]);
        let mut durations = Vec::new();
        let mut pending_delay = Duration::ZERO;
        let mut loop_count = 1;

        while let Some(&block) = data.get(pos) {
            match block {
                0x21 => {
                    let label = *data.get(pos + 1)?;
                    pos += 2;
                    match label {
                        0xF9 => {
                            let lo = *data.get(pos + 2)?;
                            let hi = *data.get(pos + 3)?;
                            let centis = u64::from(u16::from_le_bytes([lo, hi]));
                            pending_delay = Duration::from_millis(centis * 10);
                        }
                        0xFF if data.get(pos + 1..pos + 12) == Some(b"NETSCAPE2.0") => {
                            let sub = pos + 12;
                            if data.get(sub) == Some(&3) && data.get(sub + 1) == Some(&1) {
                                let lo = *data.get(sub + 2)?;
                                let hi = *data.get(sub + 3)?;
                                loop_count = u32::from(u16::from_le_bytes([lo, hi]));
                            }
                        }
                        _ => {}
                    }
                    pos = skip_sub_blocks(data, pos)?;
                }
                0x2C => {
                    let packed = *data.get(pos + 9)?;
                    pos += 10 + color_table_len(packed) + 1;
                    pos = skip_sub_blocks(data, pos)?;
                    durations.push(normalize_delay(pending_delay));
                    pending_delay = Duration::ZERO;
                }
                _ => break,
            }
        }

        (!durations.is_empty()).then_some(Self {
            durations,
            loop_count,
        })
    }
}

fn color_table_len(packed: u8) -> usize {
    if packed & 0x80 == 0 {
        0
    } else {
        3 * (1 << ((packed & 0x07) + 1))
    }
}

fn skip_sub_blocks(data: &[u8], mut pos: usize) -> Option<usize> {
    loop {
        let size = usize::from(*data.get(pos)?);
        pos += 1;
        if size == 0 {
            return Some(pos);
        }
        pos += size;
    }
}

fn normalize_delay(delay: Duration) -> Duration {
    if delay <= MIN_FRAME_DELAY {
        FALLBACK_FRAME_DELAY
    } else {
        delay
    }
}

/// Animated GIF frames, decoded on demand and kept in a bounded LRU.
pub struct AnimatedGif {
    data: Bytes,
    layout: GifLayout,
    scale: f32,
    frames: Mutex<LruCache<usize, WebImage>>,
}

impl AnimatedGif {
    /// Parses the container layout of `data`.
    ///
    /// # Errors
    /// Returns `CodecError::Decode` if `data` is not a GIF with frames.
    pub fn new(data: Bytes, scale: f32) -> Result<Self, CodecError> {
        let layout = GifLayout::scan(&data)
            .ok_or_else(|| CodecError::Decode("malformed GIF container".to_string()))?;
        let capacity = NonZeroUsize::new(DEFAULT_FRAME_CACHE).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            data,
            layout,
            scale,
            frames: Mutex::new(LruCache::new(capacity)),
        })
    }

    fn decoder(&self) -> Result<GifDecoder<Cursor<Bytes>>, CodecError> {
        Ok(GifDecoder::new(Cursor::new(self.data.clone()))?)
    }

    fn wrap(&self, bitmap: DynamicImage) -> WebImage {
        WebImage::new(bitmap, ImageFormat::Gif).with_scale(self.scale)
    }

    fn decode_frame(&self, index: usize) -> Result<WebImage, CodecError> {
        let frame = self
            .decoder()?
            .into_frames()
            .nth(index)
            .ok_or_else(|| CodecError::Decode(format!("frame {index} out of range")))??;
        Ok(self.wrap(DynamicImage::ImageRgba8(frame.into_buffer())))
    }
}

impl AnimatedImageProvider for AnimatedGif {
    fn animated_data(&self) -> &Bytes {
        &self.data
    }

    fn frame_count(&self) -> usize {
        self.layout.durations.len()
    }

    fn loop_count(&self) -> u32 {
        self.layout.loop_count
    }

    fn frame_at(&self, index: usize) -> Option<WebImage> {
        if index >= self.frame_count() {
            return None;
        }
        if let Some(frame) = self.frames.lock().get(&index) {
            trace!(index, "gif frame cache hit");
            return Some(frame.clone());
        }
        // decode outside the lock; racing callers may decode the same frame twice
        match self.decode_frame(index) {
            Ok(frame) => {
                self.frames.lock().put(index, frame.clone());
                Some(frame)
            }
            Err(e) => {
                debug!(index, error = %e, "gif frame decode failed");
                None
            }
        }
    }

    fn duration_at(&self, index: usize) -> Option<Duration> {
        self.layout.durations.get(index).copied()
    }

    fn preload_all_frames(&self) {
        let count = self.frame_count();
        let Some(capacity) = NonZeroUsize::new(count) else {
            return;
        };
        {
            let mut frames = self.frames.lock();
            if frames.len() == count {
                return;
            }
            frames.resize(capacity);
        }
        let Ok(decoder) = self.decoder() else {
            return;
        };
        for (index, frame) in decoder.into_frames().enumerate() {
            let Ok(frame) = frame else {
                break;
            };
            let image = self.wrap(DynamicImage::ImageRgba8(frame.into_buffer()));
            self.frames.lock().put(index, image);
        }
        debug!(frames = count, "preloaded gif frames");
    }
}

impl std::fmt::Debug for AnimatedGif {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnimatedGif")
            .field("bytes", &self.data.len())
            .field("frames", &self.layout.durations.len())
            .field("loop_count", &self.layout.loop_count)
            .finish_non_exhaustive()
    }
}
