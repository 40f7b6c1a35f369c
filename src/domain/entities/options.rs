//! Per-request option flags.

use bitflags::bitflags;

bitflags! {
    /// Independently toggleable request options.
    ///
    /// Every combination is accepted. Where two flags conflict the
    /// precedence is fixed: `FROM_CACHE_ONLY` beats `REFRESH_CACHED`,
    /// `FROM_LOADER_ONLY` skips the cache query entirely,
    /// `DECODE_FIRST_FRAME_ONLY` beats `MATCH_ANIMATED_IMAGE_CLASS` and
    /// `PRELOAD_ALL_FRAMES`, `AVOID_DECODE_IMAGE` disables
    /// `SCALE_DOWN_LARGE_IMAGES` and frame preloading, and progressive
    /// loads ignore `SCALE_DOWN_LARGE_IMAGES` for partial previews.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct WebImageOptions: u32 {
        /// Load even if the URL is on the failed list; success removes it.
        const RETRY_FAILED = 1 << 0;
        /// Queue the download in the low priority lane.
        const LOW_PRIORITY = 1 << 1;
        /// Deliver partial decodes while bytes arrive.
        const PROGRESSIVE_LOAD = 1 << 2;
        /// Deliver a cached hit but still refresh it from the network.
        const REFRESH_CACHED = 1 << 3;
        /// Keep downloading when the host signals it is going to the background.
        const CONTINUE_IN_BACKGROUND = 1 << 4;
        /// Queue the download in the high priority lane.
        const HIGH_PRIORITY = 1 << 7;
        /// Apply the transformer to animated images too.
        const TRANSFORM_ANIMATED_IMAGE = 1 << 9;
        /// Downsample images that exceed the thumbnail byte limit.
        const SCALE_DOWN_LARGE_IMAGES = 1 << 11;
        /// On a memory hit, also read the raw bytes from disk.
        const QUERY_MEMORY_DATA = 1 << 12;
        /// Read raw bytes for a memory hit synchronously.
        const QUERY_MEMORY_DATA_SYNC = 1 << 13;
        /// Read from disk synchronously on a memory miss.
        const QUERY_DISK_DATA_SYNC = 1 << 14;
        /// Never hit the network.
        const FROM_CACHE_ONLY = 1 << 15;
        /// Never query the cache.
        const FROM_LOADER_ONLY = 1 << 16;
        /// Skip post-decode processing (downsampling, frame preloading).
        const AVOID_DECODE_IMAGE = 1 << 18;
        /// Decode only the poster frame of animated data.
        const DECODE_FIRST_FRAME_ONLY = 1 << 19;
        /// Decode every frame of an animated image up front.
        const PRELOAD_ALL_FRAMES = 1 << 20;
        /// Require an animated result when the context expects one.
        const MATCH_ANIMATED_IMAGE_CLASS = 1 << 21;
    }
}

impl WebImageOptions {
    /// True if scaling down applies after the precedence rules.
    #[must_use]
    pub const fn scales_down(self) -> bool {
        self.contains(Self::SCALE_DOWN_LARGE_IMAGES) && !self.contains(Self::AVOID_DECODE_IMAGE)
    }

    /// True if all frames should be decoded eagerly after the precedence rules.
    #[must_use]
    pub const fn preloads_frames(self) -> bool {
        self.contains(Self::PRELOAD_ALL_FRAMES)
            && !self.contains(Self::AVOID_DECODE_IMAGE)
            && !self.contains(Self::DECODE_FIRST_FRAME_ONLY)
    }

    /// True if an animated result is mandatory after the precedence rules.
    #[must_use]
    pub const fn requires_animated(self) -> bool {
        self.contains(Self::MATCH_ANIMATED_IMAGE_CLASS)
            && !self.contains(Self::DECODE_FIRST_FRAME_ONLY)
    }
}
