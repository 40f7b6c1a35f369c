//! Per-load context carrying optional collaborators and overrides.

use std::sync::Arc;

use super::{CacheType, WebImage};
use crate::domain::ports::{CacheKeyFilter, CacheSerializer, ImageTransformer, RequestModifier};

/// Optional per-request overrides. Fields left empty fall back to the
/// defaults of the component that reads them.
#[derive(Clone, Default)]
pub struct LoadContext {
    /// Custom cache key derivation.
    pub cache_key_filter: Option<Arc<dyn CacheKeyFilter>>,
    /// Custom disk serialization.
    pub cache_serializer: Option<Arc<dyn CacheSerializer>>,
    /// Image post-processing applied after download.
    pub transformer: Option<Arc<dyn ImageTransformer>>,
    /// Download request rewriting.
    pub request_modifier: Option<Arc<dyn RequestModifier>>,
    /// Scope used when storing the final image.
    pub store_cache_type: Option<CacheType>,
    /// Scope used when storing the untransformed original.
    pub original_store_cache_type: Option<CacheType>,
    /// Tiers consulted by the cache query.
    pub query_cache_type: Option<CacheType>,
    /// Display scale forced on decoded images.
    pub image_scale_factor: Option<f32>,
    /// Decoded size ceiling applied when scaling down large images.
    pub thumbnail_bytes_limit: Option<u64>,
    /// Cached image handed to the loader on refresh.
    pub loader_cached_image: Option<WebImage>,
}

impl LoadContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cache key filter.
    #[must_use]
    pub fn with_cache_key_filter(mut self, filter: Arc<dyn CacheKeyFilter>) -> Self {
        self.cache_key_filter = Some(filter);
        self
    }

    /// Sets the cache serializer.
    #[must_use]
    pub fn with_cache_serializer(mut self, serializer: Arc<dyn CacheSerializer>) -> Self {
        self.cache_serializer = Some(serializer);
        self
    }

    /// Sets the transformer.
    #[must_use]
    pub fn with_transformer(mut self, transformer: Arc<dyn ImageTransformer>) -> Self {
        self.transformer = Some(transformer);
        self
    }

    /// Sets the request modifier.
    #[must_use]
    pub fn with_request_modifier(mut self, modifier: Arc<dyn RequestModifier>) -> Self {
        self.request_modifier = Some(modifier);
        self
    }

    /// Sets the store scope.
    #[must_use]
    pub const fn with_store_cache_type(mut self, scope: CacheType) -> Self {
        self.store_cache_type = Some(scope);
        self
    }

    /// Sets the original store scope.
    #[must_use]
    pub const fn with_original_store_cache_type(mut self, scope: CacheType) -> Self {
        self.original_store_cache_type = Some(scope);
        self
    }

    /// Sets the query scope.
    #[must_use]
    pub const fn with_query_cache_type(mut self, scope: CacheType) -> Self {
        self.query_cache_type = Some(scope);
        self
    }

    /// Sets the forced display scale.
    #[must_use]
    pub const fn with_image_scale_factor(mut self, scale: f32) -> Self {
        self.image_scale_factor = Some(scale);
        self
    }

    /// Sets the thumbnail byte limit.
    #[must_use]
    pub const fn with_thumbnail_bytes_limit(mut self, limit: u64) -> Self {
        self.thumbnail_bytes_limit = Some(limit);
        self
    }
}

impl std::fmt::Debug for LoadContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadContext")
            .field("cache_key_filter", &self.cache_key_filter.is_some())
            .field("cache_serializer", &self.cache_serializer.is_some())
            .field(
                "transformer",
                &self.transformer.as_ref().map(|t| t.key()),
            )
            .field("request_modifier", &self.request_modifier.is_some())
            .field("store_cache_type", &self.store_cache_type)
            .field("original_store_cache_type", &self.original_store_cache_type)
            .field("query_cache_type", &self.query_cache_type)
            .field("image_scale_factor", &self.image_scale_factor)
            .field("thumbnail_bytes_limit", &self.thumbnail_bytes_limit)
            .field("loader_cached_image", &self.loader_cached_image)
            .finish()
    }
}
