//! Port definition for image caching.

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::domain::entities::{CacheHit, CacheType, LoadContext, WebImage, WebImageOptions};
use crate::domain::errors::{CacheResult, WebImageError};

/// Port for the two-tier image cache used by the image manager.
/// Implementations must be thread-safe.
#[async_trait]
pub trait ImageCachePort: Send + Sync {
    /// Synchronous memory-only lookup.
    fn query_memory(&self, key: &str) -> Option<WebImage>;

    /// Looks `key` up in the tiers named by `scope`.
    ///
    /// Returns `Ok(None)` on a miss.
    ///
    /// # Errors
    /// `Cancelled` if `cancel` fired before the result was ready, and
    /// `BadImageData` if cached bytes could not be decoded.
    async fn query(
        &self,
        key: &str,
        options: WebImageOptions,
        context: &LoadContext,
        scope: CacheType,
        cancel: &CancellationToken,
    ) -> Result<Option<CacheHit>, WebImageError>;

    /// Stores an image and/or its bytes into the tiers named by `scope`.
    ///
    /// # Errors
    /// Returns `CacheError` if the disk write fails.
    async fn store(
        &self,
        image: Option<WebImage>,
        data: Option<Bytes>,
        key: &str,
        scope: CacheType,
    ) -> CacheResult<()>;

    /// Removes `key` from the tiers named by `scope`.
    async fn remove(&self, key: &str, scope: CacheType);

    /// Reports which tier holds `key`, `CacheType::None` if neither.
    async fn contains(&self, key: &str, scope: CacheType) -> CacheType;

    /// Empties the tiers named by `scope`.
    async fn clear(&self, scope: CacheType);
}
