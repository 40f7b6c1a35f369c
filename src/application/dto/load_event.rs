//! Events delivered to the caller of a managed load.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use url::Url;

use crate::domain::entities::{CacheType, WebImage};
use crate::domain::errors::WebImageError;
use crate::domain::ports::Cancellable;

/// One delivered image.
#[derive(Debug, Clone)]
pub struct ImageResult {
    /// The image, `None` on a cache-only miss.
    pub image: Option<WebImage>,
    /// Raw bytes, when known.
    pub data: Option<Bytes>,
    /// Tier the image came from, `None` for network results.
    pub cache_type: CacheType,
    /// Requested URL.
    pub url: Url,
    /// False for previews that a later event supersedes.
    pub finished: bool,
}

/// Events of one load: any number of progress and partial events, then
/// exactly one `Completed`. A cancelled load ends without `Completed`.
#[derive(Debug, Clone)]
pub enum LoadEvent {
    /// Download progress.
    Progress {
        /// Bytes received.
        received: u64,
        /// Expected total, if known.
        expected: Option<u64>,
        /// Requested URL.
        url: Url,
    },
    /// A non-final image: a progressive preview or the cached image of a
    /// refresh.
    Partial(ImageResult),
    /// Terminal event.
    Completed(Result<ImageResult, WebImageError>),
}

/// Caller side of a managed load.
pub struct ImageLoad {
    operation: Arc<dyn Cancellable>,
    events: mpsc::UnboundedReceiver<LoadEvent>,
}

impl ImageLoad {
    /// Pairs an operation with its event stream.
    #[must_use]
    pub fn new(operation: Arc<dyn Cancellable>, events: mpsc::UnboundedReceiver<LoadEvent>) -> Self {
        Self { operation, events }
    }

    /// Cancellation handle spanning the cache and loader phases.
    #[must_use]
    pub fn operation(&self) -> &Arc<dyn Cancellable> {
        &self.operation
    }

    /// Cancels the load. Idempotent.
    pub fn cancel(&self) {
        self.operation.cancel();
    }

    /// Next event, `None` once the stream ended.
    pub async fn next_event(&mut self) -> Option<LoadEvent> {
        self.events.recv().await
    }

    /// Waits for the terminal event.
    ///
    /// # Errors
    /// The load error, or `Cancelled` if the stream ended without one.
    pub async fn wait(mut self) -> Result<ImageResult, WebImageError> {
        while let Some(event) = self.events.recv().await {
            if let LoadEvent::Completed(result) = event {
                return result;
            }
        }
        Err(WebImageError::Cancelled)
    }
}

impl std::fmt::Debug for ImageLoad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageLoad")
            .field("cancelled", &self.operation.is_cancelled())
            .finish_non_exhaustive()
    }
}
