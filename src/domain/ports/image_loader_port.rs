//! Port definition for image loaders.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use url::Url;

use super::Cancellable;
use crate::domain::entities::{LoadContext, WebImage, WebImageOptions};
use crate::domain::errors::WebImageError;

/// Successful loader result.
#[derive(Debug, Clone)]
pub struct LoaderOutput {
    /// The decoded image.
    pub image: WebImage,
    /// The bytes it was decoded from.
    pub data: Bytes,
}

/// Events emitted by a loader for one request: any number of progress and
/// partial events followed by exactly one `Finished`. Nothing is emitted
/// after a request has been cancelled.
#[derive(Debug, Clone)]
pub enum LoaderEvent {
    /// Bytes received so far.
    Progress {
        /// Cumulative byte count.
        received: u64,
        /// Expected total, if the server announced one.
        expected: Option<u64>,
    },
    /// A progressive preview decoded from a prefix of the data.
    Partial {
        /// The preview.
        image: WebImage,
        /// Byte count the preview was decoded from.
        received: u64,
    },
    /// Terminal event.
    Finished(Result<LoaderOutput, WebImageError>),
}

/// Receiving end of a loader event stream.
pub type LoaderEvents = mpsc::UnboundedReceiver<LoaderEvent>;

/// Sending end handed to a loader.
pub type LoaderSink = mpsc::UnboundedSender<LoaderEvent>;

/// A source of images for the image manager.
/// Implementations must be thread-safe.
pub trait ImageLoaderPort: Send + Sync {
    /// Returns true if this loader handles `url`.
    fn can_request_image(&self, url: &Url) -> bool;

    /// Starts loading `url`, reporting through `sink`. Returns immediately.
    fn request_image(
        &self,
        url: &Url,
        options: WebImageOptions,
        context: &LoadContext,
        sink: LoaderSink,
    ) -> Arc<dyn Cancellable>;

    /// Decides whether `error` marks `url` as permanently failed.
    fn should_block_failed_url(&self, url: &Url, error: &WebImageError) -> bool;
}
