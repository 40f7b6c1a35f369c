//! HTTP transport seam used by the downloader.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use tracing::trace;

use crate::domain::entities::DownloadRequest;
use crate::domain::errors::{TransportErrorKind, WebImageError};

/// Streamed response body.
pub type ResponseBody = BoxStream<'static, Result<Bytes, WebImageError>>;

/// Response head plus body stream.
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Announced body length.
    pub expected_len: Option<u64>,
    /// Body chunks in arrival order.
    pub body: ResponseBody,
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("expected_len", &self.expected_len)
            .finish_non_exhaustive()
    }
}

/// Issues a single GET. Dropping the returned future or body stream must
/// release the underlying connection.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends `request` and returns once the response head arrived.
    ///
    /// # Errors
    /// Returns `WebImageError::Transport` on network failure.
    async fn execute(&self, request: &DownloadRequest) -> Result<TransportResponse, WebImageError>;
}

/// Maps a `reqwest` error onto a transport error kind.
#[must_use]
pub fn classify_reqwest_error(err: &reqwest::Error) -> WebImageError {
    let kind = if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_connect() {
        TransportErrorKind::Connect
    } else if err.is_body() || err.is_decode() {
        TransportErrorKind::Body
    } else if err.is_request() || err.is_builder() {
        TransportErrorKind::Request
    } else {
        TransportErrorKind::Other
    };
    WebImageError::transport(kind, err.to_string())
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport with a fresh client.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn new() -> Result<Self, WebImageError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| classify_reqwest_error(&e))?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: &DownloadRequest) -> Result<TransportResponse, WebImageError> {
        let mut builder = self.client.get(request.url.clone());
        if let Some(limit) = request.time_limit() {
            builder = builder.timeout(limit);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let response = builder
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        let status = response.status().as_u16();
        let expected_len = response.content_length();
        trace!(url = %request.url, status, ?expected_len, "Response head received");

        let body = stream::unfold(Some(response), |state| async move {
            let mut response = state?;
            match response.chunk().await {
                Ok(Some(chunk)) => Some((Ok(chunk), Some(response))),
                Ok(None) => None,
                Err(e) => Some((Err(classify_reqwest_error(&e)), None)),
            }
        })
        .boxed();

        Ok(TransportResponse {
            status,
            expected_len,
            body,
        })
    }
}
