//! Network image loading.
//!
//! This module provides:
//! - The downloader with its concurrency limit and queue discipline
//! - Cancelable download tokens
//! - The HTTP transport seam and its `reqwest` implementation

pub mod config;
pub mod downloader;
pub mod token;
pub mod transport;

pub use config::{DownloaderConfig, ExecutionOrder};
pub use downloader::{DownloadHandle, ImageDownloader, should_block_failed_url};
pub use token::{DownloadToken, ResponseInfo};
pub use transport::{HttpTransport, ReqwestTransport, TransportResponse, classify_reqwest_error};
