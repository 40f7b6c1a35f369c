//! Concurrent HTTP image downloader.
//!
//! Requests go through a worker loop that enforces the concurrency limit
//! and the queue discipline. Each started download runs as its own task.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, OnceLock};

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tracing::{debug, error, info, trace, warn};
use url::Url;
use uuid::Uuid;

use super::config::{DownloaderConfig, ExecutionOrder};
use super::token::{DownloadToken, ResponseInfo, TokenCommand};
use super::transport::{HttpTransport, ReqwestTransport};
use crate::domain::entities::{
    DownloadRequest, LoadContext, SystemEvent, WebImage, WebImageOptions,
};
use crate::domain::errors::{TransportErrorKind, WebImageError};
use crate::domain::ports::{
    Cancellable, CoderOptions, CompletedOperation, ImageLoaderPort, IncrementalDecoder,
    LoaderEvent, LoaderEvents, LoaderOutput, LoaderSink,
};
use crate::infrastructure::codec::{CodersManager, coder_options, decode_image_data};

const MAX_PREALLOC: usize = 16 * 1024 * 1024;

static SHARED: OnceLock<Arc<ImageDownloader>> = OnceLock::new();

/// Default failed-URL policy.
///
/// Client errors and undecodable data are permanent; server errors,
/// timeouts, connectivity problems and cancellations are not.
#[must_use]
pub const fn should_block_failed_url(error: &WebImageError) -> bool {
    match error {
        WebImageError::InvalidUrl { .. } | WebImageError::BadImageData { .. } => true,
        WebImageError::InvalidDownloadStatusCode { status } => {
            *status >= 400 && *status < 500 && *status != 408 && *status != 429
        }
        WebImageError::Transport { kind, .. } => {
            matches!(kind, TransportErrorKind::Request | TransportErrorKind::Other)
        }
        WebImageError::Cancelled
        | WebImageError::CacheNotModified
        | WebImageError::InvalidDownloadOperation { .. } => false,
    }
}

/// A download started through [`ImageDownloader::download_image`].
#[derive(Debug)]
pub struct DownloadHandle {
    /// Cancellation handle. `None` if the request was rejected up front.
    pub token: Option<DownloadToken>,
    /// Raw event stream. Events queued before a cancel stay buffered here;
    /// [`DownloadHandle::next_event`] drops them.
    pub events: LoaderEvents,
}

impl DownloadHandle {
    /// Cancels the download.
    pub fn cancel(&self) {
        if let Some(token) = &self.token {
            token.cancel();
        }
    }

    /// Next event, `None` once the stream ended or the download was
    /// cancelled.
    pub async fn next_event(&mut self) -> Option<LoaderEvent> {
        if self.is_cancelled() {
            return None;
        }
        let event = self.events.recv().await?;
        (!self.is_cancelled()).then_some(event)
    }

    fn is_cancelled(&self) -> bool {
        self.token.as_ref().is_some_and(Cancellable::is_cancelled)
    }

    /// Waits for the terminal event, skipping progress.
    ///
    /// # Errors
    /// The download error, or `Cancelled` if the download was cancelled.
    pub async fn finished(mut self) -> Result<LoaderOutput, WebImageError> {
        while let Some(event) = self.next_event().await {
            if let LoaderEvent::Finished(result) = event {
                return result;
            }
        }
        Err(WebImageError::Cancelled)
    }
}

struct Job {
    token: DownloadToken,
    options: WebImageOptions,
    context: LoadContext,
    sink: LoaderSink,
}

impl Job {
    fn fail(self, error: WebImageError) {
        if self.token.finish() {
            let _ = self.sink.send(LoaderEvent::Finished(Err(error)));
        }
    }
}

enum Command {
    Enqueue(Job),
    CancelAll,
}

/// Priority lanes, each ordered by the configured discipline.
struct Lanes {
    order: ExecutionOrder,
    high: VecDeque<Job>,
    normal: VecDeque<Job>,
    low: VecDeque<Job>,
}

impl Lanes {
    fn new(order: ExecutionOrder) -> Self {
        Self {
            order,
            high: VecDeque::new(),
            normal: VecDeque::new(),
            low: VecDeque::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.high.is_empty() && self.normal.is_empty() && self.low.is_empty()
    }

    fn push(&mut self, job: Job) {
        let lane = if job.options.contains(WebImageOptions::HIGH_PRIORITY) {
            &mut self.high
        } else if job.options.contains(WebImageOptions::LOW_PRIORITY) {
            &mut self.low
        } else {
            &mut self.normal
        };
        lane.push_back(job);
    }

    fn pop(&mut self) -> Option<Job> {
        let order = self.order;
        for lane in [&mut self.high, &mut self.normal, &mut self.low] {
            loop {
                let job = match order {
                    ExecutionOrder::Fifo => lane.pop_front(),
                    ExecutionOrder::Lifo => lane.pop_back(),
                };
                match job {
                    Some(job) if job.token.is_pending() => return Some(job),
                    Some(_) => {}
                    None => break,
                }
            }
        }
        None
    }

    fn remove(&mut self, id: Uuid) {
        for lane in [&mut self.high, &mut self.normal, &mut self.low] {
            lane.retain(|job| job.token.id() != id);
        }
    }

    fn clear(&mut self) -> usize {
        let count = self.high.len() + self.normal.len() + self.low.len();
        self.high.clear();
        self.normal.clear();
        self.low.clear();
        count
    }
}

/// State shared by the downloader, the worker loop and running jobs.
struct Shared {
    transport: Arc<dyn HttpTransport>,
    coders: Arc<CodersManager>,
    progress_interval: f64,
    active: Mutex<HashMap<Uuid, DownloadToken>>,
}

/// State owned by the background worker loop.
struct WorkerState {
    shared: Arc<Shared>,
    semaphore: Arc<Semaphore>,
    lanes: Lanes,
    command_rx: mpsc::UnboundedReceiver<Command>,
    cancel_rx: mpsc::UnboundedReceiver<TokenCommand>,
}

/// Downloads and decodes images over HTTP.
pub struct ImageDownloader {
    config: DownloaderConfig,
    headers: RwLock<BTreeMap<String, String>>,
    shared: Arc<Shared>,
    command_tx: mpsc::UnboundedSender<Command>,
    cancel_tx: mpsc::UnboundedSender<TokenCommand>,
}

impl std::fmt::Debug for ImageDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageDownloader")
            .field("config", &self.config)
            .field("active", &self.current_download_count())
            .finish_non_exhaustive()
    }
}

impl ImageDownloader {
    /// Creates a downloader and spawns its worker loop.
    ///
    /// # Panics
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn new(
        config: DownloaderConfig,
        transport: Arc<dyn HttpTransport>,
        coders: Arc<CodersManager>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = mpsc::unbounded_channel();

        let mut headers = config.headers.clone();
        headers.insert("User-Agent".to_string(), config.user_agent.clone());

        let shared = Arc::new(Shared {
            transport,
            coders,
            progress_interval: config.minimum_progress_interval.clamp(0.0, 1.0),
            active: Mutex::new(HashMap::new()),
        });

        let worker_state = WorkerState {
            shared: shared.clone(),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_downloads.max(1))),
            lanes: Lanes::new(config.execution_order),
            command_rx,
            cancel_rx,
        };
        tokio::spawn(Self::run_worker_loop(worker_state));

        info!(
            max_concurrent = config.max_concurrent_downloads,
            order = ?config.execution_order,
            "Image downloader started"
        );

        Self {
            config,
            headers: RwLock::new(headers),
            shared,
            command_tx,
            cancel_tx,
        }
    }

    /// Creates a downloader backed by `reqwest` and the shared coders.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn with_config(config: DownloaderConfig) -> Result<Self, WebImageError> {
        let transport = Arc::new(ReqwestTransport::new()?);
        Ok(Self::new(config, transport, CodersManager::shared()))
    }

    /// Process-wide instance with the default configuration.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn shared() -> Result<Arc<Self>, WebImageError> {
        if let Some(downloader) = SHARED.get() {
            return Ok(downloader.clone());
        }
        let downloader = Arc::new(Self::with_config(DownloaderConfig::default())?);
        Ok(SHARED.get_or_init(|| downloader).clone())
    }

    /// Installs the process-wide instance.
    ///
    /// # Errors
    /// Returns the rejected downloader if `shared()` was already initialized.
    pub fn install_shared(downloader: Arc<Self>) -> Result<(), Arc<Self>> {
        SHARED.set(downloader)
    }

    /// Configuration in effect.
    #[must_use]
    pub const fn config(&self) -> &DownloaderConfig {
        &self.config
    }

    /// Sets a default header, or removes it when `value` is `None`.
    pub fn set_header(&self, name: &str, value: Option<&str>) {
        let mut headers = self.headers.write();
        match value {
            Some(value) => {
                headers.insert(name.to_string(), value.to_string());
            }
            None => {
                headers.remove(name);
            }
        }
    }

    /// Current value of a default header.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers.read().get(name).cloned()
    }

    /// Downloads queued or running.
    #[must_use]
    pub fn current_download_count(&self) -> usize {
        self.shared.active.lock().len()
    }

    /// Cancels every queued and running download.
    pub fn cancel_all_downloads(&self) {
        let tokens: Vec<DownloadToken> = self.shared.active.lock().values().cloned().collect();
        if tokens.is_empty() {
            return;
        }
        debug!(count = tokens.len(), "Cancelling all downloads");
        for token in &tokens {
            token.cancel();
        }
        if let Err(e) = self.command_tx.send(Command::CancelAll) {
            error!("Failed to send cancel all request: {}", e);
        }
    }

    /// Reacts to host lifecycle events.
    pub fn handle_system_event(&self, event: SystemEvent) {
        if event != SystemEvent::EnterBackground {
            return;
        }
        let tokens: Vec<DownloadToken> = self
            .shared
            .active
            .lock()
            .values()
            .filter(|t| {
                !t.request()
                    .options
                    .contains(WebImageOptions::CONTINUE_IN_BACKGROUND)
            })
            .cloned()
            .collect();
        if !tokens.is_empty() {
            debug!(count = tokens.len(), "Cancelling downloads on entering background");
        }
        for token in tokens {
            token.cancel();
        }
    }

    /// Starts downloading `url`.
    #[must_use]
    pub fn download_image(
        &self,
        url: &Url,
        options: WebImageOptions,
        context: &LoadContext,
    ) -> DownloadHandle {
        let (sink, events) = mpsc::unbounded_channel();
        let token = self.submit(url, options, context, sink);
        DownloadHandle { token, events }
    }

    fn submit(
        &self,
        url: &Url,
        options: WebImageOptions,
        context: &LoadContext,
        sink: LoaderSink,
    ) -> Option<DownloadToken> {
        if !self.can_request_image(url) {
            let _ = sink.send(LoaderEvent::Finished(Err(WebImageError::invalid_url(
                format!("unsupported scheme: {}", url.scheme()),
            ))));
            return None;
        }

        let mut request = DownloadRequest::new(url.clone(), self.config.download_timeout(), options);
        request.headers = self.headers.read().clone();
        if let Some(modifier) = &context.request_modifier {
            if let Some(modified) = modifier.modify(request) {
                request = modified;
            } else {
                debug!(url = %url, "Request modifier dropped the request");
                let _ = sink.send(LoaderEvent::Finished(Err(WebImageError::invalid_operation(
                    "request modifier returned no request",
                ))));
                return None;
            }
        }

        let token = DownloadToken::new(request, self.cancel_tx.downgrade());
        self.shared.active.lock().insert(token.id(), token.clone());
        trace!(url = %url, id = %token.id(), "Download queued");

        let job = Job {
            token: token.clone(),
            options,
            context: context.clone(),
            sink,
        };
        if let Err(mpsc::error::SendError(command)) = self.command_tx.send(Command::Enqueue(job)) {
            error!(url = %url, "Downloader worker is not running");
            self.shared.active.lock().remove(&token.id());
            if let Command::Enqueue(job) = command {
                job.fail(WebImageError::invalid_operation("downloader is shut down"));
            }
        }
        Some(token)
    }

    /// Worker loop to handle download requests and throttling.
    async fn run_worker_loop(mut state: WorkerState) {
        loop {
            tokio::select! {
                biased;

                Some(TokenCommand::Cancel(id)) = state.cancel_rx.recv() => {
                    state.lanes.remove(id);
                    state.shared.active.lock().remove(&id);
                }
                cmd = state.command_rx.recv() => {
                    match cmd {
                        Some(Command::Enqueue(job)) => {
                            let permit = if state.lanes.is_empty() {
                                state.semaphore.clone().try_acquire_owned().ok()
                            } else {
                                None
                            };
                            match permit {
                                Some(permit) => Self::start(&state.shared, job, permit),
                                None => state.lanes.push(job),
                            }
                        }
                        Some(Command::CancelAll) => {
                            let dropped = state.lanes.clear();
                            trace!(dropped, "Cleared download queue");
                        }
                        None => break,
                    }
                }
                Ok(permit) = state.semaphore.clone().acquire_owned(), if !state.lanes.is_empty() => {
                    if let Some(job) = state.lanes.pop() {
                        Self::start(&state.shared, job, permit);
                    }
                }
            }
        }
        debug!("Downloader worker stopped");
    }

    fn start(shared: &Arc<Shared>, job: Job, permit: OwnedSemaphorePermit) {
        let shared = shared.clone();
        tokio::spawn(async move {
            run_job(&shared, job).await;
            drop(permit);
        });
    }
}

async fn run_job(shared: &Shared, job: Job) {
    let Job {
        token,
        options,
        context,
        sink,
    } = job;
    let url = token.url().clone();
    let limit = token.request().time_limit();
    let cancel = token.cancellation();
    debug!(url = %url, ?limit, "Download started");

    let download = async {
        let download = fetch(shared, &token, options, &context, &sink);
        match limit {
            Some(limit) => tokio::time::timeout(limit, download)
                .await
                .unwrap_or_else(|_| {
                    Err(WebImageError::transport(
                        TransportErrorKind::Timeout,
                        format!("no response within {limit:?}"),
                    ))
                }),
            None => download.await,
        }
    };

    let outcome = tokio::select! {
        biased;

        () = cancel.cancelled() => None,
        result = download => Some(result),
    };

    shared.active.lock().remove(&token.id());

    match outcome {
        Some(result) if token.finish() => {
            match &result {
                Ok(output) => debug!(
                    url = %url,
                    bytes = output.data.len(),
                    width = output.image.width(),
                    height = output.image.height(),
                    "Download finished"
                ),
                Err(e) => warn!(url = %url, error = %e, "Download failed"),
            }
            let _ = sink.send(LoaderEvent::Finished(result));
        }
        _ => trace!(url = %url, "Download ended after cancellation"),
    }
}

fn emit(token: &DownloadToken, sink: &LoaderSink, event: LoaderEvent) {
    token.deliver(|| {
        let _ = sink.send(event);
    });
}

async fn fetch(
    shared: &Shared,
    token: &DownloadToken,
    options: WebImageOptions,
    context: &LoadContext,
    sink: &LoaderSink,
) -> Result<LoaderOutput, WebImageError> {
    let response = shared.transport.execute(token.request()).await?;
    token.set_response(ResponseInfo {
        status: response.status,
        expected_len: response.expected_len,
    });
    match response.status {
        304 => return Err(WebImageError::CacheNotModified),
        200..=299 => {}
        status => return Err(WebImageError::InvalidDownloadStatusCode { status }),
    }

    let expected = response.expected_len;
    let mut body = response.body;
    let capacity = expected
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(0)
        .min(MAX_PREALLOC);
    let mut data = BytesMut::with_capacity(capacity);
    let mut throttle = ProgressThrottle::new(expected, shared.progress_interval);
    let mut progressive = options
        .contains(WebImageOptions::PROGRESSIVE_LOAD)
        .then(PartialDecoding::default);

    emit(token, sink, LoaderEvent::Progress { received: 0, expected });

    while let Some(chunk) = body.next().await {
        data.extend_from_slice(&chunk?);
        let received = data.len() as u64;
        if !throttle.should_report(received) {
            continue;
        }
        emit(token, sink, LoaderEvent::Progress { received, expected });
        if let Some(partial) = progressive.as_mut() {
            let coder_options = coder_options(Some(token.url().as_str()), options, context);
            let preview = partial
                .decode(&shared.coders, &data, coder_options)
                .await;
            if let Some(image) = preview {
                emit(token, sink, LoaderEvent::Partial { image, received });
            }
        }
    }

    if data.is_empty() {
        return Err(WebImageError::bad_data("downloaded data is empty"));
    }
    let received = data.len() as u64;
    if throttle.last_reported < received {
        emit(token, sink, LoaderEvent::Progress { received, expected });
    }

    let data = data.freeze();
    // Thumbnails and animation checks need the full decode path.
    let final_options = coder_options(Some(token.url().as_str()), options, context);
    if let Some(partial) = progressive
        .filter(|_| final_options.thumbnail_bytes_limit.is_none() && !options.requires_animated())
    {
        if let Some(image) = partial.finish(data.clone()).await {
            return Ok(LoaderOutput { image, data });
        }
    }
    let bytes = data.clone();
    let key = token.url().to_string();
    let context = context.clone();
    let coders = shared.coders.clone();
    let image = tokio::task::spawn_blocking(move || {
        decode_image_data(&bytes, Some(&key), options, &context, &coders)
    })
    .await
    .map_err(|e| WebImageError::bad_data(format!("decode task failed: {e}")))??;

    Ok(LoaderOutput { image, data })
}

/// Coalesces progress reports to steps of at least `interval` of the total.
struct ProgressThrottle {
    expected: Option<u64>,
    interval: f64,
    last_reported: u64,
}

impl ProgressThrottle {
    const fn new(expected: Option<u64>, interval: f64) -> Self {
        Self {
            expected,
            interval,
            last_reported: 0,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn should_report(&mut self, received: u64) -> bool {
        let due = match self.expected {
            Some(total) if total > 0 && self.interval > 0.0 => {
                let step = received.saturating_sub(self.last_reported) as f64 / total as f64;
                step >= self.interval || received >= total
            }
            _ => true,
        };
        if due {
            self.last_reported = received;
        }
        due
    }
}

/// Progressive preview state for one download.
#[derive(Default)]
struct PartialDecoding {
    decoder: Option<Box<dyn IncrementalDecoder>>,
    unsupported: bool,
}

impl PartialDecoding {
    async fn decode(
        &mut self,
        coders: &CodersManager,
        data: &[u8],
        mut options: CoderOptions,
    ) -> Option<WebImage> {
        if self.unsupported {
            return None;
        }
        // Previews are never downsampled.
        options.thumbnail_bytes_limit = None;
        let mut decoder = match self.decoder.take() {
            Some(decoder) => decoder,
            None => {
                let Some(decoder) = coders.incremental_decoder_for(data, &options) else {
                    // Format may not be detectable from a tiny prefix yet.
                    self.unsupported = data.len() > 64;
                    return None;
                };
                decoder
            }
        };
        let snapshot = Bytes::copy_from_slice(data);
        let (decoder, preview) = tokio::task::spawn_blocking(move || {
            decoder.update(&snapshot, false);
            let preview = decoder.decode_current();
            (decoder, preview)
        })
        .await
        .ok()?;
        self.decoder = Some(decoder);
        preview
    }

    /// Feeds the complete data and returns the decoder's final image.
    async fn finish(self, data: Bytes) -> Option<WebImage> {
        let mut decoder = self.decoder?;
        tokio::task::spawn_blocking(move || {
            decoder.update(&data, true);
            decoder.decode_current()
        })
        .await
        .ok()?
    }
}

impl ImageLoaderPort for ImageDownloader {
    fn can_request_image(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https")
    }

    fn request_image(
        &self,
        url: &Url,
        options: WebImageOptions,
        context: &LoadContext,
        sink: LoaderSink,
    ) -> Arc<dyn Cancellable> {
        match self.submit(url, options, context, sink) {
            Some(token) => Arc::new(token),
            None => Arc::new(CompletedOperation),
        }
    }

    fn should_block_failed_url(&self, _url: &Url, error: &WebImageError) -> bool {
        should_block_failed_url(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::ImageFormat;
    use crate::domain::errors::CodecError;
    use crate::domain::ports::{ImageCoder, ProgressiveImageCoder};
    use crate::infrastructure::download::transport::mock::{StubReply, StubTransport};
    use std::time::Duration;
    use test_case::test_case;

    fn png(width: u32, height: u32) -> Bytes {
        let image = WebImage::new(image::DynamicImage::new_rgba8(width, height), ImageFormat::Png);
        CodersManager::with_defaults()
            .encode(&image, ImageFormat::Png, &CoderOptions::default())
            .unwrap()
    }

    fn url(path: &str) -> Url {
        Url::parse(&format!("https://img.example.com/{path}")).unwrap()
    }

    fn downloader(config: DownloaderConfig, transport: Arc<StubTransport>) -> ImageDownloader {
        ImageDownloader::new(config, transport, Arc::new(CodersManager::with_defaults()))
    }

    async fn collect(handle: DownloadHandle) -> Vec<LoaderEvent> {
        let mut events = handle.events;
        let mut out = Vec::new();
        while let Some(event) = events.recv().await {
            out.push(event);
        }
        out
    }

    async fn wait_for_requests(transport: &StubTransport, count: usize) {
        for _ in 0..200 {
            if transport.requests().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {count} requests, saw {:?}", transport.requested_urls());
    }

    #[tokio::test]
    async fn test_download_success_reports_progress_then_finishes() {
        let transport = Arc::new(StubTransport::new());
        let data = png(8, 6);
        transport.reply(url("a.png").as_str(), StubReply::ok(&data, 3));
        let downloader = downloader(DownloaderConfig::default(), transport.clone());

        let events = collect(downloader.download_image(
            &url("a.png"),
            WebImageOptions::empty(),
            &LoadContext::default(),
        ))
        .await;

        let progress: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                LoaderEvent::Progress { received, .. } => Some(*received),
                _ => None,
            })
            .collect();
        assert!(progress.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(*progress.last().unwrap(), data.len() as u64);

        let finished: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, LoaderEvent::Finished(_)))
            .collect();
        assert_eq!(finished.len(), 1);
        assert!(matches!(events.last(), Some(LoaderEvent::Finished(_))));
        let LoaderEvent::Finished(Ok(output)) = events.last().unwrap() else {
            panic!("expected success");
        };
        assert_eq!((output.image.width(), output.image.height()), (8, 6));
        assert_eq!(output.data, data);
        assert_eq!(downloader.current_download_count(), 0);
    }

    #[tokio::test]
    async fn test_default_headers_are_sent() {
        let transport = Arc::new(StubTransport::new());
        transport.reply(url("h.png").as_str(), StubReply::ok(&png(2, 2), 1));
        let downloader = downloader(DownloaderConfig::default(), transport.clone());
        downloader.set_header("X-Test", Some("1"));
        downloader.set_header("Accept", None);

        let handle =
            downloader.download_image(&url("h.png"), WebImageOptions::empty(), &LoadContext::default());
        handle.finished().await.unwrap();

        let request = &transport.requests()[0];
        assert_eq!(request.headers.get("X-Test").unwrap(), "1");
        assert!(request.headers.get("User-Agent").unwrap().starts_with("pixfetch/"));
        assert!(!request.headers.contains_key("Accept"));
        assert_eq!(downloader.header("X-Test").as_deref(), Some("1"));
    }

    #[test_case(404, WebImageError::InvalidDownloadStatusCode { status: 404 } ; "not found")]
    #[test_case(500, WebImageError::InvalidDownloadStatusCode { status: 500 } ; "server error")]
    #[test_case(304, WebImageError::CacheNotModified ; "not modified")]
    #[tokio::test]
    async fn test_status_errors(status: u16, expected: WebImageError) {
        let transport = Arc::new(StubTransport::new());
        transport.reply(url("s.png").as_str(), StubReply::status(status));
        let downloader = downloader(DownloaderConfig::default(), transport);

        let handle =
            downloader.download_image(&url("s.png"), WebImageOptions::empty(), &LoadContext::default());
        let token = handle.token.clone().unwrap();
        assert_eq!(handle.finished().await.unwrap_err(), expected);
        assert_eq!(token.response().unwrap().status, status);
    }

    #[tokio::test]
    async fn test_empty_and_garbage_bodies_are_bad_data() {
        let transport = Arc::new(StubTransport::new());
        transport.reply(url("empty").as_str(), StubReply::ok(&[], 1));
        transport.reply(url("junk").as_str(), StubReply::ok(b"definitely not an image", 2));
        let downloader = downloader(DownloaderConfig::default(), transport);

        for path in ["empty", "junk"] {
            let err = downloader
                .download_image(&url(path), WebImageOptions::empty(), &LoadContext::default())
                .finished()
                .await
                .unwrap_err();
            assert!(matches!(err, WebImageError::BadImageData { .. }), "{path}: {err:?}");
        }
    }

    #[tokio::test]
    async fn test_unsupported_scheme_is_rejected() {
        let transport = Arc::new(StubTransport::new());
        let downloader = downloader(DownloaderConfig::default(), transport.clone());
        let handle = downloader.download_image(
            &Url::parse("ftp://example.com/a.png").unwrap(),
            WebImageOptions::empty(),
            &LoadContext::default(),
        );
        assert!(handle.token.is_none());
        let err = handle.finished().await.unwrap_err();
        assert!(matches!(err, WebImageError::InvalidUrl { .. }));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_request_modifier() {
        let transport = Arc::new(StubTransport::new());
        transport.reply(url("m.png").as_str(), StubReply::ok(&png(2, 2), 1));
        let downloader = downloader(DownloaderConfig::default(), transport.clone());

        let context = LoadContext::new().with_request_modifier(Arc::new(
            |request: DownloadRequest| Some(request.with_header("Authorization", "Bearer t")),
        ));
        downloader
            .download_image(&url("m.png"), WebImageOptions::empty(), &context)
            .finished()
            .await
            .unwrap();
        assert_eq!(
            transport.requests()[0].headers.get("Authorization").unwrap(),
            "Bearer t"
        );

        let context = LoadContext::new()
            .with_request_modifier(Arc::new(|_: DownloadRequest| None::<DownloadRequest>));
        let err = downloader
            .download_image(&url("m.png"), WebImageOptions::empty(), &context)
            .finished()
            .await
            .unwrap_err();
        assert!(matches!(err, WebImageError::InvalidDownloadOperation { .. }));
        assert_eq!(transport.requests().len(), 1);
    }

    #[test_case(ExecutionOrder::Fifo, &["r1", "r2", "r3"] ; "fifo")]
    #[test_case(ExecutionOrder::Lifo, &["r1", "r3", "r2"] ; "lifo")]
    #[tokio::test]
    async fn test_execution_order(order: ExecutionOrder, expected: &[&str]) {
        let gate = Arc::new(Semaphore::new(0));
        let transport = Arc::new(StubTransport::gated(gate.clone()));
        let data = png(2, 2);
        for path in ["r1", "r2", "r3"] {
            transport.reply(url(path).as_str(), StubReply::ok(&data, 1));
        }
        let config = DownloaderConfig {
            max_concurrent_downloads: 1,
            execution_order: order,
            ..DownloaderConfig::default()
        };
        let downloader = downloader(config, transport.clone());

        let handles: Vec<_> = ["r1", "r2", "r3"]
            .iter()
            .map(|p| downloader.download_image(&url(p), WebImageOptions::empty(), &LoadContext::default()))
            .collect();
        wait_for_requests(&transport, 1).await;
        assert_eq!(downloader.current_download_count(), 3);

        gate.add_permits(3);
        for handle in handles {
            handle.finished().await.unwrap();
        }

        let expected: Vec<String> = expected.iter().map(|p| url(p).to_string()).collect();
        assert_eq!(transport.requested_urls(), expected);
    }

    #[tokio::test]
    async fn test_high_priority_jumps_the_queue() {
        let gate = Arc::new(Semaphore::new(0));
        let transport = Arc::new(StubTransport::gated(gate.clone()));
        let data = png(2, 2);
        for path in ["first", "low", "normal", "high"] {
            transport.reply(url(path).as_str(), StubReply::ok(&data, 1));
        }
        let config = DownloaderConfig {
            max_concurrent_downloads: 1,
            ..DownloaderConfig::default()
        };
        let downloader = downloader(config, transport.clone());
        let context = LoadContext::default();

        let handles = vec![
            downloader.download_image(&url("first"), WebImageOptions::empty(), &context),
            downloader.download_image(&url("low"), WebImageOptions::LOW_PRIORITY, &context),
            downloader.download_image(&url("normal"), WebImageOptions::empty(), &context),
            downloader.download_image(&url("high"), WebImageOptions::HIGH_PRIORITY, &context),
        ];
        wait_for_requests(&transport, 1).await;
        gate.add_permits(4);
        for handle in handles {
            handle.finished().await.unwrap();
        }

        let expected: Vec<String> = ["first", "high", "normal", "low"]
            .iter()
            .map(|p| url(p).to_string())
            .collect();
        assert_eq!(transport.requested_urls(), expected);
    }

    #[tokio::test]
    async fn test_cancel_suppresses_terminal_event() {
        let gate = Arc::new(Semaphore::new(0));
        let transport = Arc::new(StubTransport::gated(gate));
        transport.reply(url("c.png").as_str(), StubReply::ok(&png(2, 2), 1));
        let downloader = downloader(DownloaderConfig::default(), transport.clone());

        let handle =
            downloader.download_image(&url("c.png"), WebImageOptions::empty(), &LoadContext::default());
        wait_for_requests(&transport, 1).await;
        handle.cancel();
        handle.cancel();

        let token = handle.token.clone().unwrap();
        let events = collect(handle).await;
        assert!(events.iter().all(|e| !matches!(e, LoaderEvent::Finished(_))));
        assert!(token.is_cancelled());
        assert_eq!(downloader.current_download_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_drops_buffered_events() {
        let (commands, _worker) = mpsc::unbounded_channel::<TokenCommand>();
        let request =
            DownloadRequest::new(url("b.png"), Duration::ZERO, WebImageOptions::empty());
        let token = DownloadToken::new(request, commands.downgrade());
        let (sink, events) = mpsc::unbounded_channel();
        let mut handle = DownloadHandle {
            token: Some(token.clone()),
            events,
        };

        emit(&token, &sink, LoaderEvent::Progress {
            received: 0,
            expected: None,
        });
        handle.cancel();
        emit(&token, &sink, LoaderEvent::Progress {
            received: 4,
            expected: None,
        });

        assert!(handle.next_event().await.is_none());
        assert!(matches!(handle.finished().await, Err(WebImageError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_queued_download_never_starts() {
        let gate = Arc::new(Semaphore::new(0));
        let transport = Arc::new(StubTransport::gated(gate.clone()));
        let data = png(2, 2);
        transport.reply(url("a").as_str(), StubReply::ok(&data, 1));
        transport.reply(url("b").as_str(), StubReply::ok(&data, 1));
        let config = DownloaderConfig {
            max_concurrent_downloads: 1,
            ..DownloaderConfig::default()
        };
        let downloader = downloader(config, transport.clone());
        let context = LoadContext::default();

        let first = downloader.download_image(&url("a"), WebImageOptions::empty(), &context);
        let second = downloader.download_image(&url("b"), WebImageOptions::empty(), &context);
        wait_for_requests(&transport, 1).await;
        second.cancel();
        assert!(collect(second).await.is_empty());

        gate.add_permits(2);
        first.finished().await.unwrap();
        assert_eq!(transport.requested_urls(), vec![url("a").to_string()]);
    }

    #[tokio::test]
    async fn test_cancel_all_downloads() {
        let gate = Arc::new(Semaphore::new(0));
        let transport = Arc::new(StubTransport::gated(gate));
        let downloader = downloader(
            DownloaderConfig {
                max_concurrent_downloads: 1,
                ..DownloaderConfig::default()
            },
            transport.clone(),
        );
        let context = LoadContext::default();
        let handles: Vec<_> = ["x", "y", "z"]
            .iter()
            .map(|p| downloader.download_image(&url(p), WebImageOptions::empty(), &context))
            .collect();
        wait_for_requests(&transport, 1).await;

        downloader.cancel_all_downloads();
        for handle in handles {
            assert_eq!(handle.finished().await.unwrap_err(), WebImageError::Cancelled);
        }
        assert_eq!(downloader.current_download_count(), 0);
    }

    #[tokio::test]
    async fn test_enter_background_keeps_continuing_downloads() {
        let gate = Arc::new(Semaphore::new(0));
        let transport = Arc::new(StubTransport::gated(gate.clone()));
        transport.reply(url("keep").as_str(), StubReply::ok(&png(2, 2), 1));
        let downloader = downloader(DownloaderConfig::default(), transport.clone());
        let context = LoadContext::default();

        let keep = downloader.download_image(&url("keep"), WebImageOptions::CONTINUE_IN_BACKGROUND, &context);
        let drop_me = downloader.download_image(&url("drop"), WebImageOptions::empty(), &context);
        wait_for_requests(&transport, 2).await;

        downloader.handle_system_event(SystemEvent::EnterBackground);
        assert!(drop_me.token.as_ref().unwrap().is_cancelled());
        assert!(!keep.token.as_ref().unwrap().is_cancelled());

        gate.add_permits(2);
        keep.finished().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_a_transport_error() {
        let transport = Arc::new(StubTransport::new());
        let mut reply = StubReply::ok(&[1, 2, 3], 1);
        reply.delay = Duration::from_secs(5);
        transport.reply(url("slow").as_str(), reply);
        let config = DownloaderConfig {
            download_timeout: 1,
            ..DownloaderConfig::default()
        };
        let downloader = downloader(config, transport);

        let err = downloader
            .download_image(&url("slow"), WebImageOptions::empty(), &LoadContext::default())
            .finished()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WebImageError::Transport {
                kind: TransportErrorKind::Timeout,
                ..
            }
        ));
        assert!(!should_block_failed_url(&err));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_waits_for_slow_server() {
        let transport = Arc::new(StubTransport::new());
        let data = png(4, 4);
        let mut reply = StubReply::ok(&data, 1);
        reply.delay = Duration::from_secs(120);
        transport.reply(url("slow.png").as_str(), reply);
        let config = DownloaderConfig {
            download_timeout: 0,
            ..DownloaderConfig::default()
        };
        let downloader = downloader(config, transport);

        let output = downloader
            .download_image(&url("slow.png"), WebImageOptions::empty(), &LoadContext::default())
            .finished()
            .await
            .unwrap();
        assert_eq!(output.image.width(), 4);
    }

    #[tokio::test]
    async fn test_progress_is_coalesced() {
        let transport = Arc::new(StubTransport::new());
        let data = png(64, 64);
        transport.reply(url("p.png").as_str(), StubReply::ok(&data, 20));
        let config = DownloaderConfig {
            minimum_progress_interval: 0.5,
            ..DownloaderConfig::default()
        };
        let downloader = downloader(config, transport);

        let events = collect(downloader.download_image(
            &url("p.png"),
            WebImageOptions::empty(),
            &LoadContext::default(),
        ))
        .await;
        let progress = events
            .iter()
            .filter(|e| matches!(e, LoaderEvent::Progress { .. }))
            .count();
        assert!(progress <= 4, "got {progress} progress events");
        assert!(matches!(events.last(), Some(LoaderEvent::Finished(Ok(_)))));
    }

    #[tokio::test]
    async fn test_progressive_load_final_image_is_not_incremental() {
        let transport = Arc::new(StubTransport::new());
        transport.reply(url("prog.png").as_str(), StubReply::ok(&png(16, 16), 4));
        let downloader = downloader(DownloaderConfig::default(), transport);

        let events = collect(downloader.download_image(
            &url("prog.png"),
            WebImageOptions::PROGRESSIVE_LOAD,
            &LoadContext::default(),
        ))
        .await;
        for event in &events {
            if let LoaderEvent::Partial { image, .. } = event {
                assert!(image.is_incremental());
            }
        }
        let Some(LoaderEvent::Finished(Ok(output))) = events.last() else {
            panic!("expected success");
        };
        assert!(!output.image.is_incremental());
    }

    /// Incremental-only coder that records every `finished` flag it is fed.
    struct RecordingCoder {
        updates: Arc<Mutex<Vec<bool>>>,
    }

    struct RecordingDecoder {
        updates: Arc<Mutex<Vec<bool>>>,
        finished: bool,
    }

    impl ImageCoder for RecordingCoder {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn can_decode(&self, _data: &[u8]) -> bool {
            false
        }

        fn decode(&self, _data: &Bytes, _options: &CoderOptions) -> Result<WebImage, CodecError> {
            Err(CodecError::UnsupportedFormat)
        }

        fn can_encode(&self, _format: ImageFormat) -> bool {
            false
        }

        fn encode(
            &self,
            _image: &WebImage,
            _format: ImageFormat,
            _options: &CoderOptions,
        ) -> Result<Bytes, CodecError> {
            Err(CodecError::UnsupportedFormat)
        }

        fn as_progressive(&self) -> Option<&dyn ProgressiveImageCoder> {
            Some(self)
        }
    }

    impl ProgressiveImageCoder for RecordingCoder {
        fn can_incremental_decode(&self, data: &[u8]) -> bool {
            ImageFormat::detect(data) == ImageFormat::Png
        }

        fn incremental_decoder(&self, _options: &CoderOptions) -> Box<dyn IncrementalDecoder> {
            Box::new(RecordingDecoder {
                updates: self.updates.clone(),
                finished: false,
            })
        }
    }

    impl IncrementalDecoder for RecordingDecoder {
        fn update(&mut self, _data: &Bytes, finished: bool) {
            self.updates.lock().push(finished);
            self.finished = finished;
        }

        fn decode_current(&mut self) -> Option<WebImage> {
            self.finished
                .then(|| WebImage::new(image::DynamicImage::new_rgba8(1, 1), ImageFormat::Png))
        }
    }

    fn recording_downloader(
        transport: Arc<StubTransport>,
    ) -> (ImageDownloader, Arc<Mutex<Vec<bool>>>) {
        let updates = Arc::new(Mutex::new(Vec::new()));
        let coders = CodersManager::with_defaults();
        coders.add_coder(Arc::new(RecordingCoder {
            updates: updates.clone(),
        }));
        let downloader =
            ImageDownloader::new(DownloaderConfig::default(), transport, Arc::new(coders));
        (downloader, updates)
    }

    #[tokio::test]
    async fn test_progressive_decoder_produces_final_image() {
        let transport = Arc::new(StubTransport::new());
        transport.reply(url("fin.png").as_str(), StubReply::ok(&png(16, 16), 4));
        let (downloader, updates) = recording_downloader(transport);

        let output = downloader
            .download_image(
                &url("fin.png"),
                WebImageOptions::PROGRESSIVE_LOAD,
                &LoadContext::default(),
            )
            .finished()
            .await
            .unwrap();

        assert_eq!(output.image.width(), 1);
        assert!(!output.image.is_incremental());
        let updates = updates.lock();
        assert_eq!(updates.last(), Some(&true));
        assert_eq!(updates.iter().filter(|finished| **finished).count(), 1);
    }

    #[tokio::test]
    async fn test_progressive_thumbnail_uses_full_decode() {
        let transport = Arc::new(StubTransport::new());
        transport.reply(url("thumb.png").as_str(), StubReply::ok(&png(16, 16), 4));
        let (downloader, updates) = recording_downloader(transport);

        let output = downloader
            .download_image(
                &url("thumb.png"),
                WebImageOptions::PROGRESSIVE_LOAD | WebImageOptions::SCALE_DOWN_LARGE_IMAGES,
                &LoadContext::default(),
            )
            .finished()
            .await
            .unwrap();

        assert_eq!(output.image.width(), 16);
        assert!(!updates.lock().contains(&true));
    }

    #[test_case(WebImageError::invalid_url("x"), true ; "invalid url")]
    #[test_case(WebImageError::bad_data("x"), true ; "bad data")]
    #[test_case(WebImageError::InvalidDownloadStatusCode { status: 404 }, true ; "not found")]
    #[test_case(WebImageError::InvalidDownloadStatusCode { status: 408 }, false ; "request timeout")]
    #[test_case(WebImageError::InvalidDownloadStatusCode { status: 429 }, false ; "too many requests")]
    #[test_case(WebImageError::InvalidDownloadStatusCode { status: 503 }, false ; "unavailable")]
    #[test_case(WebImageError::transport(TransportErrorKind::Connect, "x"), false ; "connect")]
    #[test_case(WebImageError::transport(TransportErrorKind::Request, "x"), true ; "request")]
    #[test_case(WebImageError::Cancelled, false ; "cancelled")]
    #[test_case(WebImageError::CacheNotModified, false ; "not modified")]
    fn test_default_block_policy(error: WebImageError, blocked: bool) {
        assert_eq!(should_block_failed_url(&error), blocked);
    }
}
