//! Handle for one queued or running download.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::domain::entities::DownloadRequest;
use crate::domain::ports::Cancellable;

const PENDING: u8 = 0;
const FINISHED: u8 = 1;
const CANCELLED: u8 = 2;

/// Response head recorded once it arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseInfo {
    /// HTTP status code.
    pub status: u16,
    /// Announced body length.
    pub expected_len: Option<u64>,
}

/// Messages from tokens back to the worker loop.
#[derive(Debug)]
pub(super) enum TokenCommand {
    Cancel(Uuid),
}

struct TokenState {
    id: Uuid,
    request: DownloadRequest,
    response: OnceLock<ResponseInfo>,
    cancel: CancellationToken,
    state: AtomicU8,
    delivery: Mutex<()>,
    commands: mpsc::WeakUnboundedSender<TokenCommand>,
}

/// Identifies a download and lets the caller cancel it.
///
/// Exactly one of `finish` and `cancel` wins; the loser becomes a no-op.
#[derive(Clone)]
pub struct DownloadToken {
    inner: Arc<TokenState>,
}

impl DownloadToken {
    pub(super) fn new(
        request: DownloadRequest,
        commands: mpsc::WeakUnboundedSender<TokenCommand>,
    ) -> Self {
        Self {
            inner: Arc::new(TokenState {
                id: Uuid::new_v4(),
                request,
                response: OnceLock::new(),
                cancel: CancellationToken::new(),
                state: AtomicU8::new(PENDING),
                delivery: Mutex::new(()),
                commands,
            }),
        }
    }

    /// Unique id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// URL being downloaded.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.inner.request.url
    }

    /// Request as it is sent, after the request modifier ran.
    #[must_use]
    pub fn request(&self) -> &DownloadRequest {
        &self.inner.request
    }

    /// Response head, once received.
    #[must_use]
    pub fn response(&self) -> Option<ResponseInfo> {
        self.inner.response.get().copied()
    }

    /// True while neither finished nor cancelled.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == PENDING
    }

    /// True once the terminal event was delivered.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == FINISHED
    }

    pub(super) fn set_response(&self, info: ResponseInfo) {
        let _ = self.inner.response.set(info);
    }

    pub(super) fn cancellation(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Runs `send` only while the download is pending. `cancel` waits for a
    /// delivery in progress, so nothing is sent once `cancel` returned.
    pub(super) fn deliver(&self, send: impl FnOnce()) -> bool {
        let _guard = self.inner.delivery.lock();
        if !self.is_pending() {
            return false;
        }
        send();
        true
    }

    /// Claims the right to deliver the terminal event.
    pub(super) fn finish(&self) -> bool {
        self.inner
            .state
            .compare_exchange(PENDING, FINISHED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Cancellable for DownloadToken {
    fn cancel(&self) {
        let claimed = {
            let _guard = self.inner.delivery.lock();
            self.inner
                .state
                .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        };
        if !claimed {
            return;
        }
        debug!(url = %self.url(), "Download cancelled");
        self.inner.cancel.cancel();
        if let Some(commands) = self.inner.commands.upgrade() {
            let _ = commands.send(TokenCommand::Cancel(self.inner.id));
        }
    }

    fn is_cancelled(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == CANCELLED
    }
}

impl std::fmt::Debug for DownloadToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadToken")
            .field("id", &self.inner.id)
            .field("url", &self.inner.request.url.as_str())
            .field("state", &self.inner.state.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
