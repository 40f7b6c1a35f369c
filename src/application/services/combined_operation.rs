//! Cancellation handle spanning the cache and loader phases of one load.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::application::dto::{ImageResult, LoadEvent};
use crate::domain::errors::WebImageError;
use crate::domain::ports::Cancellable;

/// Running operations keyed by id.
pub type OperationRegistry = Mutex<HashMap<Uuid, Arc<CombinedOperation>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Active,
    Cancelled,
    Finished,
}

struct OperationState {
    phase: Phase,
    loader: Option<Arc<dyn Cancellable>>,
    events: Option<mpsc::UnboundedSender<LoadEvent>>,
}

/// Aggregates the cache query and the loader request of one load.
///
/// Every transition happens under one lock, so a cancel that wins the race
/// against `start_loader` keeps the loader from ever being called, and no
/// event is delivered once cancellation was recorded.
pub struct CombinedOperation {
    id: Uuid,
    url: Url,
    cancel_token: CancellationToken,
    state: Mutex<OperationState>,
    registry: Weak<OperationRegistry>,
}

impl CombinedOperation {
    /// Creates an active operation reporting to `events` and registers it.
    pub fn start(
        url: Url,
        events: mpsc::UnboundedSender<LoadEvent>,
        registry: &Arc<OperationRegistry>,
    ) -> Arc<Self> {
        let operation = Arc::new(Self {
            id: Uuid::new_v4(),
            url,
            cancel_token: CancellationToken::new(),
            state: Mutex::new(OperationState {
                phase: Phase::Active,
                loader: None,
                events: Some(events),
            }),
            registry: Arc::downgrade(registry),
        });
        registry.lock().insert(operation.id, operation.clone());
        operation
    }

    /// Unique id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Requested URL.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Token fired by `cancel`, observed by the cache query and the
    /// loader event loop.
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    /// True once the terminal event was delivered.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state.lock().phase == Phase::Finished
    }

    /// Issues the loader request unless the operation was cancelled.
    /// Returns false if `request` was not called.
    pub fn start_loader(&self, request: impl FnOnce() -> Arc<dyn Cancellable>) -> bool {
        let mut state = self.state.lock();
        if state.phase != Phase::Active {
            return false;
        }
        state.loader = Some(request());
        true
    }

    /// Delivers a non-terminal event while active.
    pub fn send(&self, event: LoadEvent) {
        let state = self.state.lock();
        if state.phase == Phase::Active {
            if let Some(events) = &state.events {
                let _ = events.send(event);
            }
        }
    }

    /// Delivers the terminal event. Returns false if the operation was
    /// already cancelled or finished.
    pub fn finish(&self, result: Result<ImageResult, WebImageError>) -> bool {
        let events = {
            let mut state = self.state.lock();
            if state.phase != Phase::Active {
                return false;
            }
            state.phase = Phase::Finished;
            state.loader = None;
            state.events.take()
        };
        if let Some(events) = events {
            let _ = events.send(LoadEvent::Completed(result));
        }
        self.unregister();
        true
    }

    fn unregister(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().remove(&self.id);
        }
    }
}

impl Cancellable for CombinedOperation {
    fn cancel(&self) {
        let loader = {
            let mut state = self.state.lock();
            if state.phase != Phase::Active {
                return;
            }
            state.phase = Phase::Cancelled;
            state.events = None;
            state.loader.take()
        };
        debug!(url = %self.url, "Load cancelled");
        self.cancel_token.cancel();
        if let Some(loader) = loader {
            loader.cancel();
        }
        self.unregister();
    }

    fn is_cancelled(&self) -> bool {
        self.state.lock().phase == Phase::Cancelled
    }
}

impl std::fmt::Debug for CombinedOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CombinedOperation")
            .field("id", &self.id)
            .field("url", &self.url.as_str())
            .field("phase", &self.state.lock().phase)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::CacheType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingCancel(AtomicUsize);

    impl Cancellable for CountingCancel {
        fn cancel(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn is_cancelled(&self) -> bool {
            self.0.load(Ordering::SeqCst) > 0
        }
    }

    fn operation() -> (
        Arc<CombinedOperation>,
        mpsc::UnboundedReceiver<LoadEvent>,
        Arc<OperationRegistry>,
    ) {
        let registry = Arc::new(OperationRegistry::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let url = Url::parse("https://example.com/a.png").unwrap();
        (CombinedOperation::start(url, tx, &registry), rx, registry)
    }

    #[test]
    fn test_cancel_before_loader_prevents_request() {
        let (op, mut rx, registry) = operation();
        assert_eq!(registry.lock().len(), 1);
        op.cancel();
        op.cancel();

        let mut called = false;
        assert!(!op.start_loader(|| {
            called = true;
            Arc::new(CountingCancel::default()) as Arc<dyn Cancellable>
        }));
        assert!(!called);
        assert!(op.cancellation_token().is_cancelled());
        assert!(registry.lock().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_cancel_reaches_loader_once() {
        let (op, _rx, _registry) = operation();
        let loader = Arc::new(CountingCancel::default());
        assert!(op.start_loader(|| loader.clone() as Arc<dyn Cancellable>));
        op.cancel();
        op.cancel();
        assert_eq!(loader.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_finish_delivers_once_and_closes_stream() {
        let (op, mut rx, registry) = operation();
        let result = ImageResult {
            image: None,
            data: None,
            cache_type: CacheType::None,
            url: op.url().clone(),
            finished: true,
        };
        assert!(op.finish(Ok(result.clone())));
        assert!(!op.finish(Ok(result)));
        op.cancel();
        assert!(!op.is_cancelled());
        assert!(matches!(rx.try_recv(), Ok(LoadEvent::Completed(Ok(_)))));
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
        assert!(registry.lock().is_empty());
    }

    #[test]
    fn test_events_dropped_after_cancel() {
        let (op, mut rx, _registry) = operation();
        op.cancel();
        op.send(LoadEvent::Progress {
            received: 1,
            expected: None,
            url: op.url().clone(),
        });
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }
}
