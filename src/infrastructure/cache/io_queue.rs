//! Single-threaded executor that serializes disk work for one cache.

use std::panic::AssertUnwindSafe;
use std::sync::mpsc;
use std::thread::ThreadId;

use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::domain::errors::{CacheError, CacheResult};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs submitted closures one at a time, in submission order, on a
/// dedicated thread. The thread exits once the queue is dropped.
pub struct IoQueue {
    sender: mpsc::Sender<Job>,
    thread_id: ThreadId,
    label: String,
}

impl IoQueue {
    /// Spawns the worker thread.
    ///
    /// # Errors
    /// Returns `CacheError::Io` if the thread cannot be spawned.
    pub fn new(label: impl Into<String>) -> CacheResult<Self> {
        let label = label.into();
        let (sender, receiver) = mpsc::channel::<Job>();
        let handle = std::thread::Builder::new()
            .name(label.clone())
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    if std::panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!("cache I/O job panicked");
                    }
                }
                debug!("cache I/O queue stopped");
            })?;
        Ok(Self {
            sender,
            thread_id: handle.thread().id(),
            label,
        })
    }

    /// True when called from the queue's own thread.
    #[must_use]
    pub fn is_current(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    /// Enqueues `job` without waiting for it.
    ///
    /// # Errors
    /// Returns `CacheError::QueueClosed` if the worker has stopped.
    pub fn spawn(&self, job: impl FnOnce() + Send + 'static) -> CacheResult<()> {
        self.sender
            .send(Box::new(job))
            .map_err(|_| CacheError::QueueClosed)
    }

    /// Runs `f` on the queue and awaits its result.
    ///
    /// # Errors
    /// Returns `CacheError::QueueClosed` if the worker stopped or `f` panicked.
    pub async fn run<T, F>(&self, f: F) -> CacheResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.spawn(move || {
            let _ = tx.send(f());
        })?;
        rx.await.map_err(|_| CacheError::QueueClosed)
    }

    /// Runs `f` on the queue and blocks the calling thread until it is done.
    /// Runs inline when already on the queue thread.
    ///
    /// # Errors
    /// Returns `CacheError::QueueClosed` if the worker stopped or `f` panicked.
    pub fn run_blocking<T, F>(&self, f: F) -> CacheResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if self.is_current() {
            return Ok(f());
        }
        let (tx, rx) = mpsc::sync_channel(1);
        self.spawn(move || {
            let _ = tx.send(f());
        })?;
        rx.recv().map_err(|_| CacheError::QueueClosed)
    }
}

impl std::fmt::Debug for IoQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoQueue")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}
