//! Cancelable operation handle.

/// A handle to in-flight work. `cancel` is idempotent and a no-op once the
/// work has completed.
pub trait Cancellable: Send + Sync {
    /// Requests cancellation.
    fn cancel(&self);

    /// Returns true once cancellation has been recorded.
    fn is_cancelled(&self) -> bool;
}

/// Handle for work that already finished synchronously.
#[derive(Debug, Default, Clone, Copy)]
pub struct CompletedOperation;

impl Cancellable for CompletedOperation {
    fn cancel(&self) {}

    fn is_cancelled(&self) -> bool {
        false
    }
}
