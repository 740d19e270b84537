//! Cooperative cancellation for reconcile runs.

use tokio::sync::watch;

/// Triggers cancellation of every [`CancelSignal`] created with it.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Cancel all listening signals.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Create another signal tied to this handle.
    #[must_use]
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Wrap the handle so that dropping it cancels.
    #[must_use]
    pub fn cancel_on_drop(self) -> CancelGuard {
        CancelGuard { handle: self }
    }
}

/// Cancels its signals when dropped.
///
/// Held by whoever waits on a detached run, so that abandoning the wait
/// (a dropped request, a timeout) stops the run at its next checkpoint.
#[derive(Debug)]
pub struct CancelGuard {
    handle: CancelHandle,
}

impl CancelGuard {
    /// Cancel now, without waiting for the drop.
    pub fn cancel(&self) {
        self.handle.cancel();
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.handle.cancel();
    }
}

/// Observed by a reconcile run between and during cluster writes.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// Create a linked handle and signal.
    #[must_use]
    pub fn new() -> (CancelHandle, Self) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, Self { rx })
    }

    /// A signal that never fires.
    #[must_use]
    pub fn never() -> Self {
        Self::new().1
    }

    /// Returns true once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve when cancellation is requested.
    ///
    /// Pends forever if the handle is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        if self.rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::never()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn cancel_is_observed_by_all_signals() {
        let (handle, signal) = CancelSignal::new();
        let other = handle.signal();
        let cloned = signal.clone();

        assert!(!signal.is_cancelled());
        handle.cancel();

        assert!(signal.is_cancelled());
        assert!(other.is_cancelled());
        assert!(cloned.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_resolves_after_cancel() {
        let (handle, mut signal) = CancelSignal::new();

        let waiter = tokio::spawn(async move {
            signal.cancelled().await;
        });
        handle.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn guard_cancels_on_drop() {
        let (handle, signal) = CancelSignal::new();
        let guard = handle.cancel_on_drop();

        assert!(!signal.is_cancelled());
        drop(guard);
        assert!(signal.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn never_does_not_resolve() {
        let mut signal = CancelSignal::never();
        assert!(!signal.is_cancelled());

        let result = tokio::time::timeout(Duration::from_secs(5), signal.cancelled()).await;
        assert!(result.is_err());
    }
}
