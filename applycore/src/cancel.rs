//! Cooperative cancellation of an apply.
//!
//! Raising the [`CancelHandle`] stops new operations from starting. Provider
//! calls already in flight run to completion, because interrupting an
//! external process halfway through a change risks leaving remote objects in
//! a state nobody recorded.

use std::sync::Arc;
use tokio::sync::watch;

/// Creates a connected handle and signal.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, CancelSignal { rx: Some(rx) })
}

/// Raises cancellation. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Observes cancellation. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelSignal {
    /// A signal that is never raised.
    pub const fn never() -> Self {
        Self { rx: None }
    }

    /// Returns true once cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Waits until cancellation is requested. Never completes for
    /// [`CancelSignal::never`], or once every handle is gone without
    /// cancelling.
    pub async fn cancelled(&self) {
        if let Some(rx) = &self.rx {
            let mut rx = rx.clone();
            let raised = rx.wait_for(|cancelled| *cancelled).await.is_ok();
            if raised {
                return;
            }
        }
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn never_is_never_cancelled() {
        assert!(!CancelSignal::never().is_cancelled());
    }

    #[tokio::test]
    async fn cancel_is_observed_by_every_clone() {
        let (handle, signal) = cancel_pair();
        let other = signal.clone();
        assert!(!signal.is_cancelled());

        let waiter = tokio::spawn(async move { other.cancelled().await });
        handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("cancellation should wake waiters")
            .unwrap();
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn dropped_handle_does_not_cancel() {
        let (handle, signal) = cancel_pair();
        drop(handle);
        assert!(!signal.is_cancelled());
        let res = tokio::time::timeout(Duration::from_millis(20), signal.cancelled()).await;
        assert!(res.is_err());
    }
}
