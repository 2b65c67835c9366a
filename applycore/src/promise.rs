//! One-shot promises linking producers and consumers of results.
//!
//! Every execution graph operation owns a [`Resolver`] and hands out
//! [`Promise`]s to the operations that consume its result. Waiting on a
//! promise suspends the task until the resolver publishes a value, never
//! polls. If a resolver is dropped without resolving (for example because
//! its task panicked), every waiter gets [`PromiseError::Unresolved`]
//! instead of hanging.
//!
//! Each request carries a [`RequestId`] so outstanding waits can be
//! reported by the request trackers.

use crate::errors::PromiseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of one promise-driven request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(u64);

impl RequestId {
    fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Creates a new request, returning the resolving and awaiting ends.
pub fn request<T: Clone>() -> (Resolver<T>, Promise<T>) {
    let id = RequestId::next();
    let (tx, rx) = watch::channel(None);
    (Resolver { id, tx }, Promise { id, rx })
}

/// The producing end of a request. Resolving consumes it, so a request is
/// resolved at most once.
#[derive(Debug)]
pub struct Resolver<T> {
    id: RequestId,
    tx: watch::Sender<Option<T>>,
}

impl<T> Resolver<T> {
    /// The request this resolver answers.
    pub const fn id(&self) -> RequestId {
        self.id
    }

    /// Publishes the result, waking every waiter.
    pub fn resolve(self, value: T) {
        self.tx.send_replace(Some(value));
    }
}

/// The awaiting end of a request. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Promise<T> {
    id: RequestId,
    rx: watch::Receiver<Option<T>>,
}

impl<T: Clone> Promise<T> {
    /// The request this promise belongs to.
    pub const fn id(&self) -> RequestId {
        self.id
    }

    /// Returns the result if it has already been published.
    pub fn try_get(&self) -> Option<T> {
        self.rx.borrow().clone()
    }

    /// Waits for the result.
    pub async fn wait(&self) -> Result<T, PromiseError> {
        let mut rx = self.rx.clone();
        let resolved = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| PromiseError::Unresolved(self.id))?;
        (*resolved).clone().ok_or(PromiseError::Unresolved(self.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn waiters_receive_the_resolved_value() {
        let (resolver, promise) = request::<u32>();
        let other = promise.clone();
        let waiter = tokio::spawn(async move { other.wait().await });

        tokio::time::sleep(Duration::from_millis(5)).await;
        resolver.resolve(7);

        assert_eq!(waiter.await.unwrap(), Ok(7));
        assert_eq!(promise.wait().await, Ok(7));
        assert_eq!(promise.try_get(), Some(7));
    }

    #[tokio::test]
    async fn dropped_resolver_reports_unresolved() {
        let (resolver, promise) = request::<String>();
        let id = resolver.id();
        drop(resolver);
        assert_eq!(promise.wait().await, Err(PromiseError::Unresolved(id)));
    }

    #[test]
    fn request_ids_are_unique() {
        let (a, _) = request::<()>();
        let (b, _) = request::<()>();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn unresolved_promise_has_no_value() {
        let (_resolver, promise) = request::<u8>();
        assert_eq!(promise.try_get(), None);
    }

    proptest::proptest! {
        #[test]
        fn every_clone_sees_the_one_resolved_value(value: u64, clones in 1_usize..8) {
            tokio_test::block_on(async {
                let (resolver, promise) = request::<u64>();
                let waiters: Vec<_> = (0..clones).map(|_| promise.clone()).collect();
                resolver.resolve(value);
                for waiter in &waiters {
                    assert_eq!(waiter.wait().await, Ok(value));
                    assert_eq!(waiter.id(), promise.id());
                }
            });
        }
    }
}
