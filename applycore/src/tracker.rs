//! Tracking of outstanding promise-driven requests.
//!
//! Operations in an execution graph wait on each other's results through
//! promises, and the configuration evaluator waits on final resource values
//! the same way. A bug in either can leave a wait that never completes.
//! Trackers expose every wait that is currently outstanding so that error
//! reporting can show what was waiting on what instead of a bare timeout.
//!
//! Tracking is purely observational: nothing here influences execution.

use crate::promise::RequestId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Describes what a request is trying to achieve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    /// Human-readable description, suitable for an error message.
    pub name: String,
}

/// Anything that can enumerate its outstanding requests.
pub trait RequestTracker: Send + Sync {
    /// Every request that is currently being waited on.
    fn active_requests(&self) -> Vec<(RequestId, RequestInfo)>;
}

#[derive(Debug)]
struct TrackedRequest {
    info: RequestInfo,
    waiters: usize,
}

/// Tracks the waits issued by execution graph operations on one another.
#[derive(Debug, Default)]
pub struct GraphRequestTracker {
    waits: Mutex<HashMap<RequestId, TrackedRequest>>,
}

impl GraphRequestTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that someone started waiting on `id`. The wait stays
    /// recorded until the returned guard is dropped.
    pub fn track(self: &Arc<Self>, id: RequestId, describe: impl FnOnce() -> RequestInfo) -> WaitGuard {
        self.waits
            .lock()
            .entry(id)
            .or_insert_with(|| TrackedRequest {
                info: describe(),
                waiters: 0,
            })
            .waiters += 1;
        WaitGuard {
            tracker: Arc::clone(self),
            id,
        }
    }

    fn release(&self, id: RequestId) {
        let mut waits = self.waits.lock();
        if let Some(entry) = waits.get_mut(&id) {
            entry.waiters -= 1;
            if entry.waiters == 0 {
                waits.remove(&id);
            }
        }
    }
}

impl RequestTracker for GraphRequestTracker {
    fn active_requests(&self) -> Vec<(RequestId, RequestInfo)> {
        let mut active: Vec<_> = self
            .waits
            .lock()
            .iter()
            .map(|(id, tracked)| (*id, tracked.info.clone()))
            .collect();
        active.sort_by_key(|(id, _)| *id);
        active
    }
}

/// Keeps a wait registered with a [`GraphRequestTracker`] while alive.
#[derive(Debug)]
pub struct WaitGuard {
    tracker: Arc<GraphRequestTracker>,
    id: RequestId,
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        self.tracker.release(self.id);
    }
}

/// The tracker for a whole apply: the execution graph's own waits merged
/// with whatever the configuration evaluator reports.
///
/// The evaluator's tracker only becomes known once the apply starts
/// executing, so it is attached later with [`ApplyRequestTracker::attach_evaluator`].
pub struct ApplyRequestTracker {
    graph: Arc<GraphRequestTracker>,
    evaluator: OnceLock<Arc<dyn RequestTracker>>,
}

impl ApplyRequestTracker {
    /// Wraps the execution graph's tracker.
    pub const fn new(graph: Arc<GraphRequestTracker>) -> Self {
        Self {
            graph,
            evaluator: OnceLock::new(),
        }
    }

    /// Adds the evaluator's tracker. Only the first call has any effect.
    pub fn attach_evaluator(&self, evaluator: Arc<dyn RequestTracker>) {
        let _ = self.evaluator.set(evaluator);
    }
}

impl std::fmt::Debug for ApplyRequestTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplyRequestTracker")
            .field("graph", &self.graph)
            .field("has_evaluator", &self.evaluator.get().is_some())
            .finish()
    }
}

impl RequestTracker for ApplyRequestTracker {
    fn active_requests(&self) -> Vec<(RequestId, RequestInfo)> {
        let mut active = self.graph.active_requests();
        if let Some(evaluator) = self.evaluator.get() {
            active.extend(evaluator.active_requests());
        }
        active.sort_by_key(|(id, _)| *id);
        active.dedup_by_key(|(id, _)| *id);
        active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::promise;

    struct FixedTracker(Vec<(RequestId, RequestInfo)>);

    impl RequestTracker for FixedTracker {
        fn active_requests(&self) -> Vec<(RequestId, RequestInfo)> {
            self.0.clone()
        }
    }

    fn info(name: &str) -> RequestInfo {
        RequestInfo { name: name.to_string() }
    }

    #[test]
    fn waits_are_visible_until_released() {
        let tracker = Arc::new(GraphRequestTracker::new());
        let (resolver, _promise) = promise::request::<()>();

        let first = tracker.track(resolver.id(), || info("internal operation: ManagedApply(...)"));
        let second = tracker.track(resolver.id(), || info("ignored, already described"));

        let active = tracker.active_requests();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].1.name, "internal operation: ManagedApply(...)");

        drop(first);
        assert_eq!(tracker.active_requests().len(), 1);
        drop(second);
        assert!(tracker.active_requests().is_empty());
    }

    #[test]
    fn apply_tracker_merges_evaluator_requests() {
        let graph = Arc::new(GraphRequestTracker::new());
        let (graph_req, _p1) = promise::request::<()>();
        let (eval_req, _p2) = promise::request::<()>();
        let _guard = graph.track(graph_req.id(), || info("graph"));

        let merged = ApplyRequestTracker::new(Arc::clone(&graph));
        assert_eq!(merged.active_requests().len(), 1);

        merged.attach_evaluator(Arc::new(FixedTracker(vec![(eval_req.id(), info("evaluator"))])));
        let names: Vec<_> = merged.active_requests().into_iter().map(|(_, i)| i.name).collect();
        assert_eq!(names, vec!["graph".to_string(), "evaluator".to_string()]);
    }
}
