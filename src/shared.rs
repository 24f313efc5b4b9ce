//! Shared state for the multi-threaded backend.
//!
//! Two [`SharedDsg`] instances exist for the process lifetime: the shared copy
//! written by the front end and the private copy owned by the backend loop.
//! Each pairs a graph with its own mutex and an "updated" flag; the shared
//! copy additionally carries the loop-closure queue (its own mutex) and the
//! set of place nodes activated since the last merge.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::graph::{DynamicSceneGraph, NodeId};
use crate::messages::LoopClosureCandidate;

/// One lock-guarded copy of the scene graph plus its side state.
pub struct SharedDsg {
    /// The graph. Producers and consumers hold this lock only for short
    /// merge/snapshot sections, never across solver work.
    pub graph: Mutex<DynamicSceneGraph>,

    /// Set when the owning writer has produced changes the consumer has not
    /// yet seen.
    updated: AtomicBool,

    /// Place nodes newly activated since the last shared-to-private merge.
    pub latest_places: Mutex<HashSet<NodeId>>,

    /// Accepted loop-closure proposals, in arrival order. Own mutex so
    /// recognition never contends with graph writers.
    loop_closures: Mutex<VecDeque<LoopClosureCandidate>>,

    /// Process shutdown flag, polled at the top of every loop iteration.
    shutdown: AtomicBool,
}

impl SharedDsg {
    /// Create an empty instance.
    pub fn new() -> Self {
        Self {
            graph: Mutex::new(DynamicSceneGraph::new()),
            updated: AtomicBool::new(false),
            latest_places: Mutex::new(HashSet::new()),
            loop_closures: Mutex::new(VecDeque::new()),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Mark the graph as updated.
    pub fn mark_updated(&self) {
        self.updated.store(true, Ordering::Release);
    }

    /// Whether unseen changes are pending.
    pub fn is_updated(&self) -> bool {
        self.updated.load(Ordering::Acquire)
    }

    /// Clear the updated flag, returning its previous value.
    pub fn take_updated(&self) -> bool {
        self.updated.swap(false, Ordering::AcqRel)
    }

    /// Queue an accepted loop-closure candidate.
    pub fn push_loop_closure(&self, candidate: LoopClosureCandidate) {
        self.loop_closures.lock().push_back(candidate);
    }

    /// Pop every queued candidate as a batch, preserving arrival order.
    pub fn drain_loop_closures(&self) -> Vec<LoopClosureCandidate> {
        self.loop_closures.lock().drain(..).collect()
    }

    /// Signal shutdown to every thread polling this instance.
    pub fn signal_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Whether shutdown has been signaled.
    pub fn should_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

impl Default for SharedDsg {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Pose3;

    #[test]
    fn test_updated_flag_roundtrip() {
        let dsg = SharedDsg::new();
        assert!(!dsg.is_updated());

        dsg.mark_updated();
        assert!(dsg.is_updated());
        assert!(dsg.take_updated());
        assert!(!dsg.is_updated());
        assert!(!dsg.take_updated());
    }

    #[test]
    fn test_loop_closure_queue_preserves_order() {
        let dsg = SharedDsg::new();
        for i in 0..3 {
            dsg.push_loop_closure(LoopClosureCandidate {
                from_node: NodeId(i),
                to_node: NodeId(i + 10),
                to_t_from: Pose3::identity(),
                from_external: false,
            });
        }

        let drained = dsg.drain_loop_closures();
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[0].from_node, NodeId(0));
        assert_eq!(drained[2].from_node, NodeId(2));
        assert!(dsg.drain_loop_closures().is_empty());
    }
}
