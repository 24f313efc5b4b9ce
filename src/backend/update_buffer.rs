//! Pending-update accumulators for streamed factor graphs.
//!
//! Producers append under the buffer's own locks and never block on backend
//! work; the backend drains atomically once per cycle. No backpressure is
//! applied, so the accumulators grow between drains if the loop stalls.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::core::types::RawMesh;
use crate::messages::PoseGraphMsg;

/// Everything taken out of the buffer by one drain.
#[derive(Debug, Default)]
pub struct DrainedUpdates {
    /// Coalesced deformation-graph (mesh/geometry) factors.
    pub mesh_graph: Option<PoseGraphMsg>,

    /// Coalesced pose-graph factors.
    pub pose_graph: Option<PoseGraphMsg>,
}

impl DrainedUpdates {
    /// Whether the drain produced nothing.
    pub fn is_empty(&self) -> bool {
        self.mesh_graph.is_none() && self.pose_graph.is_none()
    }
}

/// Locked accumulators for incoming partial factor graphs and raw meshes.
pub struct UpdateBuffer {
    mesh_graph: Mutex<Option<PoseGraphMsg>>,
    pose_graph: Mutex<Option<PoseGraphMsg>>,
    latest_mesh: Mutex<Option<RawMesh>>,
    have_new_mesh: Mutex<bool>,
    last_timestamp_us: AtomicU64,
    dropped_empty_meshes: AtomicUsize,
}

impl UpdateBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self {
            mesh_graph: Mutex::new(None),
            pose_graph: Mutex::new(None),
            latest_mesh: Mutex::new(None),
            have_new_mesh: Mutex::new(false),
            last_timestamp_us: AtomicU64::new(0),
            dropped_empty_meshes: AtomicUsize::new(0),
        }
    }

    /// Append a deformation-graph message, initializing the accumulator if
    /// empty. Called from producer threads.
    pub fn ingest_mesh_graph(&self, msg: &PoseGraphMsg) {
        let mut pending = self.mesh_graph.lock();
        match pending.as_mut() {
            Some(existing) => existing.merge_from(msg),
            None => *pending = Some(msg.clone()),
        }
        self.last_timestamp_us
            .store(msg.timestamp_us, Ordering::Release);
    }

    /// Append a pose-graph message, initializing the accumulator if empty.
    pub fn ingest_pose_graph(&self, msg: &PoseGraphMsg) {
        let mut pending = self.pose_graph.lock();
        match pending.as_mut() {
            Some(existing) => existing.merge_from(msg),
            None => *pending = Some(msg.clone()),
        }
    }

    /// Replace the latest raw mesh. Empty meshes are dropped and counted.
    pub fn ingest_full_mesh(&self, mesh: RawMesh) {
        if mesh.is_empty() {
            self.dropped_empty_meshes.fetch_add(1, Ordering::Relaxed);
            debug!("dropping empty mesh");
            return;
        }
        let mut latest = self.latest_mesh.lock();
        *latest = Some(mesh);
        *self.have_new_mesh.lock() = true;
    }

    /// Atomically take ownership of both accumulators, leaving them empty.
    /// Called only by the backend loop.
    pub fn drain(&self) -> DrainedUpdates {
        DrainedUpdates {
            mesh_graph: self.mesh_graph.lock().take(),
            pose_graph: self.pose_graph.lock().take(),
        }
    }

    /// Take the latest mesh if one arrived since the last take.
    pub fn take_new_mesh(&self) -> Option<RawMesh> {
        let latest = self.latest_mesh.lock();
        let mut have_new = self.have_new_mesh.lock();
        if !*have_new {
            return None;
        }
        *have_new = false;
        latest.clone()
    }

    /// Timestamp of the most recent deformation-graph message, microseconds.
    pub fn last_timestamp_us(&self) -> u64 {
        self.last_timestamp_us.load(Ordering::Acquire)
    }

    /// Number of empty meshes dropped at ingest.
    pub fn dropped_empty_meshes(&self) -> usize {
        self.dropped_empty_meshes.load(Ordering::Relaxed)
    }
}

impl Default for UpdateBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Pose3;
    use crate::messages::{EdgeKind, PoseGraphEdge};
    use nalgebra::Vector3;

    fn msg_with_edges(stamp: u64, keys: &[(u64, u64)]) -> PoseGraphMsg {
        PoseGraphMsg {
            timestamp_us: stamp,
            edges: keys
                .iter()
                .map(|&(from, to)| PoseGraphEdge {
                    key_from: from,
                    key_to: to,
                    relative_pose: Pose3::identity(),
                    kind: EdgeKind::Odometry,
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_drain_returns_concatenation_in_order() {
        let buffer = UpdateBuffer::new();
        buffer.ingest_pose_graph(&msg_with_edges(1, &[(0, 1)]));
        buffer.ingest_pose_graph(&msg_with_edges(2, &[(1, 2), (2, 3)]));
        buffer.ingest_mesh_graph(&msg_with_edges(3, &[(10, 11)]));

        let drained = buffer.drain();

        let pose = drained.pose_graph.expect("pose updates pending");
        assert_eq!(pose.edges.len(), 3);
        assert_eq!(pose.edges[0].key_from, 0);
        assert_eq!(pose.edges[1].key_from, 1);
        assert_eq!(pose.edges[2].key_from, 2);

        let mesh = drained.mesh_graph.expect("mesh updates pending");
        assert_eq!(mesh.edges.len(), 1);
        assert_eq!(buffer.last_timestamp_us(), 3);
    }

    #[test]
    fn test_drain_leaves_buffer_empty() {
        let buffer = UpdateBuffer::new();
        buffer.ingest_pose_graph(&msg_with_edges(1, &[(0, 1)]));

        assert!(!buffer.drain().is_empty());
        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn test_empty_mesh_dropped_and_counted() {
        let buffer = UpdateBuffer::new();
        buffer.ingest_full_mesh(RawMesh::new());

        assert_eq!(buffer.dropped_empty_meshes(), 1);
        assert!(buffer.take_new_mesh().is_none());
    }

    #[test]
    fn test_take_new_mesh_latches() {
        let buffer = UpdateBuffer::new();
        let mut mesh = RawMesh::new();
        mesh.push(Vector3::new(1.0, 0.0, 0.0), 100);
        buffer.ingest_full_mesh(mesh);

        assert!(buffer.take_new_mesh().is_some());
        // no new mesh since the last take
        assert!(buffer.take_new_mesh().is_none());
    }
}
