//! Messages exchanged with the front-end perception pipeline.
//!
//! Partial pose-graph and mesh-graph messages arrive asynchronously and are
//! coalesced by concatenation until the backend drains them. Keys are
//! producer-assigned and live in a single solver keyspace; the front end is
//! responsible for keeping trajectory and mesh-vertex keys disjoint.

use serde::{Deserialize, Serialize};

use crate::core::types::Pose3;
use crate::graph::NodeId;

/// Constraint type carried by a pose-graph edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeKind {
    /// Sequential odometry constraint.
    Odometry,
    /// Loop closure constraint.
    LoopClosure,
    /// Mesh-to-mesh or pose-to-mesh deformation constraint.
    Mesh,
}

/// A solver variable carried by a pose-graph message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoseGraphNode {
    /// Solver variable key.
    pub key: u64,

    /// Initial pose estimate.
    pub pose: Pose3,

    /// Timestamp in microseconds.
    pub timestamp_us: u64,
}

/// A relative-pose constraint between two solver variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoseGraphEdge {
    /// Source variable key.
    pub key_from: u64,

    /// Target variable key.
    pub key_to: u64,

    /// Relative pose measurement: `T_from^{-1} * T_to`.
    pub relative_pose: Pose3,

    /// Constraint type.
    pub kind: EdgeKind,
}

/// A partial factor graph streamed from the front end.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoseGraphMsg {
    /// Producing robot. The concat merge below assumes a single producer;
    /// multi-robot header reconciliation is an open design question.
    pub robot_id: u8,

    /// Message timestamp in microseconds.
    pub timestamp_us: u64,

    /// New solver variables.
    pub nodes: Vec<PoseGraphNode>,

    /// New constraints.
    pub edges: Vec<PoseGraphEdge>,
}

impl PoseGraphMsg {
    /// Append another message's contents, keeping the newer header.
    pub fn merge_from(&mut self, other: &PoseGraphMsg) {
        self.robot_id = other.robot_id;
        self.timestamp_us = other.timestamp_us;
        self.nodes.extend(other.nodes.iter().cloned());
        self.edges.extend(other.edges.iter().cloned());
    }
}

/// An accepted loop-closure proposal from the recognition process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopClosureCandidate {
    /// Agent node at the older end of the closure.
    pub from_node: NodeId,

    /// Agent node at the newer end of the closure.
    pub to_node: NodeId,

    /// Relative pose `to_T_from`.
    pub to_t_from: Pose3,

    /// Whether the candidate came from an external source rather than the
    /// internal recognition process.
    pub from_external: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(from: u64, to: u64) -> PoseGraphEdge {
        PoseGraphEdge {
            key_from: from,
            key_to: to,
            relative_pose: Pose3::identity(),
            kind: EdgeKind::Odometry,
        }
    }

    #[test]
    fn test_merge_concatenates_in_order() {
        let mut msg = PoseGraphMsg {
            timestamp_us: 10,
            edges: vec![edge(0, 1)],
            ..Default::default()
        };
        let other = PoseGraphMsg {
            timestamp_us: 20,
            edges: vec![edge(1, 2), edge(2, 3)],
            ..Default::default()
        };

        msg.merge_from(&other);

        assert_eq!(msg.timestamp_us, 20);
        assert_eq!(msg.edges.len(), 3);
        assert_eq!(msg.edges[0].key_from, 0);
        assert_eq!(msg.edges[2].key_from, 2);
    }
}
