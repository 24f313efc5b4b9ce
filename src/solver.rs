//! Deformation solver interface.
//!
//! The nonlinear pose/mesh deformation engine is an external collaborator;
//! the backend only drives it through this trait. Permanent variables are
//! keyed by producer-assigned solver keys; temporary control points (place
//! nodes selected by the spanning tree) are keyed by scene-graph node id and
//! cleared wholesale before every optimization.

use std::collections::HashMap;

use crate::core::types::{Pose3, RawMesh};
use crate::graph::NodeId;

/// Interface to the deformation/pose-graph optimization engine.
pub trait DeformationSolver: Send {
    /// Add a permanent pose variable.
    fn add_node(&mut self, key: u64, pose: Pose3);

    /// Add a relative-pose factor between two permanent variables.
    fn add_between_factor(&mut self, key_from: u64, key_to: u64, relative_pose: Pose3);

    /// Add a temporary control-point variable.
    fn add_temporary_node(&mut self, id: NodeId, pose: Pose3, is_initial: bool);

    /// Attach mesh vertices to a temporary control point.
    fn add_temporary_valence(&mut self, id: NodeId, mesh_vertices: &[usize], vertex_prefix: char);

    /// Add a relative-pose factor between two temporary control points.
    fn add_temporary_between(&mut self, from: NodeId, to: NodeId, relative_pose: Pose3);

    /// Drop all temporary variables and factors.
    fn clear_temporary_structures(&mut self);

    /// Run a full optimization step.
    fn optimize(&mut self);

    /// Current estimates for permanent variables.
    fn values(&self) -> HashMap<u64, Pose3>;

    /// Current estimates for temporary control points.
    fn temporary_values(&self) -> HashMap<NodeId, Pose3>;

    /// Deform a raw mesh into corrected vertex positions using the latest
    /// optimized trajectory.
    fn deform_mesh(
        &self,
        mesh: &RawMesh,
        vertex_prefix: char,
        num_interp_points: usize,
        interp_horizon_s: f64,
    ) -> RawMesh;

    /// Whether a permanent variable exists for a key.
    fn has_key(&self, key: u64) -> bool;

    /// Total number of factors (permanent + temporary).
    fn num_factors(&self) -> usize;

    /// Total number of variables (permanent + temporary).
    fn num_values(&self) -> usize;
}

/// A solver that records variables and factors without optimizing.
///
/// Equivalent to running the real engine in store-only mode: values are
/// returned exactly as supplied and mesh deformation is the identity. Used by
/// the node binary when no solver backend is wired and by tests.
#[derive(Debug, Default)]
pub struct RecordOnlySolver {
    values: HashMap<u64, Pose3>,
    factors: Vec<(u64, u64, Pose3)>,
    temp_values: HashMap<NodeId, Pose3>,
    temp_factors: Vec<(NodeId, NodeId, Pose3)>,
    temp_valences: HashMap<NodeId, Vec<usize>>,
    temp_initial_flags: Vec<bool>,
    num_optimize_calls: usize,
}

impl RecordOnlySolver {
    /// Create an empty solver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `optimize` calls so far.
    pub fn num_optimize_calls(&self) -> usize {
        self.num_optimize_calls
    }

    /// Mesh vertices attached to a control point.
    pub fn valence(&self, id: NodeId) -> Option<&[usize]> {
        self.temp_valences.get(&id).map(|v| v.as_slice())
    }

    /// Number of temporary between-factors currently registered.
    pub fn num_temporary_betweens(&self) -> usize {
        self.temp_factors.len()
    }

    /// The `is_initial` flag of each temporary node, in insertion order.
    pub fn temporary_initial_flags(&self) -> &[bool] {
        &self.temp_initial_flags
    }
}

impl DeformationSolver for RecordOnlySolver {
    fn add_node(&mut self, key: u64, pose: Pose3) {
        self.values.insert(key, pose);
    }

    fn add_between_factor(&mut self, key_from: u64, key_to: u64, relative_pose: Pose3) {
        self.factors.push((key_from, key_to, relative_pose));
    }

    fn add_temporary_node(&mut self, id: NodeId, pose: Pose3, is_initial: bool) {
        self.temp_values.insert(id, pose);
        self.temp_initial_flags.push(is_initial);
    }

    fn add_temporary_valence(&mut self, id: NodeId, mesh_vertices: &[usize], _vertex_prefix: char) {
        self.temp_valences.insert(id, mesh_vertices.to_vec());
    }

    fn add_temporary_between(&mut self, from: NodeId, to: NodeId, relative_pose: Pose3) {
        self.temp_factors.push((from, to, relative_pose));
    }

    fn clear_temporary_structures(&mut self) {
        self.temp_values.clear();
        self.temp_factors.clear();
        self.temp_valences.clear();
        self.temp_initial_flags.clear();
    }

    fn optimize(&mut self) {
        self.num_optimize_calls += 1;
    }

    fn values(&self) -> HashMap<u64, Pose3> {
        self.values.clone()
    }

    fn temporary_values(&self) -> HashMap<NodeId, Pose3> {
        self.temp_values.clone()
    }

    fn deform_mesh(
        &self,
        mesh: &RawMesh,
        _vertex_prefix: char,
        _num_interp_points: usize,
        _interp_horizon_s: f64,
    ) -> RawMesh {
        mesh.clone()
    }

    fn has_key(&self, key: u64) -> bool {
        self.values.contains_key(&key)
    }

    fn num_factors(&self) -> usize {
        self.factors.len() + self.temp_factors.len()
    }

    fn num_values(&self) -> usize {
        self.values.len() + self.temp_values.len()
    }
}
