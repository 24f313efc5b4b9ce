//! Mesh vertex buffers exchanged with the deformation solver.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// A mesh as a flat vertex buffer with per-vertex timestamps.
///
/// Faces are irrelevant to the backend; deformation only moves vertices, so
/// connectivity stays on the front-end side. The vertex timestamps correlate
/// each vertex with the trajectory segment that observed it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawMesh {
    /// Vertex positions (meters).
    pub vertices: Vec<Vector3<f64>>,

    /// Observation timestamp per vertex, in microseconds.
    pub vertex_timestamps_us: Vec<u64>,
}

impl RawMesh {
    /// Create an empty mesh.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of vertices.
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    /// Whether the mesh has no vertices.
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Append a vertex.
    pub fn push(&mut self, position: Vector3<f64>, timestamp_us: u64) {
        self.vertices.push(position);
        self.vertex_timestamps_us.push(timestamp_us);
    }
}
