//! Core geometric types.

mod mesh;
mod pose;

pub use mesh::RawMesh;
pub use pose::Pose3;
