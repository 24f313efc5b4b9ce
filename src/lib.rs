//! Incrementally-built multi-layer spatial scene graph backend.
//!
//! The backend consumes streamed pose-graph and mesh updates from a
//! perception front end and maintains a layered scene graph (agents, objects,
//! places, rooms, buildings) kept globally consistent through deformation
//! graph optimization.
//!
//! # Architecture
//!
//! Two graph copies exist for the process lifetime: the shared copy written
//! by the front end and the private copy owned by the backend loop. Each has
//! its own mutex and updated flag; the backend merges shared into private in
//! a short joint critical section once per cycle. Solver work runs under the
//! solver's own lock so graph readers never wait on an optimization.
//!
//! - backend thread: drains pending updates, feeds the solver, optimizes or
//!   refreshes, reconciles every layer, maintains rooms and the building
//! - render thread: snapshots the private graph whenever it changed
//!
//! Producers (the front end, loop-closure recognition) append to
//! [`backend::UpdateBuffer`] and [`shared::SharedDsg`] without ever blocking
//! on backend work.

pub mod backend;
pub mod config;
pub mod core;
pub mod error;
pub mod graph;
pub mod messages;
pub mod shared;
pub mod solver;

pub use backend::{BackendHandles, DsgBackend, UpdateBuffer};
pub use config::BackendConfig;
pub use crate::core::types::{Pose3, RawMesh};
pub use error::{GrihaError, Result};
pub use graph::{DynamicSceneGraph, LayerId, NodeAttributes, NodeId};
pub use messages::{EdgeKind, LoopClosureCandidate, PoseGraphEdge, PoseGraphMsg, PoseGraphNode};
pub use shared::SharedDsg;
pub use solver::{DeformationSolver, RecordOnlySolver};
