//! Configuration loading for the scene graph backend.

use serde::Deserialize;
use std::path::Path;
use tracing::warn;

use crate::error::Result;

/// Nonlinear solver flavor requested from the deformation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverMode {
    LevenbergMarquardt,
    GaussNewton,
}

/// Solver chatter level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Update,
    Quiet,
    Verbose,
}

/// Room clustering algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomClusterMode {
    Spectral,
    Modularity,
    None,
}

/// Main configuration structure.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Producing robot id; selects the solver vertex-key prefix.
    pub robot_id: u8,

    /// Whether optimization re-adds the places layer as temporary control
    /// points each run.
    pub add_places_to_deformation_graph: bool,

    /// Trigger a full optimization when factors arrived and at least one
    /// loop closure has ever been accepted.
    pub optimize_on_lc: bool,

    /// Allow the places reconciler to merge coincident nodes.
    pub enable_node_merging: bool,

    /// Run the cheap mesh refresh and update pipeline on cycles without a
    /// full optimization.
    pub call_update_periodically: bool,

    /// Position threshold for merging two places (meters).
    pub places_merge_pos_threshold_m: f64,

    /// Obstacle-distance tolerance for merging two places (meters).
    pub places_merge_distance_tolerance_m: f64,

    /// Backend loop period (milliseconds).
    pub loop_period_ms: u64,

    /// Render snapshot period (milliseconds).
    pub render_period_ms: u64,

    /// Interpolation points per vertex for mesh deformation.
    pub num_interp_points: usize,

    /// Interpolation horizon for mesh deformation (seconds).
    pub interp_horizon_s: f64,

    /// Enable room detection.
    pub enable_rooms: bool,

    /// Clustering threshold for the built-in distance room finder (meters).
    pub room_cluster_distance_m: f64,

    /// Display color for the building node (RGB).
    pub building_color: [u8; 3],

    /// Semantic label for the building node.
    pub building_semantic_label: u8,

    /// Write the per-cycle status CSV.
    pub log_output: bool,

    /// Directory for status output.
    pub log_path: String,

    /// Solver flavor, parsed leniently; see [`BackendConfig::solver_mode`].
    pub solver: String,

    /// Solver verbosity, parsed leniently.
    pub verbosity: String,

    /// Room clustering mode, parsed leniently.
    pub room_cluster_mode: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            robot_id: 0,
            add_places_to_deformation_graph: true,
            optimize_on_lc: true,
            enable_node_merging: true,
            call_update_periodically: true,
            places_merge_pos_threshold_m: 0.4,
            places_merge_distance_tolerance_m: 0.3,
            loop_period_ms: 500,
            render_period_ms: 200,
            num_interp_points: 4,
            interp_horizon_s: 10.0,
            enable_rooms: true,
            room_cluster_distance_m: 3.0,
            // purple
            building_color: [169, 8, 194],
            building_semantic_label: 22,
            log_output: false,
            log_path: "output/griha".to_string(),
            solver: "LM".to_string(),
            verbosity: "UPDATE".to_string(),
            room_cluster_mode: "MODULARITY".to_string(),
        }
    }
}

impl BackendConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: BackendConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Solver vertex-key prefix for this robot.
    pub fn vertex_prefix(&self) -> char {
        (b'a' + self.robot_id % 26) as char
    }

    /// Parse the solver mode, defaulting to Levenberg-Marquardt with a
    /// warning on unrecognized input.
    pub fn solver_mode(&self) -> SolverMode {
        match self.solver.to_uppercase().as_str() {
            "LM" => SolverMode::LevenbergMarquardt,
            "GN" => SolverMode::GaussNewton,
            other => {
                warn!("unrecognized solver option: {}. defaulting to LM", other);
                SolverMode::LevenbergMarquardt
            }
        }
    }

    /// Parse the verbosity, defaulting to Update with a warning.
    pub fn verbosity(&self) -> Verbosity {
        match self.verbosity.to_uppercase().as_str() {
            "UPDATE" => Verbosity::Update,
            "QUIET" => Verbosity::Quiet,
            "VERBOSE" => Verbosity::Verbose,
            other => {
                warn!(
                    "unrecognized verbosity option: {}. defaulting to UPDATE",
                    other
                );
                Verbosity::Update
            }
        }
    }

    /// Parse the room clustering mode, defaulting to None with a warning.
    pub fn room_cluster_mode(&self) -> RoomClusterMode {
        match self.room_cluster_mode.to_uppercase().as_str() {
            "SPECTRAL" => RoomClusterMode::Spectral,
            "MODULARITY" => RoomClusterMode::Modularity,
            "NONE" => RoomClusterMode::None,
            other => {
                warn!(
                    "unrecognized room clustering mode: {}. defaulting to NONE",
                    other
                );
                RoomClusterMode::None
            }
        }
    }
}
