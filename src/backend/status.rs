//! Per-cycle status counters and the CSV status log.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::info;

use crate::error::Result;

/// Counters accumulated over one backend cycle.
#[derive(Debug, Clone, Default)]
pub struct BackendStatus {
    /// Loop closures accepted over the process lifetime. Monotone.
    pub total_loop_closures: usize,

    /// Loop closures accepted this cycle.
    pub new_loop_closures: usize,

    /// Factors currently registered with the solver.
    pub total_factors: usize,

    /// Variables currently registered with the solver.
    pub total_values: usize,

    /// Factors added this cycle (pose-graph plus mesh-graph).
    pub new_factors: usize,

    /// Mesh-graph factors added this cycle.
    pub new_graph_factors: usize,

    /// Trajectory length in nodes.
    pub trajectory_len: usize,
}

impl BackendStatus {
    /// Reset the per-cycle counters. Lifetime totals are refilled each cycle.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Wall-clock breakdown of one cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleTiming {
    /// Full cycle duration.
    pub spin: Duration,

    /// Optimization step, when one ran.
    pub optimize: Option<Duration>,

    /// Mesh deformation step, when one ran.
    pub mesh_update: Option<Duration>,
}

/// Append-only CSV log of per-cycle status records.
///
/// The header row is written once at initialization; every optimization cycle
/// appends one row. Timings for phases that did not run are logged as NaN.
pub struct StatusLog {
    path: PathBuf,
}

impl StatusLog {
    const HEADER: &'static str = "total_lc,new_lc,total_factors,total_values,new_factors,\
                                  new_graph_factors,trajectory_len,run_time,optimize_time,\
                                  mesh_update_time";

    /// Create the log file and write the header row.
    pub fn create(directory: &Path) -> Result<Self> {
        std::fs::create_dir_all(directory)?;
        let path = directory.join("dsg_backend_status.csv");
        let mut file = File::create(&path)?;
        writeln!(file, "{}", Self::HEADER)?;
        info!("logging backend status to {:?}", path);
        Ok(Self { path })
    }

    /// Append one row for a finished cycle.
    pub fn append(&self, status: &BackendStatus, timing: &CycleTiming) -> Result<()> {
        let seconds = |d: Option<Duration>| d.map(|d| d.as_secs_f64()).unwrap_or(f64::NAN);
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        writeln!(
            file,
            "{},{},{},{},{},{},{},{},{},{}",
            status.total_loop_closures,
            status.new_loop_closures,
            status.total_factors,
            status.total_values,
            status.new_factors,
            status.new_graph_factors,
            status.trajectory_len,
            timing.spin.as_secs_f64(),
            seconds(timing.optimize),
            seconds(timing.mesh_update),
        )?;
        Ok(())
    }
}
