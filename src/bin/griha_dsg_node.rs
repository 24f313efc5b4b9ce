//! Standalone backend node.
//!
//! Wires the shared graph copies, the update buffer and a solver together,
//! spawns the backend and render threads, and runs until SIGINT/SIGTERM.
//! Without a real deformation engine linked in, the record-only solver stands
//! in; producers would feed the update buffer from their own threads.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use parking_lot::Mutex;
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::info;

use griha_dsg::backend::{self, DistanceRoomFinder, UpdateBuffer};
use griha_dsg::solver::{DeformationSolver, RecordOnlySolver};
use griha_dsg::{BackendConfig, DsgBackend, Result, SharedDsg};

#[derive(Parser, Debug)]
#[command(name = "griha_dsg_node", about = "Incremental scene graph backend node")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the status log directory
    #[arg(long)]
    log_path: Option<String>,

    /// Enable the per-cycle status CSV
    #[arg(long)]
    log_output: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "griha_dsg=info".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => BackendConfig::load(path)?,
        None => BackendConfig::default(),
    };
    if let Some(log_path) = args.log_path {
        config.log_path = log_path;
    }
    if args.log_output {
        config.log_output = true;
    }

    let shared = Arc::new(SharedDsg::new());
    let private = Arc::new(SharedDsg::new());
    let buffer = Arc::new(UpdateBuffer::new());
    let solver: Arc<Mutex<Box<dyn DeformationSolver>>> =
        Arc::new(Mutex::new(Box::new(RecordOnlySolver::new())));

    let dsg_backend = DsgBackend::new(
        config.clone(),
        shared.clone(),
        private.clone(),
        buffer.clone(),
        solver,
    )?
    .with_room_finder(Box::new(DistanceRoomFinder::new(
        config.room_cluster_distance_m,
    )));

    let handles = backend::spawn(dsg_backend)?;
    info!("backend running, period {}ms", config.loop_period_ms);

    let term = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGINT, term.clone())?;
    signal_hook::flag::register(SIGTERM, term.clone())?;

    while !term.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(100));
    }

    info!("shutdown requested");
    shared.signal_shutdown();
    if let Some(dsg_backend) = handles.join() {
        if config.log_output {
            let directory = std::path::Path::new(&config.log_path);
            dsg_backend.save_trajectory(&directory.join("trajectory.csv"))?;
            dsg_backend.save_mesh(&directory.join("deformed_mesh.csv"))?;
            info!("saved trajectory and mesh to {:?}", directory);
        }
    }
    Ok(())
}
