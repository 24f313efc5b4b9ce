//! The incremental scene graph backend.
//!
//! [`DsgBackend`] owns the private graph copy and runs the periodic cycle:
//! drain pending factor updates into the solver, fold queued loop closures in,
//! merge front-end graph changes, then either run a full optimization or a
//! cheap refresh, and finally maintain the rooms and building layers.

mod rooms;
mod spanning_tree;
mod status;
mod update_buffer;
mod updates;

pub use rooms::{
    active_place_set, store_unlabeled_places, update_building_node, DistanceRoomFinder, RoomFinder,
    BUILDING_NODE,
};
pub use spanning_tree::{minimum_spanning_edges, SpanningEdge, SpanningTreeInfo};
pub use status::{BackendStatus, CycleTiming, StatusLog};
pub use update_buffer::{DrainedUpdates, UpdateBuffer};
pub use updates::{build_update_functions, AgentValues, LayerUpdateFn, PlaceValues};

use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::BackendConfig;
use crate::core::types::{Pose3, RawMesh};
use crate::error::Result;
use crate::graph::{DynamicSceneGraph, LayerId, NodeId, SceneGraphLayer};
use crate::messages::{EdgeKind, LoopClosureCandidate};
use crate::shared::SharedDsg;
use crate::solver::DeformationSolver;

/// The backend processing loop.
///
/// One instance owns the private graph copy for the process lifetime. All
/// solver access goes through the solver's own mutex; the private graph lock
/// is only held for merge and value-push sections, never across an
/// optimization.
pub struct DsgBackend {
    config: BackendConfig,
    shared: Arc<SharedDsg>,
    private: Arc<SharedDsg>,
    buffer: Arc<UpdateBuffer>,
    solver: Arc<Mutex<Box<dyn DeformationSolver>>>,
    room_finder: Option<Box<dyn RoomFinder>>,
    update_funcs: Vec<LayerUpdateFn>,

    /// Backend-side snapshot of the places layer, maintained incrementally
    /// from front-end merges. Control points for each optimization come from
    /// here so the solver never waits on the private graph lock.
    places_snapshot: SceneGraphLayer,

    /// Places handed to room detection last cycle that ended up without a
    /// parent room. Retried every cycle until labeled or deleted.
    unlabeled_places: HashSet<NodeId>,

    /// Places newly activated since the last shared-to-private merge.
    latest_places: HashSet<NodeId>,

    /// Trajectory variables in ingest order: solver key, timestamp, and the
    /// initial estimate. Saving resolves each key through the solver first.
    trajectory: Vec<(u64, u64, Pose3)>,
    latest_mesh: Option<RawMesh>,
    have_new_mesh: bool,

    /// Loop closures accepted over the process lifetime. Monotone; counts
    /// every drained candidate, resolvable or not.
    num_loop_closures: usize,
    have_loopclosures: bool,

    status: BackendStatus,
    status_log: Option<StatusLog>,
    loop_closure_log: Option<File>,
    vertex_prefix: char,
}

impl DsgBackend {
    pub fn new(
        config: BackendConfig,
        shared: Arc<SharedDsg>,
        private: Arc<SharedDsg>,
        buffer: Arc<UpdateBuffer>,
        solver: Arc<Mutex<Box<dyn DeformationSolver>>>,
    ) -> Result<Self> {
        let (status_log, loop_closure_log) = if config.log_output {
            let directory = Path::new(&config.log_path);
            let status_log = StatusLog::create(directory)?;
            let mut lc_log = File::create(directory.join("loop_closures.csv"))?;
            writeln!(lc_log, "from_node,to_node,from_external")?;
            (Some(status_log), Some(lc_log))
        } else {
            (None, None)
        };

        let update_funcs = build_update_functions(
            config.places_merge_pos_threshold_m,
            config.places_merge_distance_tolerance_m,
        );
        let vertex_prefix = config.vertex_prefix();

        Ok(Self {
            config,
            shared,
            private,
            buffer,
            solver,
            room_finder: None,
            update_funcs,
            places_snapshot: SceneGraphLayer::new(LayerId::Places),
            unlabeled_places: HashSet::new(),
            latest_places: HashSet::new(),
            trajectory: Vec::new(),
            latest_mesh: None,
            have_new_mesh: false,
            num_loop_closures: 0,
            have_loopclosures: false,
            status: BackendStatus::default(),
            status_log,
            loop_closure_log,
            vertex_prefix,
        })
    }

    /// Install a room-clustering collaborator.
    pub fn with_room_finder(mut self, finder: Box<dyn RoomFinder>) -> Self {
        self.room_finder = Some(finder);
        self
    }

    /// Total loop closures accepted so far.
    pub fn num_loop_closures(&self) -> usize {
        self.num_loop_closures
    }

    /// Counters from the most recent cycle.
    pub fn status(&self) -> &BackendStatus {
        &self.status
    }

    /// Run one backend cycle.
    pub fn spin_once(&mut self) -> Result<()> {
        let cycle_start = Instant::now();
        self.status.reset();

        let drained = self.buffer.drain();
        let have_graph_updates = !drained.is_empty();

        self.process_factor_updates(&drained)?;
        self.add_queued_loop_closures()?;
        self.fill_status_totals();
        self.update_private_dsg();

        let mut timing = CycleTiming::default();
        if have_graph_updates && self.config.optimize_on_lc && self.have_loopclosures {
            timing.optimize = Some(self.optimize());
            timing.mesh_update = self.update_dsg_mesh(true);
            self.call_update_functions();
        } else if self.config.call_update_periodically {
            timing.mesh_update = self.update_dsg_mesh(false);
            self.call_update_functions();
        }
        self.private.mark_updated();

        self.update_rooms_nodes();
        self.update_building();

        timing.spin = cycle_start.elapsed();
        if have_graph_updates {
            if let Some(log) = &self.status_log {
                log.append(&self.status, &timing)?;
            }
        }
        Ok(())
    }

    /// Push drained factor-graph updates into the solver.
    ///
    /// Loop-closure edges arriving inline with the pose graph are recorded in
    /// the loop-closure log but do not count as accepted closures; only
    /// queue drainage does.
    fn process_factor_updates(&mut self, drained: &DrainedUpdates) -> Result<()> {
        let mut solver = self.solver.lock();

        if let Some(msg) = &drained.mesh_graph {
            for node in &msg.nodes {
                solver.add_node(node.key, node.pose);
            }
            for edge in &msg.edges {
                solver.add_between_factor(edge.key_from, edge.key_to, edge.relative_pose);
            }
            self.status.new_graph_factors = msg.edges.len();
            self.status.new_factors += msg.edges.len();
        }

        if let Some(msg) = &drained.pose_graph {
            for node in &msg.nodes {
                solver.add_node(node.key, node.pose);
                self.trajectory.push((node.key, node.timestamp_us, node.pose));
            }
            for edge in &msg.edges {
                if !solver.has_key(edge.key_from) || !solver.has_key(edge.key_to) {
                    warn!(
                        "skipping factor with unknown key: {} -> {}",
                        edge.key_from, edge.key_to
                    );
                    continue;
                }
                solver.add_between_factor(edge.key_from, edge.key_to, edge.relative_pose);
                self.status.new_factors += 1;
                if edge.kind == EdgeKind::LoopClosure {
                    info!(
                        "loop closure factor: {} -> {}",
                        edge.key_from, edge.key_to
                    );
                    if let Some(log) = &mut self.loop_closure_log {
                        writeln!(log, "{},{},false", edge.key_from, edge.key_to)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Drain the queued loop-closure candidates into the solver.
    ///
    /// Every drained candidate counts toward the lifetime total; candidates
    /// whose agent nodes cannot be resolved to solver keys are counted but
    /// contribute no factor.
    fn add_queued_loop_closures(&mut self) -> Result<()> {
        let drained = self.shared.drain_loop_closures();
        if drained.is_empty() {
            return Ok(());
        }

        self.num_loop_closures += drained.len();
        self.status.new_loop_closures = drained.len();
        self.have_loopclosures = true;
        warn!("detected {} new loop closures", drained.len());

        let resolved: Vec<Option<(u64, u64)>> = {
            let graph = self.shared.graph.lock();
            drained
                .iter()
                .map(|candidate| resolve_candidate_keys(&graph, candidate))
                .collect()
        };

        let mut solver = self.solver.lock();
        for (candidate, keys) in drained.iter().zip(resolved) {
            if let Some(log) = &mut self.loop_closure_log {
                writeln!(
                    log,
                    "{},{},{}",
                    candidate.from_node.0, candidate.to_node.0, candidate.from_external
                )?;
            }
            match keys {
                Some((key_from, key_to))
                    if solver.has_key(key_from) && solver.has_key(key_to) =>
                {
                    solver.add_between_factor(key_to, key_from, candidate.to_t_from);
                    self.status.new_factors += 1;
                }
                _ => {
                    warn!(
                        "cannot resolve loop closure {} -> {} to solver keys",
                        candidate.from_node, candidate.to_node
                    );
                }
            }
        }
        Ok(())
    }

    fn fill_status_totals(&mut self) {
        let solver = self.solver.lock();
        self.status.total_factors = solver.num_factors();
        self.status.total_values = solver.num_values();
        self.status.total_loop_closures = self.num_loop_closures;
        self.status.trajectory_len = self.trajectory.len();
    }

    /// Merge front-end graph changes into the private copy.
    ///
    /// Holds both graph locks for the duration of the merge; this is the only
    /// joint critical section in the system, kept short by the merge being
    /// add-only.
    fn update_private_dsg(&mut self) -> bool {
        if !self.shared.take_updated() {
            return false;
        }
        let shared_graph = self.shared.graph.lock();
        let mut private_graph = self.private.graph.lock();

        private_graph.merge_graph(&shared_graph);

        let incoming = std::mem::take(&mut *self.shared.latest_places.lock());
        self.latest_places = incoming;

        let shared_places = shared_graph.layer(LayerId::Places);
        self.places_snapshot.merge_layer(shared_places);
        self.places_snapshot.prune_missing(shared_places);

        debug!(
            "merged front-end graph: {} nodes, {} snapshot places",
            private_graph.num_nodes(),
            self.places_snapshot.num_nodes()
        );
        true
    }

    /// Run a full optimization under the solver lock.
    fn optimize(&mut self) -> Duration {
        let start = Instant::now();
        let mut solver = self.solver.lock();
        solver.clear_temporary_structures();
        if self.config.add_places_to_deformation_graph {
            add_places_to_deformation_graph(&self.places_snapshot, &mut **solver, self.vertex_prefix);
        }
        solver.optimize();
        start.elapsed()
    }

    /// Deform the latest raw mesh and attach the result to the private graph.
    ///
    /// Without `force`, runs only when a new mesh arrived since the last
    /// deformation. After an optimization the latest mesh is re-deformed even
    /// if unchanged, since the trajectory under it moved.
    fn update_dsg_mesh(&mut self, force: bool) -> Option<Duration> {
        if let Some(mesh) = self.buffer.take_new_mesh() {
            self.latest_mesh = Some(mesh);
            self.have_new_mesh = true;
        }
        if !force && !self.have_new_mesh {
            return None;
        }
        let mesh = self.latest_mesh.as_ref()?;

        let start = Instant::now();
        let deformed = {
            let solver = self.solver.lock();
            solver.deform_mesh(
                mesh,
                self.vertex_prefix,
                self.config.num_interp_points,
                self.config.interp_horizon_s,
            )
        };
        self.private.graph.lock().set_mesh(deformed);
        self.have_new_mesh = false;
        Some(start.elapsed())
    }

    /// Push current solver estimates through the layer update pipeline.
    fn call_update_functions(&mut self) {
        let (place_values, agent_values) = {
            let solver = self.solver.lock();
            (solver.temporary_values(), solver.values())
        };
        let mut graph = self.private.graph.lock();
        for func in &self.update_funcs {
            func(
                &mut graph,
                &place_values,
                &agent_values,
                self.config.enable_node_merging,
            );
        }
    }

    fn update_rooms_nodes(&mut self) {
        if !self.config.enable_rooms {
            return;
        }
        let Some(finder) = self.room_finder.as_mut() else {
            return;
        };
        let mut graph = self.private.graph.lock();
        let active = active_place_set(&graph, &self.latest_places, &self.unlabeled_places);
        finder.find_rooms(&mut graph, &active);
        self.unlabeled_places = store_unlabeled_places(&graph, &active);
    }

    fn update_building(&mut self) {
        let mut graph = self.private.graph.lock();
        update_building_node(
            &mut graph,
            self.config.building_color,
            self.config.building_semantic_label,
        );
    }

    /// Write the optimized trajectory as CSV.
    ///
    /// Each key is resolved through the solver's current estimates; keys the
    /// solver has no value for fall back to their initial estimate.
    pub fn save_trajectory(&self, path: &Path) -> Result<()> {
        let values = self.solver.lock().values();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = File::create(path)?;
        writeln!(file, "key,timestamp_us,x,y,z,qw,qx,qy,qz")?;
        for (key, timestamp_us, initial) in &self.trajectory {
            let pose = values.get(key).copied().unwrap_or(*initial);
            writeln!(
                file,
                "{},{},{},{},{},{},{},{},{}",
                key,
                timestamp_us,
                pose.translation.x,
                pose.translation.y,
                pose.translation.z,
                pose.rotation.w,
                pose.rotation.i,
                pose.rotation.j,
                pose.rotation.k,
            )?;
        }
        Ok(())
    }

    /// Write the deformed mesh attached to the private graph as CSV.
    pub fn save_mesh(&self, path: &Path) -> Result<()> {
        let mesh = self.private.graph.lock().mesh().cloned();
        let Some(mesh) = mesh else {
            warn!("no deformed mesh to save");
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = File::create(path)?;
        writeln!(file, "x,y,z,timestamp_us")?;
        for (vertex, timestamp_us) in mesh.vertices.iter().zip(&mesh.vertex_timestamps_us) {
            writeln!(file, "{},{},{},{}", vertex.x, vertex.y, vertex.z, timestamp_us)?;
        }
        Ok(())
    }
}

fn resolve_candidate_keys(
    graph: &DynamicSceneGraph,
    candidate: &LoopClosureCandidate,
) -> Option<(u64, u64)> {
    let key_from = graph.node(candidate.from_node)?.attributes.external_key?;
    let key_to = graph.node(candidate.to_node)?.attributes.external_key?;
    Some((key_from, key_to))
}

/// Reduce a places snapshot to deformation control points.
///
/// Every place becomes a temporary variable; spanning edges become temporary
/// between factors; only spanning-tree leaves with mesh connections anchor
/// valences, which keeps solver size near-linear in the number of places.
pub fn add_places_to_deformation_graph(
    places: &SceneGraphLayer,
    solver: &mut dyn DeformationSolver,
    vertex_prefix: char,
) {
    if places.is_empty() {
        warn!("no places to add to deformation graph");
        return;
    }
    let info = minimum_spanning_edges(places);

    for node in places.nodes() {
        let pose = Pose3::new(node.attributes.position, node.attributes.rotation);
        solver.add_temporary_node(node.id, pose, false);

        if info.leaves.contains(&node.id) && !node.attributes.mesh_connections.is_empty() {
            solver.add_temporary_valence(node.id, &node.attributes.mesh_connections, vertex_prefix);
        }
    }

    for edge in &info.edges {
        let (Some(source), Some(target)) =
            (places.position(edge.source), places.position(edge.target))
        else {
            continue;
        };
        let delta = target - source;
        solver.add_temporary_between(
            edge.source,
            edge.target,
            Pose3::from_translation(delta.x, delta.y, delta.z),
        );
    }
}

/// Join handles and output of the spawned backend threads.
pub struct BackendHandles {
    /// The backend cycle thread. Yields the backend on exit so the caller
    /// can save outputs.
    pub backend: JoinHandle<DsgBackend>,

    /// The render snapshot thread.
    pub render: JoinHandle<()>,

    /// Most recent private-graph snapshot taken by the render thread.
    pub snapshot: Arc<Mutex<Option<DynamicSceneGraph>>>,
}

impl BackendHandles {
    /// Join both threads, returning the backend for final saves.
    pub fn join(self) -> Option<DsgBackend> {
        let backend = match self.backend.join() {
            Ok(backend) => Some(backend),
            Err(_) => {
                error!("backend thread panicked");
                None
            }
        };
        if self.render.join().is_err() {
            error!("render thread panicked");
        }
        backend
    }
}

/// Spawn the backend cycle thread and the render snapshot thread.
///
/// Both poll the shared shutdown flag between iterations and exit once it is
/// set.
pub fn spawn(mut backend: DsgBackend) -> Result<BackendHandles> {
    let shared = backend.shared.clone();
    let private = backend.private.clone();
    let loop_period = Duration::from_millis(backend.config.loop_period_ms);
    let render_period = Duration::from_millis(backend.config.render_period_ms);

    let snapshot = Arc::new(Mutex::new(None));

    let backend_shared = shared.clone();
    let backend_handle = thread::Builder::new()
        .name("dsg-backend".to_string())
        .spawn(move || {
            info!("backend thread started");
            while !backend_shared.should_shutdown() {
                if let Err(err) = backend.spin_once() {
                    error!("backend cycle failed: {}", err);
                }
                thread::sleep(loop_period);
            }
            info!("backend thread exiting");
            backend
        })?;

    let render_snapshot = snapshot.clone();
    let render_handle = thread::Builder::new()
        .name("dsg-render".to_string())
        .spawn(move || {
            while !shared.should_shutdown() {
                if private.take_updated() {
                    let copy = private.graph.lock().clone();
                    *render_snapshot.lock() = Some(copy);
                }
                thread::sleep(render_period);
            }
            info!("render thread exiting");
        })?;

    Ok(BackendHandles {
        backend: backend_handle,
        render: render_handle,
        snapshot,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeAttributes;
    use crate::solver::RecordOnlySolver;
    use nalgebra::Vector3;

    #[test]
    fn test_places_to_deformation_graph_uses_leaves() {
        let mut places = SceneGraphLayer::new(LayerId::Places);
        let mut attrs = NodeAttributes::at_position(Vector3::new(0.0, 0.0, 0.0));
        attrs.mesh_connections = vec![0, 1];
        places.emplace(NodeId(1), attrs);

        let mut attrs = NodeAttributes::at_position(Vector3::new(1.0, 0.0, 0.0));
        attrs.mesh_connections = vec![2];
        places.emplace(NodeId(2), attrs);

        let mut attrs = NodeAttributes::at_position(Vector3::new(2.0, 0.0, 0.0));
        attrs.mesh_connections = vec![3];
        places.emplace(NodeId(3), attrs);

        places.insert_sibling_edge(NodeId(1), NodeId(2));
        places.insert_sibling_edge(NodeId(2), NodeId(3));

        let mut solver = RecordOnlySolver::new();
        add_places_to_deformation_graph(&places, &mut solver, 'a');

        // all three become control points
        assert_eq!(solver.temporary_values().len(), 3);
        // valences only from chain endpoints
        assert!(solver.valence(NodeId(1)).is_some());
        assert!(solver.valence(NodeId(2)).is_none());
        assert!(solver.valence(NodeId(3)).is_some());
        assert_eq!(solver.num_temporary_betweens(), 2);
        // control points are never marked as the initial node
        assert_eq!(solver.temporary_initial_flags(), &[false, false, false]);
    }

    #[test]
    fn test_places_to_deformation_graph_empty_layer() {
        let places = SceneGraphLayer::new(LayerId::Places);
        let mut solver = RecordOnlySolver::new();

        add_places_to_deformation_graph(&places, &mut solver, 'a');

        assert_eq!(solver.num_values(), 0);
        assert_eq!(solver.num_factors(), 0);
    }
}
