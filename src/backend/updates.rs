//! Layer reconciliation pipeline.
//!
//! After each solve (or periodic refresh) the backend pushes optimized values
//! into every semantic layer through a fixed, ordered list of reconciliation
//! functions. Every reconciler is idempotent: applying it twice with the same
//! values changes nothing further.

use std::collections::HashMap;

use nalgebra::Vector3;
use tracing::debug;

use crate::core::types::Pose3;
use crate::graph::{DynamicSceneGraph, LayerId, NodeId};

/// Optimized control-point estimates, keyed by place node id.
pub type PlaceValues = HashMap<NodeId, Pose3>;

/// Optimized permanent-variable estimates, keyed by solver key.
pub type AgentValues = HashMap<u64, Pose3>;

/// One reconciliation function over the common signature.
pub type LayerUpdateFn =
    Box<dyn Fn(&mut DynamicSceneGraph, &PlaceValues, &AgentValues, bool) + Send>;

/// Build the pipeline in its fixed order: agents, objects, places, rooms,
/// buildings. Constructed once at startup.
pub fn build_update_functions(
    places_merge_pos_threshold_m: f64,
    places_merge_distance_tolerance_m: f64,
) -> Vec<LayerUpdateFn> {
    vec![
        Box::new(update_agents),
        Box::new(update_objects),
        Box::new(move |graph, place_values, agent_values, allow_merging| {
            update_places(
                graph,
                place_values,
                agent_values,
                allow_merging,
                places_merge_pos_threshold_m,
                places_merge_distance_tolerance_m,
            )
        }),
        Box::new(update_rooms),
        Box::new(update_buildings),
    ]
}

/// Push optimized trajectory values into agent nodes via their external-key
/// back-references. Nodes without a solver value are skipped.
pub fn update_agents(
    graph: &mut DynamicSceneGraph,
    _place_values: &PlaceValues,
    agent_values: &AgentValues,
    _allow_merging: bool,
) {
    for node in graph.layer_mut(LayerId::Agents).nodes_mut() {
        let Some(key) = node.attributes.external_key else {
            continue;
        };
        let Some(pose) = agent_values.get(&key) else {
            debug!("no optimized value for agent key {}", key);
            continue;
        };
        node.attributes.position = pose.translation;
        node.attributes.rotation = pose.rotation;
    }
}

/// Recompute object positions as the centroid of their mesh-vertex
/// connections against the current deformed mesh. Objects with no valid
/// vertices keep their previous position.
pub fn update_objects(
    graph: &mut DynamicSceneGraph,
    _place_values: &PlaceValues,
    _agent_values: &AgentValues,
    _allow_merging: bool,
) {
    let Some(mesh) = graph.mesh().cloned() else {
        return;
    };
    for node in graph.layer_mut(LayerId::Objects).nodes_mut() {
        let mut sum = Vector3::zeros();
        let mut count = 0usize;
        for &vertex in &node.attributes.mesh_connections {
            let Some(position) = mesh.vertices.get(vertex) else {
                continue;
            };
            if position.iter().any(|c| c.is_nan()) {
                continue;
            }
            sum += position;
            count += 1;
        }
        if count == 0 {
            continue;
        }
        node.attributes.position = sum / count as f64;
    }
}

/// Push optimized control-point values into place nodes, then (when allowed)
/// merge place pairs that now represent the same physical location.
pub fn update_places(
    graph: &mut DynamicSceneGraph,
    place_values: &PlaceValues,
    _agent_values: &AgentValues,
    allow_merging: bool,
    pos_threshold_m: f64,
    distance_tolerance_m: f64,
) {
    for node in graph.layer_mut(LayerId::Places).nodes_mut() {
        if let Some(pose) = place_values.get(&node.id) {
            node.attributes.position = pose.translation;
        }
    }

    if !allow_merging {
        return;
    }

    // pairwise scan in id order; the lower id always survives a merge
    let ids: Vec<NodeId> = graph.layer(LayerId::Places).node_ids().collect();
    for (i, &a) in ids.iter().enumerate() {
        if !graph.has_node(a) {
            continue;
        }
        for &b in &ids[i + 1..] {
            if !graph.has_node(a) || !graph.has_node(b) {
                continue;
            }
            let (pos_a, dist_a, pos_b, dist_b) = {
                let places = graph.layer(LayerId::Places);
                let node_a = places.node(a).expect("checked above");
                let node_b = places.node(b).expect("checked above");
                (
                    node_a.attributes.position,
                    node_a.attributes.distance,
                    node_b.attributes.position,
                    node_b.attributes.distance,
                )
            };
            if (pos_a - pos_b).norm() > pos_threshold_m {
                continue;
            }
            if (dist_a - dist_b).abs() > distance_tolerance_m {
                continue;
            }
            debug!("merging place {} into {}", b, a);
            graph.merge_nodes(b, a);
        }
    }
}

/// Recompute each room's position as the centroid of its place children.
pub fn update_rooms(
    graph: &mut DynamicSceneGraph,
    _place_values: &PlaceValues,
    _agent_values: &AgentValues,
    _allow_merging: bool,
) {
    let room_ids: Vec<NodeId> = graph.layer(LayerId::Rooms).node_ids().collect();
    for room in room_ids {
        let centroid = {
            let Some(node) = graph.node(room) else {
                continue;
            };
            let children = node.children();
            if children.is_empty() {
                continue;
            }
            let mut sum = Vector3::zeros();
            let mut count = 0usize;
            for &child in children {
                if let Some(pos) = graph.layer(LayerId::Places).position(child) {
                    sum += pos;
                    count += 1;
                }
            }
            if count == 0 {
                continue;
            }
            sum / count as f64
        };
        if let Some(node) = graph.node_mut(room) {
            node.attributes.position = centroid;
        }
    }
}

/// Recompute the building's position as the centroid of all rooms.
pub fn update_buildings(
    graph: &mut DynamicSceneGraph,
    _place_values: &PlaceValues,
    _agent_values: &AgentValues,
    _allow_merging: bool,
) {
    let rooms = graph.layer(LayerId::Rooms);
    if rooms.is_empty() {
        return;
    }
    let mut sum = Vector3::zeros();
    for node in rooms.nodes() {
        sum += node.attributes.position;
    }
    let centroid = sum / rooms.num_nodes() as f64;

    for node in graph.layer_mut(LayerId::Buildings).nodes_mut() {
        node.attributes.position = centroid;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeAttributes;
    use approx::assert_relative_eq;

    fn place(graph: &mut DynamicSceneGraph, id: u64, x: f64, distance: f64) {
        let mut attrs = NodeAttributes::at_position(Vector3::new(x, 0.0, 0.0));
        attrs.distance = distance;
        graph.emplace_node(LayerId::Places, NodeId(id), attrs);
    }

    #[test]
    fn test_update_agents_uses_external_key() {
        let mut graph = DynamicSceneGraph::new();
        let mut attrs = NodeAttributes::default();
        attrs.external_key = Some(42);
        graph.emplace_node(LayerId::Agents, NodeId(1), attrs);
        graph.emplace_node(LayerId::Agents, NodeId(2), NodeAttributes::default());

        let mut agent_values = AgentValues::new();
        agent_values.insert(42, Pose3::from_translation(1.0, 2.0, 3.0));

        update_agents(&mut graph, &PlaceValues::new(), &agent_values, true);

        let pos = graph.node(NodeId(1)).unwrap().attributes.position;
        assert_relative_eq!(pos.x, 1.0);
        assert_relative_eq!(pos.z, 3.0);
        // node without a key untouched
        assert_relative_eq!(graph.node(NodeId(2)).unwrap().attributes.position.x, 0.0);
    }

    #[test]
    fn test_update_places_merges_close_pair() {
        let mut graph = DynamicSceneGraph::new();
        place(&mut graph, 1, 0.0, 1.0);
        place(&mut graph, 2, 0.1, 1.1);
        place(&mut graph, 3, 5.0, 1.0);

        update_places(
            &mut graph,
            &PlaceValues::new(),
            &AgentValues::new(),
            true,
            0.4,
            0.3,
        );

        assert_eq!(graph.layer(LayerId::Places).num_nodes(), 2);
        assert!(graph.has_node(NodeId(1)));
        assert!(!graph.has_node(NodeId(2)));
        assert!(graph.has_node(NodeId(3)));
    }

    #[test]
    fn test_update_places_respects_distance_tolerance() {
        let mut graph = DynamicSceneGraph::new();
        place(&mut graph, 1, 0.0, 0.2);
        place(&mut graph, 2, 0.1, 2.0);

        update_places(
            &mut graph,
            &PlaceValues::new(),
            &AgentValues::new(),
            true,
            0.4,
            0.3,
        );

        assert_eq!(graph.layer(LayerId::Places).num_nodes(), 2);
    }

    #[test]
    fn test_update_places_merge_disabled() {
        let mut graph = DynamicSceneGraph::new();
        place(&mut graph, 1, 0.0, 1.0);
        place(&mut graph, 2, 0.1, 1.0);

        update_places(
            &mut graph,
            &PlaceValues::new(),
            &AgentValues::new(),
            false,
            0.4,
            0.3,
        );

        assert_eq!(graph.layer(LayerId::Places).num_nodes(), 2);
    }

    #[test]
    fn test_reconcilers_idempotent() {
        let mut graph = DynamicSceneGraph::new();
        place(&mut graph, 1, 0.0, 1.0);
        place(&mut graph, 2, 0.05, 1.0);
        place(&mut graph, 3, 3.0, 1.0);
        let room = NodeId::from_symbol(b'R', 0);
        graph.emplace_node(LayerId::Rooms, room, NodeAttributes::default());
        graph.insert_edge(room, NodeId(3));

        let mut place_values = PlaceValues::new();
        place_values.insert(NodeId(3), Pose3::from_translation(3.5, 0.0, 0.0));

        let funcs = build_update_functions(0.4, 0.3);
        let run = |graph: &mut DynamicSceneGraph| {
            for func in &funcs {
                func(graph, &place_values, &AgentValues::new(), true);
            }
        };

        run(&mut graph);
        let after_once = format!("{:?}", graph);
        run(&mut graph);
        let after_twice = format!("{:?}", graph);

        assert_eq!(after_once, after_twice);
    }

    #[test]
    fn test_update_objects_centroid_from_mesh() {
        use crate::core::types::RawMesh;

        let mut graph = DynamicSceneGraph::new();
        let mut mesh = RawMesh::new();
        mesh.push(Vector3::new(0.0, 0.0, 0.0), 0);
        mesh.push(Vector3::new(2.0, 0.0, 0.0), 0);
        mesh.push(Vector3::new(f64::NAN, 0.0, 0.0), 0);
        graph.set_mesh(mesh);

        let mut attrs = NodeAttributes::default();
        attrs.mesh_connections = vec![0, 1, 2, 99];
        graph.emplace_node(LayerId::Objects, NodeId(1), attrs);

        update_objects(&mut graph, &PlaceValues::new(), &AgentValues::new(), true);

        // NaN and out-of-bounds vertices skipped
        let pos = graph.node(NodeId(1)).unwrap().attributes.position;
        assert_relative_eq!(pos.x, 1.0);
    }

    #[test]
    fn test_update_rooms_recomputes_centroid() {
        let mut graph = DynamicSceneGraph::new();
        place(&mut graph, 1, 0.0, 0.0);
        place(&mut graph, 2, 4.0, 0.0);
        let room = NodeId::from_symbol(b'R', 0);
        graph.emplace_node(LayerId::Rooms, room, NodeAttributes::default());
        graph.insert_edge(room, NodeId(1));
        graph.insert_edge(room, NodeId(2));

        update_rooms(&mut graph, &PlaceValues::new(), &AgentValues::new(), true);

        assert_relative_eq!(graph.node(room).unwrap().attributes.position.x, 2.0);
    }
}
