//! Room and building maintenance.
//!
//! Room membership itself is assigned by an external clustering collaborator
//! behind [`RoomFinder`]; this module computes the active place set handed to
//! it, keeps retrying unlabeled places across cycles, and maintains the
//! single building node above the rooms layer.

use std::collections::HashSet;

use nalgebra::Vector3;
use tracing::debug;

use crate::graph::{DynamicSceneGraph, LayerId, NodeAttributes, NodeId};

/// Fixed identifier of the single building node.
pub const BUILDING_NODE: NodeId = NodeId::from_symbol(b'B', 0);

/// External room-clustering collaborator.
///
/// `find_rooms` assigns room membership by mutating the rooms layer (and the
/// parent edges of the given places) as a side effect.
pub trait RoomFinder: Send {
    fn find_rooms(&mut self, graph: &mut DynamicSceneGraph, active_places: &HashSet<NodeId>);
}

/// Trivial distance-threshold clusterer.
///
/// Greedily attaches each active place to the first room whose position is
/// within the threshold, creating a new room otherwise. Stands in for the
/// real clustering algorithm in the node binary and in tests.
pub struct DistanceRoomFinder {
    threshold_m: f64,
    next_room_index: u64,
}

impl DistanceRoomFinder {
    pub fn new(threshold_m: f64) -> Self {
        Self {
            threshold_m,
            next_room_index: 0,
        }
    }
}

impl RoomFinder for DistanceRoomFinder {
    fn find_rooms(&mut self, graph: &mut DynamicSceneGraph, active_places: &HashSet<NodeId>) {
        let mut places: Vec<NodeId> = active_places
            .iter()
            .copied()
            .filter(|&id| graph.layer(LayerId::Places).has_node(id))
            .collect();
        places.sort();

        for place in places {
            if graph.node(place).map(|n| n.has_parent()).unwrap_or(true) {
                continue;
            }
            let place_pos = graph
                .node(place)
                .expect("filtered above")
                .attributes
                .position;

            let room = graph
                .layer(LayerId::Rooms)
                .nodes()
                .find(|room| (room.attributes.position - place_pos).norm() <= self.threshold_m)
                .map(|room| room.id);

            let room = match room {
                Some(room) => room,
                None => {
                    let id = NodeId::from_symbol(b'R', self.next_room_index);
                    self.next_room_index += 1;
                    graph.emplace_node(LayerId::Rooms, id, NodeAttributes::at_position(place_pos));
                    id
                }
            };
            graph.insert_edge(room, place);
        }
    }
}

/// Compute the active place set for room detection: children of all current
/// rooms, places newly activated since the last front-end merge, and
/// previously unlabeled places still present in the places layer.
pub fn active_place_set(
    graph: &DynamicSceneGraph,
    latest_places: &HashSet<NodeId>,
    unlabeled_places: &HashSet<NodeId>,
) -> HashSet<NodeId> {
    let mut active: HashSet<NodeId> = latest_places.clone();

    for room in graph.layer(LayerId::Rooms).nodes() {
        active.extend(room.children().iter().copied());
    }

    let places = graph.layer(LayerId::Places);
    for &id in unlabeled_places {
        if places.has_node(id) {
            active.insert(id);
        }
    }

    active
}

/// Persist the subset of active places that still have no parent room.
/// Unlabeled places are retried next cycle, never dropped.
pub fn store_unlabeled_places(
    graph: &DynamicSceneGraph,
    active_places: &HashSet<NodeId>,
) -> HashSet<NodeId> {
    let places = graph.layer(LayerId::Places);
    active_places
        .iter()
        .copied()
        .filter(|&id| {
            places
                .node(id)
                .map(|node| !node.has_parent())
                .unwrap_or(false)
        })
        .collect()
}

/// Maintain the single building node above the rooms layer.
///
/// No rooms: delete the building if present. Otherwise place (or move) the
/// building at the centroid of all room positions and re-link every room as
/// its child; re-insertion is idempotent.
pub fn update_building_node(graph: &mut DynamicSceneGraph, color: [u8; 3], semantic_label: u8) {
    if graph.layer(LayerId::Rooms).is_empty() {
        if graph.has_node(BUILDING_NODE) {
            debug!("rooms layer empty, removing building node");
            graph.remove_node(BUILDING_NODE);
        }
        return;
    }

    let rooms = graph.layer(LayerId::Rooms);
    let mut centroid = Vector3::zeros();
    for node in rooms.nodes() {
        centroid += node.attributes.position;
    }
    centroid /= rooms.num_nodes() as f64;

    if !graph.has_node(BUILDING_NODE) {
        let mut attrs = NodeAttributes::at_position(centroid);
        attrs.color = color;
        attrs.semantic_label = semantic_label;
        attrs.name = format!("{}", BUILDING_NODE);
        graph.emplace_node(LayerId::Buildings, BUILDING_NODE, attrs);
    } else if let Some(node) = graph.node_mut(BUILDING_NODE) {
        node.attributes.position = centroid;
    }

    let room_ids: Vec<NodeId> = graph.layer(LayerId::Rooms).node_ids().collect();
    for room in room_ids {
        graph.insert_edge(BUILDING_NODE, room);
    }
}
