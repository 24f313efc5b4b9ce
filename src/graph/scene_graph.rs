//! The full multi-layer scene graph.

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use crate::core::types::RawMesh;

use super::{LayerId, NodeAttributes, NodeId, SceneGraphLayer, SceneNode};

/// Layered scene graph with cross-layer parent/child edges and an attached
/// deformed mesh.
///
/// Node ids are unique across all layers and are never reused: removed ids
/// are tombstoned and re-insertion is rejected.
#[derive(Debug, Clone)]
pub struct DynamicSceneGraph {
    layers: BTreeMap<LayerId, SceneGraphLayer>,
    node_layers: BTreeMap<NodeId, LayerId>,
    removed: HashSet<NodeId>,
    mesh: Option<RawMesh>,
}

impl DynamicSceneGraph {
    /// Create a graph with all layers present and empty.
    pub fn new() -> Self {
        let mut layers = BTreeMap::new();
        for id in LayerId::ALL {
            layers.insert(id, SceneGraphLayer::new(id));
        }
        Self {
            layers,
            node_layers: BTreeMap::new(),
            removed: HashSet::new(),
            mesh: None,
        }
    }

    /// Get a layer.
    pub fn layer(&self, id: LayerId) -> &SceneGraphLayer {
        &self.layers[&id]
    }

    /// Get a mutable layer. Structural edits should go through the graph
    /// methods so the id index stays consistent.
    pub fn layer_mut(&mut self, id: LayerId) -> &mut SceneGraphLayer {
        self.layers.get_mut(&id).expect("all layers exist")
    }

    /// Whether a node exists anywhere in the graph.
    pub fn has_node(&self, id: NodeId) -> bool {
        self.node_layers.contains_key(&id)
    }

    /// Find a node by id.
    pub fn node(&self, id: NodeId) -> Option<&SceneNode> {
        let layer = self.node_layers.get(&id)?;
        self.layers[layer].node(id)
    }

    /// Find a mutable node by id.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut SceneNode> {
        let layer = *self.node_layers.get(&id)?;
        self.layers.get_mut(&layer)?.node_mut(id)
    }

    /// Total number of nodes across all layers.
    pub fn num_nodes(&self) -> usize {
        self.node_layers.len()
    }

    /// Insert a node into a layer.
    ///
    /// Returns false (and leaves the graph unchanged) when the id already
    /// exists or was previously removed; ids are never reused.
    pub fn emplace_node(&mut self, layer: LayerId, id: NodeId, attributes: NodeAttributes) -> bool {
        if self.node_layers.contains_key(&id) {
            debug!("ignoring duplicate node {}", id);
            return false;
        }
        if self.removed.contains(&id) {
            debug!("ignoring re-insertion of removed node {}", id);
            return false;
        }
        self.layers
            .get_mut(&layer)
            .expect("all layers exist")
            .insert(SceneNode::new(id, layer, attributes));
        self.node_layers.insert(id, layer);
        true
    }

    /// Remove a node, detaching it from parent, children and siblings.
    /// The id is tombstoned and cannot be inserted again.
    pub fn remove_node(&mut self, id: NodeId) -> bool {
        let Some(layer) = self.node_layers.remove(&id) else {
            return false;
        };
        let node = self
            .layers
            .get_mut(&layer)
            .and_then(|l| l.remove(id))
            .expect("index and layer agree");

        if let Some(parent) = node.parent() {
            if let Some(parent_node) = self.node_mut(parent) {
                parent_node.remove_child(id);
            }
        }
        for child in node.children() {
            if let Some(child_node) = self.node_mut(*child) {
                child_node.set_parent(None);
            }
        }

        self.removed.insert(id);
        true
    }

    /// Insert an edge between two nodes.
    ///
    /// Same layer: an undirected sibling edge. Adjacent layers: a parent/child
    /// edge (the higher-layer node becomes the parent, replacing any previous
    /// parent of the child). Non-adjacent layers are rejected.
    pub fn insert_edge(&mut self, a: NodeId, b: NodeId) -> bool {
        let (Some(&layer_a), Some(&layer_b)) = (self.node_layers.get(&a), self.node_layers.get(&b))
        else {
            debug!("ignoring edge with missing endpoint: {} -- {}", a, b);
            return false;
        };

        if layer_a == layer_b {
            return self
                .layers
                .get_mut(&layer_a)
                .expect("all layers exist")
                .insert_sibling_edge(a, b);
        }

        let (parent, child) = if layer_a.child_layer() == Some(layer_b) {
            (a, b)
        } else if layer_b.child_layer() == Some(layer_a) {
            (b, a)
        } else {
            debug!("ignoring edge between non-adjacent layers: {} -- {}", a, b);
            return false;
        };

        if let Some(old_parent) = self.node(child).and_then(|n| n.parent()) {
            if old_parent == parent {
                return true;
            }
            if let Some(old) = self.node_mut(old_parent) {
                old.remove_child(child);
            }
        }
        if let Some(node) = self.node_mut(child) {
            node.set_parent(Some(parent));
        }
        if let Some(node) = self.node_mut(parent) {
            node.add_child(child);
        }
        true
    }

    /// Merge another graph into this one.
    ///
    /// New nodes and edges are copied; nodes already present keep their local
    /// attributes so optimized values survive front-end re-sends. Tombstoned
    /// ids stay dead.
    pub fn merge_graph(&mut self, other: &DynamicSceneGraph) {
        for layer_id in LayerId::ALL {
            for node in other.layer(layer_id).nodes() {
                if !self.has_node(node.id) {
                    self.emplace_node(layer_id, node.id, node.attributes.clone());
                }
            }
        }
        for layer_id in LayerId::ALL {
            for node in other.layer(layer_id).nodes() {
                for sibling in node.siblings() {
                    self.insert_edge(node.id, *sibling);
                }
                if let Some(parent) = node.parent() {
                    // only adopt the incoming parent when the local child has none
                    let needs_parent = self
                        .node(node.id)
                        .map(|n| !n.has_parent())
                        .unwrap_or(false);
                    if needs_parent {
                        self.insert_edge(parent, node.id);
                    }
                }
            }
        }
    }

    /// Merge node `from` into node `to` within the same layer.
    ///
    /// Children, sibling edges and (if `to` has none) the parent of `from`
    /// move to `to`; `from` is removed and tombstoned.
    pub fn merge_nodes(&mut self, from: NodeId, to: NodeId) -> bool {
        if from == to {
            return false;
        }
        let (Some(&layer_from), Some(&layer_to)) =
            (self.node_layers.get(&from), self.node_layers.get(&to))
        else {
            return false;
        };
        if layer_from != layer_to {
            return false;
        }

        let (children, siblings, parent) = {
            let node = self.node_mut(from).expect("checked above");
            (node.take_children(), node.take_siblings(), node.parent())
        };

        // siblings were taken, so remove_node cannot clean their backlinks
        for sibling in &siblings {
            if let Some(node) = self.node_mut(*sibling) {
                node.remove_sibling(from);
            }
        }

        self.remove_node(from);

        for child in children {
            self.insert_edge(to, child);
        }
        for sibling in siblings {
            if sibling != to {
                self.insert_edge(to, sibling);
            }
        }
        if let Some(parent) = parent {
            let needs_parent = self.node(to).map(|n| !n.has_parent()).unwrap_or(false);
            if needs_parent {
                self.insert_edge(parent, to);
            }
        }
        true
    }

    /// Replace the attached deformed mesh.
    pub fn set_mesh(&mut self, mesh: RawMesh) {
        self.mesh = Some(mesh);
    }

    /// The attached deformed mesh, if one has been set.
    pub fn mesh(&self) -> Option<&RawMesh> {
        self.mesh.as_ref()
    }
}

impl Default for DynamicSceneGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn graph_with_places(ids: &[u64]) -> DynamicSceneGraph {
        let mut graph = DynamicSceneGraph::new();
        for &id in ids {
            graph.emplace_node(LayerId::Places, NodeId(id), NodeAttributes::default());
        }
        graph
    }

    #[test]
    fn test_ids_never_reused() {
        let mut graph = graph_with_places(&[1]);

        assert!(graph.remove_node(NodeId(1)));
        assert!(!graph.emplace_node(LayerId::Places, NodeId(1), NodeAttributes::default()));
        assert!(!graph.has_node(NodeId(1)));
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut graph = graph_with_places(&[1]);
        assert!(!graph.emplace_node(LayerId::Rooms, NodeId(1), NodeAttributes::default()));
        assert_eq!(graph.node(NodeId(1)).unwrap().layer, LayerId::Places);
    }

    #[test]
    fn test_parent_child_edge() {
        let mut graph = graph_with_places(&[1]);
        let room = NodeId::from_symbol(b'R', 0);
        graph.emplace_node(LayerId::Rooms, room, NodeAttributes::default());

        assert!(graph.insert_edge(room, NodeId(1)));
        assert_eq!(graph.node(NodeId(1)).unwrap().parent(), Some(room));
        assert!(graph.node(room).unwrap().children().contains(&NodeId(1)));

        // idempotent re-insertion
        assert!(graph.insert_edge(room, NodeId(1)));
        assert_eq!(graph.node(room).unwrap().children().len(), 1);
    }

    #[test]
    fn test_parent_replaced_on_new_edge() {
        let mut graph = graph_with_places(&[1]);
        let room_a = NodeId::from_symbol(b'R', 0);
        let room_b = NodeId::from_symbol(b'R', 1);
        graph.emplace_node(LayerId::Rooms, room_a, NodeAttributes::default());
        graph.emplace_node(LayerId::Rooms, room_b, NodeAttributes::default());

        graph.insert_edge(room_a, NodeId(1));
        graph.insert_edge(room_b, NodeId(1));

        assert_eq!(graph.node(NodeId(1)).unwrap().parent(), Some(room_b));
        assert!(graph.node(room_a).unwrap().children().is_empty());
    }

    #[test]
    fn test_non_adjacent_edge_rejected() {
        let mut graph = graph_with_places(&[1]);
        let building = NodeId::from_symbol(b'B', 0);
        graph.emplace_node(LayerId::Buildings, building, NodeAttributes::default());

        assert!(!graph.insert_edge(building, NodeId(1)));
    }

    #[test]
    fn test_merge_graph_adds_new_keeps_local() {
        let mut local = graph_with_places(&[1]);
        local.node_mut(NodeId(1)).unwrap().attributes.position = Vector3::new(9.0, 0.0, 0.0);

        let mut incoming = graph_with_places(&[1, 2]);
        incoming.insert_edge(NodeId(1), NodeId(2));

        local.merge_graph(&incoming);

        assert!(local.has_node(NodeId(2)));
        assert_eq!(local.node(NodeId(1)).unwrap().attributes.position.x, 9.0);
        assert!(local
            .node(NodeId(1))
            .unwrap()
            .siblings()
            .contains(&NodeId(2)));
    }

    #[test]
    fn test_merge_graph_respects_tombstones() {
        let mut local = graph_with_places(&[1]);
        local.remove_node(NodeId(1));

        let incoming = graph_with_places(&[1]);
        local.merge_graph(&incoming);

        assert!(!local.has_node(NodeId(1)));
    }

    #[test]
    fn test_merge_nodes_moves_relations() {
        let mut graph = graph_with_places(&[1, 2, 3]);
        let room = NodeId::from_symbol(b'R', 0);
        graph.emplace_node(LayerId::Rooms, room, NodeAttributes::default());
        graph.insert_edge(room, NodeId(2));
        graph.insert_edge(NodeId(2), NodeId(3));

        let object = NodeId::from_symbol(b'o', 0);
        graph.emplace_node(LayerId::Objects, object, NodeAttributes::default());
        graph.insert_edge(NodeId(2), object);

        assert!(graph.merge_nodes(NodeId(2), NodeId(1)));

        assert!(!graph.has_node(NodeId(2)));
        assert_eq!(graph.node(object).unwrap().parent(), Some(NodeId(1)));
        assert!(graph
            .node(NodeId(1))
            .unwrap()
            .siblings()
            .contains(&NodeId(3)));
        assert_eq!(graph.node(NodeId(1)).unwrap().parent(), Some(room));
        // merged-away id is tombstoned
        assert!(!graph.emplace_node(LayerId::Places, NodeId(2), NodeAttributes::default()));
    }
}
