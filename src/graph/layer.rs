//! A single layer of the scene graph.

use std::collections::BTreeMap;

use nalgebra::Vector3;

use super::{LayerId, NodeAttributes, NodeId, SceneNode};

/// One abstraction level of the scene graph.
///
/// Owns its nodes and the intra-layer sibling edges between them. Cross-layer
/// structure (parents/children) is managed by [`DynamicSceneGraph`].
///
/// [`DynamicSceneGraph`]: super::DynamicSceneGraph
#[derive(Debug, Clone)]
pub struct SceneGraphLayer {
    id: LayerId,
    nodes: BTreeMap<NodeId, SceneNode>,
}

impl SceneGraphLayer {
    /// Create an empty layer.
    pub fn new(id: LayerId) -> Self {
        Self {
            id,
            nodes: BTreeMap::new(),
        }
    }

    /// Layer identifier.
    pub fn id(&self) -> LayerId {
        self.id
    }

    /// Number of nodes in the layer.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the layer has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether a node exists.
    pub fn has_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Get a node by id.
    pub fn node(&self, id: NodeId) -> Option<&SceneNode> {
        self.nodes.get(&id)
    }

    /// Get a mutable node by id.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut SceneNode> {
        self.nodes.get_mut(&id)
    }

    /// Iterate over nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &SceneNode> {
        self.nodes.values()
    }

    /// Iterate over mutable nodes in id order.
    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut SceneNode> {
        self.nodes.values_mut()
    }

    /// Node ids in ascending order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Position of a node, if it exists.
    pub fn position(&self, id: NodeId) -> Option<Vector3<f64>> {
        self.nodes.get(&id).map(|n| n.attributes.position)
    }

    pub(crate) fn insert(&mut self, node: SceneNode) {
        self.nodes.insert(node.id, node);
    }

    pub(crate) fn remove(&mut self, id: NodeId) -> Option<SceneNode> {
        let node = self.nodes.remove(&id)?;
        for sibling in node.siblings() {
            if let Some(other) = self.nodes.get_mut(sibling) {
                other.remove_sibling(id);
            }
        }
        Some(node)
    }

    /// Insert an undirected sibling edge. Idempotent; returns false when
    /// either endpoint is missing.
    pub fn insert_sibling_edge(&mut self, a: NodeId, b: NodeId) -> bool {
        if a == b || !self.has_node(a) || !self.has_node(b) {
            return false;
        }
        if let Some(node) = self.nodes.get_mut(&a) {
            node.add_sibling(b);
        }
        if let Some(node) = self.nodes.get_mut(&b) {
            node.add_sibling(a);
        }
        true
    }

    /// Merge nodes and sibling edges from another layer of the same kind.
    ///
    /// New nodes are copied in; nodes already present keep their local
    /// attributes (the backend's optimized values take precedence over the
    /// front end's). Sibling edges are unioned.
    pub fn merge_layer(&mut self, other: &SceneGraphLayer) {
        for node in other.nodes() {
            if !self.has_node(node.id) {
                let mut copy = SceneNode::new(node.id, self.id, node.attributes.clone());
                copy.set_parent(node.parent());
                self.insert(copy);
            }
        }
        for node in other.nodes() {
            for sibling in node.siblings() {
                self.insert_sibling_edge(node.id, *sibling);
            }
        }
    }

    /// Drop every node not present in `reference`, mirroring front-end
    /// deletions into a layer snapshot.
    pub fn prune_missing(&mut self, reference: &SceneGraphLayer) {
        let stale: Vec<NodeId> = self
            .nodes
            .keys()
            .copied()
            .filter(|id| !reference.has_node(*id))
            .collect();
        for id in stale {
            self.remove(id);
        }
    }

    /// Insert a fresh node from attributes. Used by tests and producers.
    pub fn emplace(&mut self, id: NodeId, attributes: NodeAttributes) {
        self.insert(SceneNode::new(id, self.id, attributes));
    }
}
