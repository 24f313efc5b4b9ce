//! Scene graph nodes and their attributes.

use std::collections::BTreeSet;
use std::fmt;

use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use super::LayerId;

/// Globally unique node identifier.
///
/// Identifiers are assigned by the producer and never reused after deletion.
/// Derived nodes use symbol-style ids (a one-byte prefix plus an index) so
/// they cannot collide with front-end counters.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Pack a one-byte prefix and an index into an id, gtsam-symbol style.
    pub const fn from_symbol(prefix: u8, index: u64) -> Self {
        NodeId(((prefix as u64) << 56) | (index & 0x00ff_ffff_ffff_ffff))
    }

    /// The symbol prefix byte, if the id was symbol-packed.
    pub fn prefix(&self) -> u8 {
        (self.0 >> 56) as u8
    }

    /// The symbol index.
    pub fn index(&self) -> u64 {
        self.0 & 0x00ff_ffff_ffff_ffff
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = self.prefix();
        if prefix.is_ascii_alphabetic() {
            write!(f, "{}{}", prefix as char, self.index())
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Typed attributes attached to every node.
///
/// Per-layer extras are optional fields: places carry mesh-vertex connections
/// and an obstacle-distance estimate, agents carry a timestamp index and the
/// external key correlating them to a solver-side pose variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeAttributes {
    /// 3D position (meters).
    pub position: Vector3<f64>,

    /// Orientation (meaningful for agent nodes).
    pub rotation: UnitQuaternion<f64>,

    /// Semantic class label.
    pub semantic_label: u8,

    /// Display color (RGB).
    pub color: [u8; 3],

    /// Display name.
    pub name: String,

    /// Mesh vertices anchored to this node (places).
    pub mesh_connections: Vec<usize>,

    /// Distance to the nearest obstacle (places).
    pub distance: f64,

    /// Monotonically increasing timestamp index (agents), microseconds.
    pub timestamp_us: Option<u64>,

    /// Back-reference to the solver-side pose variable key (agents).
    ///
    /// A plain attribute, not an ownership edge; resolved via lookup at the
    /// point of use.
    pub external_key: Option<u64>,
}

impl Default for NodeAttributes {
    fn default() -> Self {
        Self {
            position: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
            semantic_label: 0,
            color: [0, 0, 0],
            name: String::new(),
            mesh_connections: Vec::new(),
            distance: 0.0,
            timestamp_us: None,
            external_key: None,
        }
    }
}

impl NodeAttributes {
    /// Create attributes at a position with everything else defaulted.
    pub fn at_position(position: Vector3<f64>) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }
}

/// A node in the scene graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneNode {
    /// Unique node identifier.
    pub id: NodeId,

    /// Layer this node belongs to.
    pub layer: LayerId,

    /// Typed attributes.
    pub attributes: NodeAttributes,

    /// Parent in the adjacent higher layer, if any.
    parent: Option<NodeId>,

    /// Children in the adjacent lower layer.
    children: BTreeSet<NodeId>,

    /// Intra-layer neighbors (e.g. place traversability).
    siblings: BTreeSet<NodeId>,
}

impl SceneNode {
    /// Create a new node.
    pub fn new(id: NodeId, layer: LayerId, attributes: NodeAttributes) -> Self {
        Self {
            id,
            layer,
            attributes,
            parent: None,
            children: BTreeSet::new(),
            siblings: BTreeSet::new(),
        }
    }

    /// Parent node id, if any.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Whether the node has a parent.
    pub fn has_parent(&self) -> bool {
        self.parent.is_some()
    }

    /// Children node ids.
    pub fn children(&self) -> &BTreeSet<NodeId> {
        &self.children
    }

    /// Intra-layer neighbors.
    pub fn siblings(&self) -> &BTreeSet<NodeId> {
        &self.siblings
    }

    pub(crate) fn set_parent(&mut self, parent: Option<NodeId>) {
        self.parent = parent;
    }

    pub(crate) fn add_child(&mut self, child: NodeId) {
        self.children.insert(child);
    }

    pub(crate) fn remove_child(&mut self, child: NodeId) {
        self.children.remove(&child);
    }

    pub(crate) fn add_sibling(&mut self, sibling: NodeId) {
        self.siblings.insert(sibling);
    }

    pub(crate) fn remove_sibling(&mut self, sibling: NodeId) {
        self.siblings.remove(&sibling);
    }

    pub(crate) fn take_children(&mut self) -> BTreeSet<NodeId> {
        std::mem::take(&mut self.children)
    }

    pub(crate) fn take_siblings(&mut self) -> BTreeSet<NodeId> {
        std::mem::take(&mut self.siblings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_packing() {
        let id = NodeId::from_symbol(b'B', 0);
        assert_eq!(id.prefix(), b'B');
        assert_eq!(id.index(), 0);
        assert_eq!(format!("{}", id), "B0");

        let id = NodeId::from_symbol(b'p', 42);
        assert_eq!(id.prefix(), b'p');
        assert_eq!(id.index(), 42);
    }

    #[test]
    fn test_symbol_ids_disjoint_from_plain_ids() {
        let plain = NodeId(42);
        let symbol = NodeId::from_symbol(b'p', 42);
        assert_ne!(plain, symbol);
    }

    #[test]
    fn test_node_relations() {
        let mut node = SceneNode::new(
            NodeId(1),
            LayerId::Places,
            NodeAttributes::default(),
        );

        assert!(!node.has_parent());
        node.set_parent(Some(NodeId(2)));
        assert_eq!(node.parent(), Some(NodeId(2)));

        node.add_child(NodeId(3));
        node.add_sibling(NodeId(4));
        assert!(node.children().contains(&NodeId(3)));
        assert!(node.siblings().contains(&NodeId(4)));

        node.remove_sibling(NodeId(4));
        assert!(node.siblings().is_empty());
    }
}
