//! Control-point selection over the places layer.
//!
//! The deformation solver cannot afford the full place-to-place connectivity,
//! so each optimization reduces the places layer to a minimum spanning tree:
//! temporary control nodes come from the tree, valence constraints only from
//! its leaves. This keeps solver size near-linear in the number of places.

use std::collections::{BTreeMap, HashSet};

use crate::graph::{NodeId, SceneGraphLayer};

/// One spanning edge between two places.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanningEdge {
    /// Lower-id endpoint.
    pub source: NodeId,

    /// Higher-id endpoint.
    pub target: NodeId,

    /// Euclidean distance between the endpoints.
    pub weight: f64,
}

/// Result of the spanning-tree computation.
#[derive(Debug, Clone, Default)]
pub struct SpanningTreeInfo {
    /// Nodes with at most one spanning edge. A lone place with no edges
    /// still counts as a leaf so it can anchor a valence.
    pub leaves: HashSet<NodeId>,

    /// Chosen spanning edges, in selection order.
    pub edges: Vec<SpanningEdge>,
}

/// Union-find over node ids.
struct DisjointSet {
    parent: BTreeMap<NodeId, NodeId>,
}

impl DisjointSet {
    fn new(ids: impl Iterator<Item = NodeId>) -> Self {
        Self {
            parent: ids.map(|id| (id, id)).collect(),
        }
    }

    fn find(&mut self, id: NodeId) -> NodeId {
        let mut root = id;
        while self.parent[&root] != root {
            root = self.parent[&root];
        }
        // path compression
        let mut current = id;
        while self.parent[&current] != root {
            let next = self.parent[&current];
            self.parent.insert(current, root);
            current = next;
        }
        root
    }

    fn union(&mut self, a: NodeId, b: NodeId) -> bool {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a == root_b {
            return false;
        }
        self.parent.insert(root_b, root_a);
        true
    }
}

/// Compute the minimum spanning edges of a places layer via Kruskal.
///
/// Edge weights are euclidean distances between node positions; ties break by
/// (source id, target id), so the result is reproducible for identical input.
pub fn minimum_spanning_edges(layer: &SceneGraphLayer) -> SpanningTreeInfo {
    let mut candidates: Vec<SpanningEdge> = Vec::new();
    for node in layer.nodes() {
        for &sibling in node.siblings() {
            // visit each undirected edge once, from its lower-id endpoint
            if sibling <= node.id {
                continue;
            }
            let Some(other_pos) = layer.position(sibling) else {
                continue;
            };
            let weight = (node.attributes.position - other_pos).norm();
            candidates.push(SpanningEdge {
                source: node.id,
                target: sibling,
                weight,
            });
        }
    }

    candidates.sort_by(|a, b| {
        a.weight
            .partial_cmp(&b.weight)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.source.cmp(&b.source))
            .then(a.target.cmp(&b.target))
    });

    let mut forest = DisjointSet::new(layer.node_ids());
    let mut degrees: BTreeMap<NodeId, usize> = layer.node_ids().map(|id| (id, 0)).collect();
    let mut edges = Vec::new();

    for edge in candidates {
        if forest.union(edge.source, edge.target) {
            *degrees.get_mut(&edge.source).expect("known id") += 1;
            *degrees.get_mut(&edge.target).expect("known id") += 1;
            edges.push(edge);
        }
    }

    let leaves = degrees
        .into_iter()
        .filter(|&(_, degree)| degree <= 1)
        .map(|(id, _)| id)
        .collect();

    SpanningTreeInfo { leaves, edges }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{LayerId, NodeAttributes};
    use nalgebra::Vector3;

    fn layer_with_positions(positions: &[(u64, [f64; 3])]) -> SceneGraphLayer {
        let mut layer = SceneGraphLayer::new(LayerId::Places);
        for &(id, [x, y, z]) in positions {
            layer.emplace(
                NodeId(id),
                NodeAttributes::at_position(Vector3::new(x, y, z)),
            );
        }
        layer
    }

    fn chain_layer() -> SceneGraphLayer {
        // 1 -- 2 -- 3 in a line, plus a long chord 1 -- 3
        let mut layer = layer_with_positions(&[
            (1, [0.0, 0.0, 0.0]),
            (2, [1.0, 0.0, 0.0]),
            (3, [2.0, 0.0, 0.0]),
        ]);
        layer.insert_sibling_edge(NodeId(1), NodeId(2));
        layer.insert_sibling_edge(NodeId(2), NodeId(3));
        layer.insert_sibling_edge(NodeId(1), NodeId(3));
        layer
    }

    #[test]
    fn test_mst_prefers_short_edges() {
        let info = minimum_spanning_edges(&chain_layer());

        assert_eq!(info.edges.len(), 2);
        // the 2.0m chord is excluded
        assert!(info
            .edges
            .iter()
            .all(|e| !(e.source == NodeId(1) && e.target == NodeId(3))));
        // endpoints of the chain are leaves, the middle is not
        assert!(info.leaves.contains(&NodeId(1)));
        assert!(info.leaves.contains(&NodeId(3)));
        assert!(!info.leaves.contains(&NodeId(2)));
    }

    #[test]
    fn test_mst_deterministic() {
        let first = minimum_spanning_edges(&chain_layer());
        for _ in 0..10 {
            let again = minimum_spanning_edges(&chain_layer());
            assert_eq!(again.edges, first.edges);
            assert_eq!(again.leaves, first.leaves);
        }
    }

    #[test]
    fn test_tie_break_by_id_order() {
        // square with four equal-length sides: chosen edges must be stable
        let mut layer = layer_with_positions(&[
            (1, [0.0, 0.0, 0.0]),
            (2, [1.0, 0.0, 0.0]),
            (3, [1.0, 1.0, 0.0]),
            (4, [0.0, 1.0, 0.0]),
        ]);
        layer.insert_sibling_edge(NodeId(1), NodeId(2));
        layer.insert_sibling_edge(NodeId(2), NodeId(3));
        layer.insert_sibling_edge(NodeId(3), NodeId(4));
        layer.insert_sibling_edge(NodeId(4), NodeId(1));

        let info = minimum_spanning_edges(&layer);

        assert_eq!(info.edges.len(), 3);
        // ids sort (1,2) < (1,4) < (2,3); the cycle-closing (3,4) is dropped
        assert_eq!(info.edges[0].source, NodeId(1));
        assert_eq!(info.edges[0].target, NodeId(2));
        assert_eq!(info.edges[1].source, NodeId(1));
        assert_eq!(info.edges[1].target, NodeId(4));
        assert_eq!(info.edges[2].source, NodeId(2));
        assert_eq!(info.edges[2].target, NodeId(3));
    }

    #[test]
    fn test_single_node_is_leaf() {
        let layer = layer_with_positions(&[(7, [0.0, 0.0, 0.0])]);
        let info = minimum_spanning_edges(&layer);

        assert!(info.edges.is_empty());
        assert!(info.leaves.contains(&NodeId(7)));
    }

    #[test]
    fn test_disconnected_components() {
        let mut layer = layer_with_positions(&[
            (1, [0.0, 0.0, 0.0]),
            (2, [1.0, 0.0, 0.0]),
            (5, [10.0, 0.0, 0.0]),
        ]);
        layer.insert_sibling_edge(NodeId(1), NodeId(2));

        let info = minimum_spanning_edges(&layer);

        assert_eq!(info.edges.len(), 1);
        assert!(info.leaves.contains(&NodeId(5)));
    }
}
