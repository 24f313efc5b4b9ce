//! Layered scene graph.
//!
//! The graph is a hierarchy of layers ordered by abstraction (agents at the
//! bottom, buildings at the top). Nodes live in exactly one layer, may have
//! sibling edges within the layer and at most one parent in the adjacent
//! higher layer.

mod layer;
mod node;
mod scene_graph;

pub use layer::SceneGraphLayer;
pub use node::{NodeAttributes, NodeId, SceneNode};
pub use scene_graph::DynamicSceneGraph;

use serde::{Deserialize, Serialize};

/// A layer of the scene graph, ordered by abstraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LayerId {
    /// Dynamic agent trajectory nodes.
    Agents,
    /// Segmented object nodes.
    Objects,
    /// Topological place nodes.
    Places,
    /// Room nodes derived from places.
    Rooms,
    /// The (single) building node.
    Buildings,
}

impl LayerId {
    /// All layers in ascending abstraction order.
    pub const ALL: [LayerId; 5] = [
        LayerId::Agents,
        LayerId::Objects,
        LayerId::Places,
        LayerId::Rooms,
        LayerId::Buildings,
    ];

    /// The adjacent higher layer, if any.
    pub fn parent_layer(&self) -> Option<LayerId> {
        match self {
            LayerId::Agents => Some(LayerId::Objects),
            LayerId::Objects => Some(LayerId::Places),
            LayerId::Places => Some(LayerId::Rooms),
            LayerId::Rooms => Some(LayerId::Buildings),
            LayerId::Buildings => None,
        }
    }

    /// The adjacent lower layer, if any.
    pub fn child_layer(&self) -> Option<LayerId> {
        match self {
            LayerId::Agents => None,
            LayerId::Objects => Some(LayerId::Agents),
            LayerId::Places => Some(LayerId::Objects),
            LayerId::Rooms => Some(LayerId::Places),
            LayerId::Buildings => Some(LayerId::Rooms),
        }
    }
}
