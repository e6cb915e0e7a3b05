use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::graph::{collect_references, DanglingEdges, Edge, EntityId, GraphSnapshot, NodeKind, NodeSnapshot};

/// One node in an exported cache image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedNode {
    /// `0` for an entity, `1` for a parameterized slot.
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typename: Option<String>,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inbound: Option<Vec<Edge>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbound: Option<Vec<Edge>>,
}

/// A whole graph keyed by id.
pub type CacheImage = BTreeMap<EntityId, SerializedNode>;

/// Export every node of `snapshot`. Empty edge lists are left out.
pub fn extract(snapshot: &GraphSnapshot) -> CacheImage {
    snapshot
        .iter()
        .map(|(id, node)| {
            let inbound: Vec<Edge> = node.inbound().iter().cloned().collect();
            let outbound = node.outbound().to_vec();
            let serialized = SerializedNode {
                kind: node.kind(),
                typename: node.typename().map(str::to_string),
                data: node.data().clone(),
                inbound: (!inbound.is_empty()).then_some(inbound),
                outbound: (!outbound.is_empty()).then_some(outbound),
            };
            (id.clone(), serialized)
        })
        .collect()
}

/// Rebuild a snapshot from an image.
///
/// Outbound edges are taken from the image, or derived from the references
/// in a node's data when the image has none. Inbound edges are always
/// derived from the outbound ones, so the result is edge consistent even
/// when the image was edited by hand.
pub fn restore(root_id: EntityId, image: &CacheImage) -> GraphSnapshot {
    let mut nodes: HashMap<EntityId, NodeSnapshot> = image
        .iter()
        .map(|(id, serialized)| {
            let mut node = NodeSnapshot::new(serialized.kind, serialized.typename.clone())
                .with_data(serialized.data.clone());
            node.outbound = match &serialized.outbound {
                Some(edges) => edges.clone(),
                None => collect_references(&serialized.data),
            };
            (id.clone(), node)
        })
        .collect();

    let mut dangling = DanglingEdges::new();
    let edges: Vec<(EntityId, Edge)> = nodes
        .iter()
        .flat_map(|(source, node)| {
            node.outbound
                .iter()
                .map(move |edge| (edge.id.clone(), Edge::new(source.clone(), edge.path.clone())))
        })
        .collect();
    for (target, mirror) in edges {
        match nodes.get_mut(&target) {
            Some(node) => {
                node.inbound.insert(mirror);
            }
            None => {
                dangling.entry(target).or_insert_with(BTreeSet::new).insert(mirror);
            }
        }
    }

    let nodes = nodes
        .into_iter()
        .map(|(id, node)| (id, Arc::new(node)))
        .collect();
    GraphSnapshot::from_parts(root_id, nodes, dangling)
}
