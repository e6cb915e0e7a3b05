use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use thiserror::Error;

use super::id::{Edge, EntityId, FieldPath};
use super::node::NodeSnapshot;

/// Read access to nodes, shared by published snapshots and in-flight edits.
pub trait NodeSource {
    fn root_id(&self) -> &EntityId;

    fn node(&self, id: &str) -> Option<&NodeSnapshot>;
}

/// An edge that has no counterpart on the other node.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{side} edge {source_id} -> {target_id} at `{path}` has no matching counterpart")]
pub struct EdgeViolation {
    pub side: &'static str,
    pub source_id: EntityId,
    pub target_id: EntityId,
    pub path: FieldPath,
}

/// Inbound edges recorded for ids that have no node (dangling references).
pub(crate) type DanglingEdges = HashMap<EntityId, BTreeSet<Edge>>;

/// Immutable mapping from id to node plus the distinguished root id.
///
/// Cloning shares everything. A snapshot produced by a write shares every
/// node the write did not touch with the snapshot it was derived from.
#[derive(Debug, Clone)]
pub struct GraphSnapshot {
    root_id: EntityId,
    nodes: Arc<HashMap<EntityId, Arc<NodeSnapshot>>>,
    dangling: Arc<DanglingEdges>,
}

impl GraphSnapshot {
    pub fn empty(root_id: EntityId) -> Self {
        GraphSnapshot {
            root_id,
            nodes: Arc::new(HashMap::new()),
            dangling: Arc::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    pub(crate) fn from_nodes(root_id: EntityId, nodes: HashMap<EntityId, Arc<NodeSnapshot>>) -> Self {
        GraphSnapshot::from_parts(root_id, nodes, HashMap::new())
    }

    pub(crate) fn from_parts(
        root_id: EntityId,
        nodes: HashMap<EntityId, Arc<NodeSnapshot>>,
        dangling: DanglingEdges,
    ) -> Self {
        GraphSnapshot {
            root_id,
            nodes: Arc::new(nodes),
            dangling: Arc::new(dangling),
        }
    }

    pub(crate) fn nodes(&self) -> &HashMap<EntityId, Arc<NodeSnapshot>> {
        &self.nodes
    }

    pub(crate) fn dangling(&self) -> &DanglingEdges {
        &self.dangling
    }

    pub fn root_id(&self) -> &EntityId {
        &self.root_id
    }

    pub fn get(&self, id: &str) -> Option<&Arc<NodeSnapshot>> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All ids, sorted.
    pub fn ids(&self) -> BTreeSet<EntityId> {
        self.nodes.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EntityId, &Arc<NodeSnapshot>)> {
        self.nodes.iter()
    }

    /// True when both values are the same published snapshot.
    pub fn ptr_eq(&self, other: &GraphSnapshot) -> bool {
        Arc::ptr_eq(&self.nodes, &other.nodes) && self.root_id == other.root_id
    }

    /// Ids whose existence or payload differs between `self` and `newer`.
    ///
    /// Edge-only differences are ignored: they cannot change what a read
    /// observes.
    pub fn data_changes(&self, newer: &GraphSnapshot) -> BTreeSet<EntityId> {
        if Arc::ptr_eq(&self.nodes, &newer.nodes) {
            return BTreeSet::new();
        }

        let mut changed = BTreeSet::new();
        for (id, node) in self.nodes.iter() {
            match newer.nodes.get(id) {
                Some(other) if Arc::ptr_eq(node, other) => {}
                Some(other) if node.data == other.data => {}
                _ => {
                    changed.insert(id.clone());
                }
            }
        }
        for id in newer.nodes.keys() {
            if !self.nodes.contains_key(id) {
                changed.insert(id.clone());
            }
        }
        changed
    }

    /// Ids referenced by some node but absent from the snapshot.
    pub fn dangling_ids(&self) -> BTreeSet<EntityId> {
        self.dangling.keys().cloned().collect()
    }

    /// Check that every outbound edge has its inbound mirror and vice versa.
    ///
    /// Outbound edges towards absent ids are dangling references; their
    /// mirrors are kept aside so the edge heals when the id is written again.
    pub fn verify_edges(&self) -> Result<(), EdgeViolation> {
        for (id, node) in self.nodes.iter() {
            for edge in &node.outbound {
                let mirror = Edge::new(id.clone(), edge.path.clone());
                let matched = match self.nodes.get(&edge.id) {
                    Some(target) => target.inbound.contains(&mirror),
                    None => self
                        .dangling
                        .get(&edge.id)
                        .map(|edges| edges.contains(&mirror))
                        .unwrap_or(false),
                };
                if !matched {
                    return Err(EdgeViolation {
                        side: "outbound",
                        source_id: id.clone(),
                        target_id: edge.id.clone(),
                        path: edge.path.clone(),
                    });
                }
            }
            for edge in &node.inbound {
                let mirror = Edge::new(id.clone(), edge.path.clone());
                let matched = self
                    .nodes
                    .get(&edge.id)
                    .map(|source| source.outbound.contains(&mirror))
                    .unwrap_or(false);
                if !matched {
                    return Err(EdgeViolation {
                        side: "inbound",
                        source_id: edge.id.clone(),
                        target_id: id.clone(),
                        path: edge.path.clone(),
                    });
                }
            }
        }
        for (id, edges) in self.dangling.iter() {
            for edge in edges {
                let mirror = Edge::new(id.clone(), edge.path.clone());
                let matched = !self.nodes.contains_key(id)
                    && self
                        .nodes
                        .get(&edge.id)
                        .map(|source| source.outbound.contains(&mirror))
                        .unwrap_or(false);
                if !matched {
                    return Err(EdgeViolation {
                        side: "dangling",
                        source_id: edge.id.clone(),
                        target_id: id.clone(),
                        path: edge.path.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl NodeSource for GraphSnapshot {
    fn root_id(&self) -> &EntityId {
        &self.root_id
    }

    fn node(&self, id: &str) -> Option<&NodeSnapshot> {
        self.nodes.get(id).map(|node| node.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::NodeKind;
    use serde_json::json;

    fn node(data: serde_json::Value) -> Arc<NodeSnapshot> {
        Arc::new(NodeSnapshot::new(NodeKind::Entity, None).with_data(data))
    }

    #[test]
    fn data_changes_ignore_shared_nodes() {
        let shared = node(json!({"id": 1}));
        let mut before = HashMap::new();
        before.insert(EntityId::from("1"), shared.clone());
        before.insert(EntityId::from("2"), node(json!({"id": 2})));
        let before = GraphSnapshot::from_nodes("ROOT".into(), before);

        let mut after = HashMap::new();
        after.insert(EntityId::from("1"), shared);
        after.insert(EntityId::from("2"), node(json!({"id": 2, "name": "b"})));
        after.insert(EntityId::from("3"), node(json!({"id": 3})));
        let after = GraphSnapshot::from_nodes("ROOT".into(), after);

        let changed: Vec<String> = before
            .data_changes(&after)
            .into_iter()
            .map(|id| id.to_string())
            .collect();
        assert_eq!(changed, vec!["2", "3"]);
    }

    #[test]
    fn verify_edges_reports_missing_inbound() {
        let mut source = NodeSnapshot::new(NodeKind::Entity, None);
        source.outbound.push(Edge::new("b".into(), FieldPath::root().child_key("b")));
        let mut nodes = HashMap::new();
        nodes.insert(EntityId::from("a"), Arc::new(source));
        nodes.insert(EntityId::from("b"), node(json!({})));
        let snapshot = GraphSnapshot::from_nodes("a".into(), nodes);

        let violation = snapshot.verify_edges().unwrap_err();
        assert_eq!(violation.side, "outbound");
        assert_eq!(violation.target_id.as_str(), "b");
    }

    #[test]
    fn dangling_outbound_edges_need_a_recorded_mirror() {
        let path = FieldPath::root().child_key("x");
        let mut source = NodeSnapshot::new(NodeKind::Entity, None);
        source.outbound.push(Edge::new("gone".into(), path.clone()));
        let mut nodes = HashMap::new();
        nodes.insert(EntityId::from("a"), Arc::new(source));

        let unrecorded = GraphSnapshot::from_nodes("a".into(), nodes.clone());
        assert!(unrecorded.verify_edges().is_err());

        let mut dangling = HashMap::new();
        dangling.insert(
            EntityId::from("gone"),
            BTreeSet::from([Edge::new("a".into(), path)]),
        );
        let recorded = GraphSnapshot::from_parts("a".into(), nodes, dangling);
        assert!(recorded.verify_edges().is_ok());
        assert_eq!(recorded.dangling_ids().len(), 1);
    }
}
