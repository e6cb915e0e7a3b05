use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde_json::{Map, Value};

use super::id::{collect_references, Edge, EntityId, FieldPath, PathSegment};
use super::node::{NodeKind, NodeSnapshot};
use super::snapshot::{DanglingEdges, GraphSnapshot, NodeSource};

/// What a committed edit did to the graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    /// Every id whose payload or edges differ, including added and removed ids.
    pub changed: BTreeSet<EntityId>,
    /// Ids whose payload or existence differ. Only these can change a read.
    pub data_changed: BTreeSet<EntityId>,
    pub added: BTreeSet<EntityId>,
    pub removed: BTreeSet<EntityId>,
    /// Ids that lost their last inbound edge, with the payload they had
    /// before the edit.
    pub orphaned: BTreeMap<EntityId, Value>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.changed.contains(id)
    }
}

/// Copy-on-write working state over a published snapshot.
///
/// Nodes are cloned into `staged` the first time they are touched. Edges
/// derived from references are recomputed by [`GraphEditor::settle`] for
/// every node whose payload was written, so the staged graph is edge
/// consistent whenever it is observed through [`GraphEditor::changes`] or
/// [`GraphEditor::commit`].
#[derive(Clone)]
pub(crate) struct GraphEditor {
    base: GraphSnapshot,
    staged: HashMap<EntityId, Option<NodeSnapshot>>,
    dangling: DanglingEdges,
    touched: BTreeSet<EntityId>,
}

impl GraphEditor {
    pub(crate) fn new(base: GraphSnapshot) -> Self {
        let dangling = base.dangling().clone();
        GraphEditor {
            base,
            staged: HashMap::new(),
            dangling,
            touched: BTreeSet::new(),
        }
    }

    pub(crate) fn base(&self) -> &GraphSnapshot {
        &self.base
    }

    fn stage(&mut self, id: &str) -> Option<&mut NodeSnapshot> {
        if !self.staged.contains_key(id) {
            let copy = NodeSnapshot::clone(self.base.get(id)?);
            self.staged.insert(EntityId::new(id), Some(copy));
        }
        self.staged.get_mut(id).and_then(Option::as_mut)
    }

    /// Make sure a node exists, creating an empty one of `kind` if needed.
    pub(crate) fn ensure_node(&mut self, id: &EntityId, kind: NodeKind, typename: Option<&str>) {
        match self.stage(id) {
            Some(node) => {
                if let Some(typename) = typename {
                    if node.typename.as_deref() != Some(typename) {
                        node.typename = Some(typename.to_string());
                    }
                }
            }
            None => {
                let mut node = NodeSnapshot::new(kind, typename.map(str::to_string));
                node.inbound = self.dangling.remove(id).unwrap_or_default();
                self.staged.insert(id.clone(), Some(node));
            }
        }
    }

    /// Replace the value at `path` inside the node's payload, creating
    /// intermediate objects and list slots as needed.
    pub(crate) fn set_value(&mut self, id: &EntityId, path: &FieldPath, value: Value) {
        let Some(node) = self.stage(id) else {
            return;
        };
        *slot_mut(&mut node.data, path.segments()) = value;
        self.touched.insert(id.clone());
    }

    /// Drop a top-level key from the node's payload.
    pub(crate) fn remove_key(&mut self, id: &EntityId, key: &str) -> bool {
        let Some(node) = self.stage(id) else {
            return false;
        };
        let removed = match &mut node.data {
            Value::Object(map) => map.remove(key).is_some(),
            _ => false,
        };
        if removed {
            self.touched.insert(id.clone());
        }
        removed
    }

    /// Record the edge from a container to the slot node of one of its
    /// parameterized fields. These edges have no reference in the payload.
    pub(crate) fn link_parameterized(&mut self, parent: &EntityId, path: &FieldPath, child: &EntityId) {
        let edge = Edge::new(child.clone(), path.clone());
        let Some(node) = self.stage(parent) else {
            return;
        };
        if node.outbound.contains(&edge) {
            return;
        }
        node.outbound.push(edge);
        self.inbound_add(child, Edge::new(parent.clone(), path.clone()));
        self.touched.insert(parent.clone());
    }

    pub(crate) fn unlink_parameterized(&mut self, parent: &EntityId, path: &FieldPath, child: &EntityId) {
        let edge = Edge::new(child.clone(), path.clone());
        let Some(node) = self.stage(parent) else {
            return;
        };
        let before = node.outbound.len();
        node.outbound.retain(|existing| *existing != edge);
        if node.outbound.len() != before {
            self.inbound_remove(child, &Edge::new(parent.clone(), path.clone()));
        }
    }

    /// Remove a node. References to it become dangling.
    pub(crate) fn remove_node(&mut self, id: &EntityId) -> bool {
        if self.stage(id).is_none() {
            return false;
        }
        let Some(Some(node)) = self.staged.insert(id.clone(), None) else {
            return false;
        };
        self.touched.remove(id);

        for edge in &node.outbound {
            self.inbound_remove(&edge.id, &Edge::new(id.clone(), edge.path.clone()));
        }
        // Edges from surviving sources stay; keep their mirrors aside.
        let survivors: BTreeSet<Edge> = node
            .inbound
            .into_iter()
            .filter(|edge| edge.id != *id)
            .collect();
        if !survivors.is_empty() {
            self.dangling.insert(id.clone(), survivors);
        }
        true
    }

    fn inbound_add(&mut self, target: &EntityId, edge: Edge) {
        match self.stage(target) {
            Some(node) => {
                node.inbound.insert(edge);
            }
            None => {
                self.dangling.entry(target.clone()).or_default().insert(edge);
            }
        }
    }

    fn inbound_remove(&mut self, target: &EntityId, edge: &Edge) {
        match self.stage(target) {
            Some(node) => {
                node.inbound.remove(edge);
            }
            None => {
                if let Some(edges) = self.dangling.get_mut(target) {
                    edges.remove(edge);
                    if edges.is_empty() {
                        self.dangling.remove(target);
                    }
                }
            }
        }
    }

    fn is_parameterized(&self, id: &str) -> bool {
        self.node(id).map(NodeSnapshot::is_parameterized).unwrap_or(false)
    }

    /// Recompute reference edges for every node written since the last
    /// settle and mirror the differences onto the targets' inbound sets.
    pub(crate) fn settle(&mut self) {
        for id in std::mem::take(&mut self.touched) {
            let Some(node) = self.node(&id) else {
                continue;
            };
            let previous = node.outbound.clone();
            let mut next = collect_references(&node.data);
            for edge in &previous {
                if self.is_parameterized(&edge.id) && !next.contains(edge) {
                    next.push(edge.clone());
                }
            }
            if next == previous {
                continue;
            }

            for edge in previous.iter().filter(|edge| !next.contains(edge)) {
                self.inbound_remove(&edge.id, &Edge::new(id.clone(), edge.path.clone()));
            }
            for edge in next.iter().filter(|edge| !previous.contains(edge)) {
                self.inbound_add(&edge.id, Edge::new(id.clone(), edge.path.clone()));
            }
            if let Some(node) = self.stage(&id) {
                node.outbound = next;
            }
        }
    }

    /// Differences between the staged graph and the base snapshot.
    pub(crate) fn changes(&mut self) -> ChangeSet {
        self.settle();

        let root = self.base.root_id();
        let mut changes = ChangeSet::default();
        for (id, staged) in &self.staged {
            match (self.base.get(id), staged) {
                (Some(before), Some(after)) => {
                    if **before == *after {
                        continue;
                    }
                    changes.changed.insert(id.clone());
                    if before.data != after.data {
                        changes.data_changed.insert(id.clone());
                    }
                    if id != root && !before.inbound.is_empty() && after.inbound.is_empty() {
                        changes.orphaned.insert(id.clone(), before.data.clone());
                    }
                }
                (None, Some(_)) => {
                    changes.changed.insert(id.clone());
                    changes.data_changed.insert(id.clone());
                    changes.added.insert(id.clone());
                }
                (Some(_), None) => {
                    changes.changed.insert(id.clone());
                    changes.data_changed.insert(id.clone());
                    changes.removed.insert(id.clone());
                }
                (None, None) => {}
            }
        }
        changes
    }

    /// Publish the staged graph. Nodes that ended up equal to their base
    /// version are not republished, so they stay shared.
    pub(crate) fn commit(mut self) -> (GraphSnapshot, ChangeSet) {
        let changes = self.changes();
        if changes.is_empty() && self.dangling == *self.base.dangling() {
            return (self.base, changes);
        }

        let mut nodes = self.base.nodes().clone();
        for (id, staged) in self.staged {
            if !changes.changed.contains(&id) {
                continue;
            }
            match staged {
                Some(node) => {
                    nodes.insert(id, Arc::new(node));
                }
                None => {
                    nodes.remove(&id);
                }
            }
        }
        let root = self.base.root_id().clone();
        (GraphSnapshot::from_parts(root, nodes, self.dangling), changes)
    }
}

impl NodeSource for GraphEditor {
    fn root_id(&self) -> &EntityId {
        self.base.root_id()
    }

    fn node(&self, id: &str) -> Option<&NodeSnapshot> {
        match self.staged.get(id) {
            Some(staged) => staged.as_ref(),
            None => self.base.node(id),
        }
    }
}

fn slot_mut<'v>(root: &'v mut Value, path: &[PathSegment]) -> &'v mut Value {
    let mut current = root;
    for segment in path {
        current = match segment {
            PathSegment::Key(key) => {
                if !current.is_object() {
                    *current = Value::Object(Map::new());
                }
                let Value::Object(map) = current else {
                    unreachable!("slot was just made an object");
                };
                map.entry(key.clone()).or_insert(Value::Null)
            }
            PathSegment::Index(index) => {
                if !current.is_array() {
                    *current = Value::Array(Vec::new());
                }
                let Value::Array(items) = current else {
                    unreachable!("slot was just made a list");
                };
                if items.len() <= *index {
                    items.resize(*index + 1, Value::Null);
                }
                &mut items[*index]
            }
        };
    }
    current
}
