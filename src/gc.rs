use std::collections::{BTreeSet, HashMap, VecDeque};

use serde_json::Value;

use crate::graph::{EntityId, FieldPath, GraphEditor, GraphSnapshot, NodeSource};

/// Explicit retention counts. An id with a positive count is a GC root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetainCounts {
    counts: HashMap<EntityId, usize>,
}

impl RetainCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retain(&mut self, id: &EntityId) -> usize {
        let count = self.counts.entry(id.clone()).or_insert(0);
        *count += 1;
        *count
    }

    /// Decrement the count; releasing an id that is not retained is a no-op.
    pub fn release(&mut self, id: &str) -> usize {
        let Some(count) = self.counts.get_mut(id) else {
            return 0;
        };
        *count -= 1;
        let remaining = *count;
        if remaining == 0 {
            self.counts.remove(id);
        }
        remaining
    }

    pub fn count(&self, id: &str) -> usize {
        self.counts.get(id).copied().unwrap_or(0)
    }

    pub fn ids(&self) -> impl Iterator<Item = &EntityId> {
        self.counts.keys()
    }
}

/// Ids reachable from the root or a retained id over outbound edges.
pub fn reachable(snapshot: &GraphSnapshot, retained: &RetainCounts) -> BTreeSet<EntityId> {
    let mut seen = BTreeSet::new();
    let mut queue: VecDeque<EntityId> = std::iter::once(snapshot.root_id())
        .chain(retained.ids())
        .filter(|id| snapshot.contains(id))
        .cloned()
        .collect();

    while let Some(id) = queue.pop_front() {
        if !seen.insert(id.clone()) {
            continue;
        }
        if let Some(node) = snapshot.get(&id) {
            for edge in node.outbound() {
                if !seen.contains(&edge.id) && snapshot.contains(&edge.id) {
                    queue.push_back(edge.id.clone());
                }
            }
        }
    }
    seen
}

pub fn unreachable(snapshot: &GraphSnapshot, retained: &RetainCounts) -> BTreeSet<EntityId> {
    let live = reachable(snapshot, retained);
    snapshot
        .ids()
        .into_iter()
        .filter(|id| !live.contains(id))
        .collect()
}

/// Target of an eviction: a whole node, or one field of it.
#[derive(Debug, Clone, PartialEq)]
pub struct EvictSelector {
    pub id: EntityId,
    pub field: Option<String>,
    /// Restrict a field eviction to the slot of one argument set.
    pub args: Option<Value>,
}

impl EvictSelector {
    pub fn entity(id: impl Into<EntityId>) -> Self {
        EvictSelector {
            id: id.into(),
            field: None,
            args: None,
        }
    }

    pub fn field(id: impl Into<EntityId>, field: impl Into<String>) -> Self {
        EvictSelector {
            id: id.into(),
            field: Some(field.into()),
            args: None,
        }
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = Some(args);
        self
    }
}

/// Remove what `selector` names. Anything that was only reachable through
/// it is left for the next sweep.
pub(crate) fn evict(editor: &mut GraphEditor, selector: &EvictSelector) -> bool {
    let Some(field) = &selector.field else {
        return editor.remove_node(&selector.id);
    };
    let Some(node) = editor.node(&selector.id) else {
        return false;
    };

    let path = FieldPath::root().child_key(field.as_str());
    let wanted = selector
        .args
        .as_ref()
        .map(|args| EntityId::parameterized(&selector.id, &path, args));
    let slots: Vec<EntityId> = node
        .outbound()
        .iter()
        .filter(|edge| edge.path == path)
        .filter(|edge| editor.node(&edge.id).map_or(false, |target| target.is_parameterized()))
        .filter(|edge| wanted.as_ref().map_or(true, |wanted| *wanted == edge.id))
        .map(|edge| edge.id.clone())
        .collect();

    let mut removed = selector.args.is_none() && editor.remove_key(&selector.id, field);
    for slot in slots {
        editor.unlink_parameterized(&selector.id, &path, &slot);
        removed |= editor.remove_node(&slot);
    }
    removed
}
