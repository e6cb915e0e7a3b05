use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key under which a reference to another node is stored inside node data.
pub const REFERENCE_KEY: &str = "__ref";

/// Opaque key of a node in the graph.
///
/// Either an identity id produced by the entity id function, or a synthetic
/// parameterized id built by [`EntityId::parameterized`]. Cloning is cheap.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Arc<str>);

impl EntityId {
    pub fn new(id: impl AsRef<str>) -> Self {
        EntityId(Arc::from(id.as_ref()))
    }

    /// Synthetic id for the storage slot of a field that takes arguments.
    ///
    /// Two argument sets never share a slot because the canonical argument
    /// JSON is part of the id.
    pub fn parameterized(container: &EntityId, path: &FieldPath, args: &Value) -> Self {
        EntityId::new(format!("{}|{}|{}", container, path.dotted(), args))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Deref for EntityId {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for EntityId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        EntityId::new(id)
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        EntityId(Arc::from(id))
    }
}

impl From<&String> for EntityId {
    fn from(id: &String) -> Self {
        EntityId::new(id)
    }
}

/// One step of a [`FieldPath`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Key(String),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Index(index) => write!(f, "{}", index),
            PathSegment::Key(key) => f.write_str(key),
        }
    }
}

/// Location of a value inside a node's data, or inside a read result.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldPath(Vec<PathSegment>);

impl FieldPath {
    pub fn root() -> Self {
        FieldPath(Vec::new())
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn child_key(&self, key: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Key(key.into()));
        FieldPath(segments)
    }

    pub fn child_index(&self, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Index(index));
        FieldPath(segments)
    }

    pub fn starts_with(&self, prefix: &FieldPath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Segments joined with `.`; empty for the root path.
    pub fn dotted(&self) -> String {
        self.0
            .iter()
            .map(|segment| segment.to_string())
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            f.write_str("<root>")
        } else {
            f.write_str(&self.dotted())
        }
    }
}

impl From<Vec<PathSegment>> for FieldPath {
    fn from(segments: Vec<PathSegment>) -> Self {
        FieldPath(segments)
    }
}

impl FromIterator<PathSegment> for FieldPath {
    fn from_iter<T: IntoIterator<Item = PathSegment>>(iter: T) -> Self {
        FieldPath(iter.into_iter().collect())
    }
}

/// A directed edge endpoint: the node on the other side and the path inside
/// the source node's data where the edge originates.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub id: EntityId,
    pub path: FieldPath,
}

impl Edge {
    pub fn new(id: EntityId, path: FieldPath) -> Self {
        Edge { id, path }
    }
}

/// Build the value that stands in for `id` inside node data.
pub fn reference(id: &EntityId) -> Value {
    let mut map = Map::new();
    map.insert(REFERENCE_KEY.to_string(), Value::String(id.to_string()));
    Value::Object(map)
}

/// The referenced id if `value` is a reference.
pub fn as_reference(value: &Value) -> Option<&str> {
    match value {
        Value::Object(map) if map.len() == 1 => map.get(REFERENCE_KEY).and_then(Value::as_str),
        _ => None,
    }
}

/// Every reference inside `data`, in document order, as outbound edges.
pub(crate) fn collect_references(data: &Value) -> Vec<Edge> {
    let mut edges = Vec::new();
    let mut stack = vec![(data, FieldPath::root())];

    while let Some((value, path)) = stack.pop() {
        if let Some(id) = as_reference(value) {
            let edge = Edge::new(EntityId::new(id), path);
            if !edges.contains(&edge) {
                edges.push(edge);
            }
            continue;
        }
        match value {
            Value::Array(items) => {
                for (index, item) in items.iter().enumerate().rev() {
                    stack.push((item, path.child_index(index)));
                }
            }
            Value::Object(map) => {
                for (key, item) in map.iter().rev() {
                    stack.push((item, path.child_key(key.as_str())));
                }
            }
            _ => {}
        }
    }

    edges
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parameterized_ids_differ_by_arguments() {
        let root = EntityId::from("ROOT_QUERY");
        let path = FieldPath::root().child_key("thing");
        let a = EntityId::parameterized(&root, &path, &json!({"id": "a"}));
        let b = EntityId::parameterized(&root, &path, &json!({"id": "b"}));

        assert_ne!(a, b);
        assert_eq!(a.as_str(), r#"ROOT_QUERY|thing|{"id":"a"}"#);
    }

    #[test]
    fn parameterized_ids_use_canonical_argument_order() {
        let root = EntityId::from("ROOT_QUERY");
        let path = FieldPath::root().child_key("search");
        let one = EntityId::parameterized(&root, &path, &json!({"b": 1, "a": 2}));
        let two = EntityId::parameterized(&root, &path, &json!({"a": 2, "b": 1}));

        assert_eq!(one, two);
    }

    #[test]
    fn reference_round_trips() {
        let id = EntityId::from("user:1");
        let value = reference(&id);

        assert_eq!(as_reference(&value), Some("user:1"));
        assert_eq!(as_reference(&json!({"__ref": "x", "other": 1})), None);
        assert_eq!(as_reference(&json!("user:1")), None);
    }

    #[test]
    fn collects_references_in_document_order() {
        let data = json!({
            "friends": [{"__ref": "2"}, {"__ref": "3"}],
            "best": {"__ref": "2"},
            "name": "Ada"
        });

        let edges = collect_references(&data);
        let rendered: Vec<String> = edges
            .iter()
            .map(|edge| format!("{}@{}", edge.id, edge.path))
            .collect();

        assert_eq!(rendered, vec!["2@best", "2@friends.0", "3@friends.1"]);
    }

    #[test]
    fn path_display() {
        let path = FieldPath::root().child_key("items").child_index(2).child_key("id");
        assert_eq!(path.to_string(), "items.2.id");
        assert_eq!(FieldPath::root().to_string(), "<root>");
        assert!(path.starts_with(&FieldPath::root().child_key("items")));
    }
}
