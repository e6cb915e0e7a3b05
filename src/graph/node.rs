use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::id::Edge;

/// What a node stores: a normalized entity, or the slot of a field that
/// takes arguments. Serialized as `0` / `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum NodeKind {
    Entity,
    Parameterized,
}

impl From<NodeKind> for u8 {
    fn from(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Entity => 0,
            NodeKind::Parameterized => 1,
        }
    }
}

impl TryFrom<u8> for NodeKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(NodeKind::Entity),
            1 => Ok(NodeKind::Parameterized),
            other => Err(format!("unknown node type {}", other)),
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Entity => f.write_str("entity"),
            NodeKind::Parameterized => f.write_str("parameterized"),
        }
    }
}

/// The unit of storage: a node's own payload plus its edges.
///
/// Published nodes are never mutated; the editor clones a node before
/// changing it and the snapshot keeps sharing the untouched ones.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSnapshot {
    pub(crate) kind: NodeKind,
    pub(crate) typename: Option<String>,
    pub(crate) data: Value,
    pub(crate) outbound: Vec<Edge>,
    pub(crate) inbound: BTreeSet<Edge>,
}

impl NodeSnapshot {
    pub(crate) fn new(kind: NodeKind, typename: Option<String>) -> Self {
        let data = match kind {
            NodeKind::Entity => Value::Object(Map::new()),
            NodeKind::Parameterized => Value::Null,
        };
        NodeSnapshot {
            kind,
            typename,
            data,
            outbound: Vec::new(),
            inbound: BTreeSet::new(),
        }
    }

    pub(crate) fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Declared type, taken from `__typename` when the node was written.
    pub fn typename(&self) -> Option<&str> {
        self.typename.as_deref()
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn outbound(&self) -> &[Edge] {
        &self.outbound
    }

    pub fn inbound(&self) -> &BTreeSet<Edge> {
        &self.inbound
    }

    pub fn is_parameterized(&self) -> bool {
        self.kind == NodeKind::Parameterized
    }
}
