use std::sync::Arc;

use serde_json::Value;

use crate::graph::EntityId;

use super::ast::{Document, Variables};

/// A document bound to variables, optionally rooted at an entity other than
/// the cache root.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub document: Arc<Document>,
    pub variables: Variables,
    pub root_id: Option<EntityId>,
}

impl Query {
    pub fn new(document: impl Into<Arc<Document>>) -> Self {
        Query {
            document: document.into(),
            variables: Variables::new(),
            root_id: None,
        }
    }

    /// Replace the variables with the entries of a JSON object. Anything
    /// other than an object clears them.
    pub fn with_variables(mut self, variables: Value) -> Self {
        self.variables = match variables {
            Value::Object(map) => map,
            _ => Variables::new(),
        };
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Read or write starting at `id` instead of the root.
    pub fn rooted_at(mut self, id: impl Into<EntityId>) -> Self {
        self.root_id = Some(id.into());
        self
    }
}
