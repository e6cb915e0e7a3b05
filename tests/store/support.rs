use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use sourced_cache::{ArgValue, Document, Field, Query, ReadResult, SelectionSet, WatchOptions};

/// `query thing($id: ID!) { thing(id: $id) { id ref { id } } }`
pub fn thing_query(id: &str) -> Query {
    Query::new(Document::new(SelectionSet::new().field(
        Field::new("thing")
            .argument("id", ArgValue::variable("id"))
            .select(
                SelectionSet::new()
                    .leaf("id")
                    .field(Field::new("ref").select(SelectionSet::new().leaf("id"))),
            ),
    )))
    .with_variable("id", id)
}

pub fn thing(id: &str, ref_id: i64) -> Value {
    json!({"thing": {"id": id, "ref": {"id": ref_id}}})
}

/// `{ activeUsers { __typename id name active } }`
pub fn active_users_query() -> Query {
    Query::new(Document::new(SelectionSet::new().field(
        Field::new("activeUsers").select(SelectionSet::new().fields(["__typename", "id", "name", "active"])),
    )))
}

pub fn user(id: i64, name: &str, active: bool) -> Value {
    json!({"__typename": "User", "id": id, "name": name, "active": active})
}

pub fn active_users(users: &[Value]) -> Value {
    json!({ "activeUsers": users })
}

/// `{ <field> }` on the root.
pub fn scalar_query(field: &str) -> Query {
    Query::new(Document::new(SelectionSet::new().leaf(field)))
}

/// Collects every result a watch delivers.
#[derive(Clone, Default)]
pub struct Recorder {
    results: Arc<Mutex<Vec<ReadResult>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watch(&self, query: Query) -> WatchOptions {
        let results = self.results.clone();
        WatchOptions::new(query, move |result: &ReadResult| {
            results.lock().unwrap().push(result.clone());
        })
    }

    pub fn count(&self) -> usize {
        self.results.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<ReadResult> {
        self.results.lock().unwrap().last().cloned()
    }

    pub fn last_data(&self) -> Option<Value> {
        self.last().and_then(|result| result.data().cloned())
    }
}
