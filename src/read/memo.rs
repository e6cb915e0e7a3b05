use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::graph::EntityId;
use crate::selection::Query;

use super::reader::{MissingField, ReadOutcome};

/// Stable identity of a read: document, variables, root and audience.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryFingerprint {
    signature: Arc<str>,
    /// Bindings of the variables the document names, arguments and
    /// directives alike. `None` when it names none.
    variables: Option<String>,
    root_id: EntityId,
    optimistic: bool,
}

impl QueryFingerprint {
    pub(crate) fn new(query: &Query, default_root: &EntityId, optimistic: bool) -> Self {
        let document = &query.document;
        let names = document.variable_names();
        let variables = (!names.is_empty()).then(|| {
            let bound: Map<String, Value> = query
                .variables
                .iter()
                .filter(|(name, _)| names.contains(name.as_str()))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();
            Value::Object(bound).to_string()
        });
        QueryFingerprint {
            signature: document.signature(),
            variables,
            root_id: query.root_id.clone().unwrap_or_else(|| default_root.clone()),
            optimistic,
        }
    }

    pub fn is_optimistic(&self) -> bool {
        self.optimistic
    }
}

/// A memoized read. Cloning shares the result.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedRead {
    pub result: Arc<Value>,
    pub complete: bool,
    pub missing: Arc<[MissingField]>,
    pub dependencies: Arc<BTreeSet<EntityId>>,
}

impl From<ReadOutcome> for CachedRead {
    fn from(outcome: ReadOutcome) -> Self {
        CachedRead {
            result: Arc::new(outcome.result),
            complete: outcome.complete,
            missing: outcome.missing.into(),
            dependencies: Arc::new(outcome.dependencies),
        }
    }
}

impl CachedRead {
    pub fn depends_on_any(&self, ids: &BTreeSet<EntityId>) -> bool {
        let (small, large) = if ids.len() < self.dependencies.len() {
            (ids, &*self.dependencies)
        } else {
            (&*self.dependencies, ids)
        };
        small.iter().any(|id| large.contains(id))
    }
}

/// Carry-forward memo of reads keyed by fingerprint.
///
/// Entries survive every write that leaves their dependencies alone and are
/// dropped by the first write that touches one of them.
#[derive(Debug, Clone, Default)]
pub struct ReadCache {
    entries: HashMap<QueryFingerprint, CachedRead>,
}

impl ReadCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, fingerprint: &QueryFingerprint) -> Option<&CachedRead> {
        self.entries.get(fingerprint)
    }

    pub fn put(&mut self, fingerprint: QueryFingerprint, read: CachedRead) {
        self.entries.insert(fingerprint, read);
    }

    /// Drop the entries of one audience that depend on a changed id.
    /// Returns how many were dropped.
    pub fn on_write(&mut self, optimistic: bool, changed: &BTreeSet<EntityId>) -> usize {
        if changed.is_empty() {
            return 0;
        }
        let before = self.entries.len();
        self.entries.retain(|fingerprint, read| {
            fingerprint.optimistic != optimistic || !read.depends_on_any(changed)
        });
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
