use std::collections::BTreeSet;

use serde_json::Value;
use tracing::trace;

use crate::config::CacheConfig;
use crate::error::Result;
use crate::gc::{self, EvictSelector};
use crate::graph::{ChangeSet, EntityId, GraphEditor, GraphSnapshot, NodeSnapshot, NodeSource};
use crate::read::{read_query, ReadOutcome};
use crate::selection::Query;
use crate::write::write_query;

/// A scoped read/write handle over an in-flight edit.
///
/// Nothing a transaction does is visible outside it until the store commits
/// it. Reads see the transaction's own writes and are never memoized.
pub struct Transaction<'a> {
    editor: GraphEditor,
    config: &'a CacheConfig,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(base: GraphSnapshot, config: &'a CacheConfig) -> Self {
        Transaction {
            editor: GraphEditor::new(base),
            config,
        }
    }

    /// Write a query result. A failed write leaves the transaction as it
    /// was before the call.
    pub fn write(&mut self, query: &Query, data: &Value) -> Result<()> {
        let checkpoint = self.editor.clone();
        let written = write_query(&mut self.editor, self.config, query, data);
        if written.is_err() {
            self.editor = checkpoint;
        }
        written
    }

    pub fn read(&self, query: &Query) -> Result<ReadOutcome> {
        read_query(&self.editor, self.config, query)
    }

    pub fn evict(&mut self, selector: &EvictSelector) -> bool {
        gc::evict(&mut self.editor, selector)
    }

    pub fn node(&self, id: &str) -> Option<&NodeSnapshot> {
        self.editor.node(id)
    }

    pub fn root_id(&self) -> &EntityId {
        self.editor.root_id()
    }

    pub fn config(&self) -> &CacheConfig {
        self.config
    }

    /// Commit without running entity updaters.
    pub(crate) fn commit(self) -> (GraphSnapshot, ChangeSet) {
        self.editor.commit()
    }

    /// Run entity updaters until they stop producing new work, then commit.
    ///
    /// Every changed or orphaned node whose type has an updater gets one
    /// call. The root gets one call whenever anything changed. Writes made
    /// by updaters can wake further updaters, but no id is visited twice.
    pub(crate) fn finish(mut self) -> Result<(GraphSnapshot, ChangeSet)> {
        let config = self.config;
        let mut visited: BTreeSet<EntityId> = BTreeSet::new();

        loop {
            let changes = self.editor.changes();
            if changes.is_empty() {
                break;
            }

            let mut candidates: BTreeSet<EntityId> = changes.changed.clone();
            candidates.extend(changes.orphaned.keys().cloned());
            candidates.insert(self.editor.root_id().clone());
            candidates.retain(|id| !visited.contains(id));

            let mut fired = false;
            for id in candidates {
                visited.insert(id.clone());
                let base = self.editor.base().get(&id).cloned();
                let current = self.editor.node(&id);
                let typename = current
                    .and_then(NodeSnapshot::typename)
                    .or_else(|| base.as_deref().and_then(NodeSnapshot::typename));
                let Some(updater) = typename.and_then(|typename| config.updater(typename)) else {
                    continue;
                };

                let gone = changes.orphaned.contains_key(&id) || current.is_none();
                let next = if gone { None } else { current.map(|node| node.data().clone()) };
                let previous = base.map(|node| node.data().clone());
                trace!(id = %id, "transaction.updater");
                updater(&mut self, next.as_ref(), previous.as_ref())?;
                fired = true;
            }

            if !fired {
                break;
            }
        }

        Ok(self.editor.commit())
    }
}
