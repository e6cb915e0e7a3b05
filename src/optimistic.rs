use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::config::CacheConfig;
use crate::error::Result;
use crate::graph::{ChangeSet, GraphSnapshot};
use crate::transaction::Transaction;

/// Caller-chosen name of an optimistic layer.
pub type ChangeId = String;

pub(crate) type LayerFn = Arc<dyn Fn(&mut Transaction<'_>) -> Result<()> + Send + Sync>;

/// A recorded speculative transaction that can be replayed on any base.
#[derive(Clone)]
pub struct OptimisticLayer {
    change_id: ChangeId,
    apply: LayerFn,
}

impl OptimisticLayer {
    pub(crate) fn new(change_id: impl Into<ChangeId>, apply: LayerFn) -> Self {
        OptimisticLayer {
            change_id: change_id.into(),
            apply,
        }
    }

    pub fn change_id(&self) -> &str {
        &self.change_id
    }

    /// Replay the layer on top of `base`, entity updaters included.
    pub(crate) fn apply(&self, base: &GraphSnapshot, config: &CacheConfig) -> Result<(GraphSnapshot, ChangeSet)> {
        let mut tx = Transaction::new(base.clone(), config);
        (self.apply)(&mut tx)?;
        tx.finish()
    }
}

impl fmt::Debug for OptimisticLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimisticLayer")
            .field("change_id", &self.change_id)
            .finish_non_exhaustive()
    }
}

/// Layers in recording order.
#[derive(Debug, Clone, Default)]
pub struct OptimisticStack {
    layers: Vec<OptimisticLayer>,
}

impl OptimisticStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, layer: OptimisticLayer) {
        self.layers.push(layer);
    }

    /// Remove every layer recorded under `change_id`.
    pub(crate) fn remove(&mut self, change_id: &str) -> bool {
        let before = self.layers.len();
        self.layers.retain(|layer| layer.change_id != change_id);
        self.layers.len() != before
    }

    pub fn change_ids(&self) -> Vec<&str> {
        self.layers.iter().map(OptimisticLayer::change_id).collect()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Replay every layer, in order, on top of `baseline`.
    ///
    /// A layer that fails on the new base is skipped for this composition
    /// and stays recorded; it is retried on the next replay.
    pub(crate) fn compose(&self, baseline: &GraphSnapshot, config: &CacheConfig) -> GraphSnapshot {
        self.layers.iter().fold(baseline.clone(), |composed, layer| {
            match layer.apply(&composed, config) {
                Ok((next, _)) => next,
                Err(error) => {
                    warn!(change_id = %layer.change_id, %error, "optimistic.replay.layer_skipped");
                    composed
                }
            }
        })
    }
}
