//! The top-level cache: baseline, optimistic layers, read memo and watches.
//!
//! A [`Store`] owns the current baseline snapshot and the snapshot composed
//! from it and every recorded optimistic layer. Every operation that changes
//! either builds a complete new snapshot and swaps it in; snapshots handed
//! out earlier stay valid and frozen.

mod watch;

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::config::CacheConfig;
use crate::error::Result;
use crate::gc::{self, EvictSelector, RetainCounts};
use crate::graph::{ChangeSet, EntityId, GraphEditor, GraphSnapshot};
use crate::optimistic::{ChangeId, OptimisticLayer, OptimisticStack};
use crate::persist::{self, CacheImage, ImageRecord, ImageStore};
use crate::read::{read_query, CachedRead, QueryFingerprint, ReadCache, ReadOptions, ReadResult};
use crate::selection::Query;
use crate::transaction::Transaction;

pub use watch::{WatchCallback, WatchId, WatchOptions};
use watch::WatchRegistry;

/// Options for [`Store::write_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// Notify watches after the write. When false the store stays pending
    /// and the next broadcast or batch delivers the change.
    pub broadcast: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions { broadcast: true }
    }
}

pub type WatchUpdatedFn = Box<dyn FnMut(WatchId, &ReadResult)>;

/// Options for [`Store::batch`].
#[derive(Default)]
pub struct BatchOptions {
    /// Record the update as an optimistic layer under this id instead of
    /// committing it to the baseline.
    pub optimistic: Option<ChangeId>,
    /// Called for every watch the batch affected, in place of the watch's
    /// own callback.
    pub on_watch_updated: Option<WatchUpdatedFn>,
}

impl BatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn optimistic(mut self, change_id: impl Into<ChangeId>) -> Self {
        self.optimistic = Some(change_id.into());
        self
    }

    pub fn on_watch_updated<F>(mut self, callback: F) -> Self
    where
        F: FnMut(WatchId, &ReadResult) + 'static,
    {
        self.on_watch_updated = Some(Box::new(callback));
        self
    }
}

/// A read-only view of the store at one instant.
#[derive(Debug, Clone)]
pub struct CacheSnapshot {
    pub baseline: GraphSnapshot,
    pub optimistic: GraphSnapshot,
    pub layers: OptimisticStack,
    pub read_cache: ReadCache,
}

pub struct Store {
    config: Arc<CacheConfig>,
    baseline: GraphSnapshot,
    optimistic: GraphSnapshot,
    layers: OptimisticStack,
    read_cache: ReadCache,
    watches: WatchRegistry,
    retained: RetainCounts,
    pending_broadcast: bool,
}

impl Default for Store {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

/// Serve a read from the memo, or traverse and remember the result.
fn memo_read(
    config: &CacheConfig,
    snapshot: &GraphSnapshot,
    cache: &mut ReadCache,
    query: &Query,
    optimistic: bool,
) -> Result<CachedRead> {
    let fingerprint = QueryFingerprint::new(query, snapshot.root_id(), optimistic);
    if let Some(cached) = cache.get(&fingerprint) {
        trace!(optimistic, "store.read.memo_hit");
        return Ok(cached.clone());
    }
    trace!(optimistic, "store.read.memo_miss");
    let read = CachedRead::from(read_query(snapshot, config, query)?);
    cache.put(fingerprint, read.clone());
    Ok(read)
}

impl Store {
    pub fn new(config: CacheConfig) -> Self {
        let baseline = GraphSnapshot::empty(config.root_id.clone());
        Store {
            config: Arc::new(config),
            optimistic: baseline.clone(),
            baseline,
            layers: OptimisticStack::new(),
            read_cache: ReadCache::new(),
            watches: WatchRegistry::default(),
            retained: RetainCounts::new(),
            pending_broadcast: false,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The snapshot without any optimistic layer.
    pub fn baseline(&self) -> &GraphSnapshot {
        &self.baseline
    }

    /// The baseline with every optimistic layer replayed on top.
    pub fn composed(&self) -> &GraphSnapshot {
        &self.optimistic
    }

    pub fn layers(&self) -> &OptimisticStack {
        &self.layers
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            baseline: self.baseline.clone(),
            optimistic: self.optimistic.clone(),
            layers: self.layers.clone(),
            read_cache: self.read_cache.clone(),
        }
    }

    fn audience(&self, optimistic: bool) -> &GraphSnapshot {
        if optimistic {
            &self.optimistic
        } else {
            &self.baseline
        }
    }

    /// Read a query. Unless `one_off` is set the result is memoized and
    /// later reads of the same query are served from the memo until a write
    /// touches one of its dependencies.
    pub fn read(&mut self, query: &Query, options: ReadOptions) -> Result<ReadResult> {
        let snapshot = if options.optimistic {
            &self.optimistic
        } else {
            &self.baseline
        };
        let read = if options.one_off {
            CachedRead::from(read_query(snapshot, &self.config, query)?)
        } else {
            memo_read(&self.config, snapshot, &mut self.read_cache, query, options.optimistic)?
        };
        Ok(ReadResult::from_cached(&read, options.return_partial))
    }

    pub fn write(&mut self, query: &Query, data: &Value) -> Result<ChangeSet> {
        self.write_with(query, data, WriteOptions::default())
    }

    pub fn write_with(&mut self, query: &Query, data: &Value, options: WriteOptions) -> Result<ChangeSet> {
        self.run_transaction(|tx| tx.write(query, data), options.broadcast)
    }

    /// Run `update` against the baseline and commit it as one write. An
    /// error from `update` or from an entity updater commits nothing.
    pub fn transaction<F>(&mut self, update: F) -> Result<ChangeSet>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<()>,
    {
        self.run_transaction(update, true)
    }

    fn run_transaction<F>(&mut self, update: F, broadcast: bool) -> Result<ChangeSet>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<()>,
    {
        let config = self.config.clone();
        let mut tx = Transaction::new(self.baseline.clone(), &config);
        update(&mut tx)?;
        let (baseline, changes) = tx.finish()?;
        self.commit_baseline(baseline, &changes);

        if broadcast {
            self.broadcast_watches(None);
        } else if !changes.is_empty() {
            self.pending_broadcast = true;
        }
        Ok(changes)
    }

    fn commit_baseline(&mut self, baseline: GraphSnapshot, changes: &ChangeSet) {
        if changes.is_empty() {
            return;
        }
        debug!(
            changed = changes.changed.len(),
            added = changes.added.len(),
            removed = changes.removed.len(),
            orphaned = changes.orphaned.len(),
            "store.baseline.commit"
        );
        self.read_cache.on_write(false, &changes.data_changed);
        self.baseline = baseline;
        self.recompose();
    }

    /// Rebuild the composed snapshot from the baseline and every layer.
    fn recompose(&mut self) {
        let composed = self.layers.compose(&self.baseline, &self.config);
        let changed = self.optimistic.data_changes(&composed);
        self.read_cache.on_write(true, &changed);
        self.optimistic = composed;
    }

    /// Record a speculative transaction under `change_id`. The layer is
    /// applied to the composed snapshot now and replayed whenever the
    /// baseline or the layer stack changes. A failing `apply` is not
    /// recorded.
    pub fn record_optimistic<F>(&mut self, change_id: impl Into<ChangeId>, apply: F) -> Result<ChangeSet>
    where
        F: Fn(&mut Transaction<'_>) -> Result<()> + Send + Sync + 'static,
    {
        let changes = self.push_layer(change_id.into(), Arc::new(apply))?;
        self.broadcast_watches(None);
        Ok(changes)
    }

    fn push_layer(
        &mut self,
        change_id: ChangeId,
        apply: Arc<dyn Fn(&mut Transaction<'_>) -> Result<()> + Send + Sync>,
    ) -> Result<ChangeSet> {
        let layer = OptimisticLayer::new(change_id, apply);
        let (composed, changes) = layer.apply(&self.optimistic, &self.config)?;
        debug!(
            change_id = layer.change_id(),
            changed = changes.changed.len(),
            "store.optimistic.record"
        );
        self.layers.push(layer);
        self.read_cache.on_write(true, &changes.data_changed);
        self.optimistic = composed;
        Ok(changes)
    }

    /// Drop every layer recorded under `change_id` and replay the rest on
    /// the baseline.
    pub fn remove_optimistic(&mut self, change_id: &str) -> bool {
        if !self.layers.remove(change_id) {
            return false;
        }
        debug!(change_id, remaining = self.layers.len(), "store.optimistic.remove");
        self.recompose();
        self.broadcast_watches(None);
        true
    }

    /// Register a watch. Its current result becomes the reference later
    /// broadcasts compare against; with `immediate` it is also delivered
    /// right away.
    pub fn watch(&mut self, options: WatchOptions) -> Result<WatchId> {
        let Store {
            config,
            baseline,
            optimistic,
            read_cache,
            watches,
            ..
        } = self;
        let snapshot = if options.optimistic { &*optimistic } else { &*baseline };
        let read = memo_read(config, snapshot, read_cache, &options.query, options.optimistic)?;
        let current = ReadResult::from_cached(&read, options.return_partial);

        let immediate = options.immediate;
        let id = watches.register(options);
        if let Some(watch) = watches.get_mut(id) {
            watch.observe(&current);
            if immediate {
                (watch.options.callback)(&current);
            }
        }
        Ok(id)
    }

    pub fn unwatch(&mut self, id: WatchId) -> bool {
        self.watches.remove(id)
    }

    /// Run `update` with broadcasts held back, then notify once.
    ///
    /// Changes left pending by earlier writes are delivered first, through
    /// the watches' own callbacks. With `optimistic` set the update is
    /// recorded as a layer; otherwise it is committed to the baseline.
    /// Returns the watches the batch notified.
    pub fn batch<F>(&mut self, options: BatchOptions, update: F) -> Result<Vec<WatchId>>
    where
        F: Fn(&mut Transaction<'_>) -> Result<()> + Send + Sync + 'static,
    {
        if self.pending_broadcast {
            self.broadcast_watches(None);
        }

        let BatchOptions {
            optimistic,
            mut on_watch_updated,
        } = options;
        match optimistic {
            Some(change_id) => {
                self.push_layer(change_id, Arc::new(update))?;
            }
            None => {
                self.run_transaction(update, false)?;
            }
        }

        let notify = on_watch_updated
            .as_mut()
            .map(|callback| callback.as_mut() as &mut dyn FnMut(WatchId, &ReadResult));
        Ok(self.broadcast_watches(notify))
    }

    /// Re-read every watch against its audience and notify the ones whose
    /// result changed. Returns the notified watches.
    pub fn broadcast(&mut self) -> Vec<WatchId> {
        self.broadcast_watches(None)
    }

    fn broadcast_watches(&mut self, mut notify: Option<&mut dyn FnMut(WatchId, &ReadResult)>) -> Vec<WatchId> {
        self.pending_broadcast = false;
        let Store {
            config,
            baseline,
            optimistic,
            read_cache,
            watches,
            ..
        } = self;

        let mut notified = Vec::new();
        for (id, watch) in watches.iter_mut() {
            let audience = watch.options.optimistic;
            let snapshot = if audience { &*optimistic } else { &*baseline };
            let read = match memo_read(config, snapshot, read_cache, &watch.options.query, audience) {
                Ok(read) => read,
                Err(error) => {
                    warn!(watch = %id, %error, "store.broadcast.read_failed");
                    continue;
                }
            };
            let current = ReadResult::from_cached(&read, watch.options.return_partial);
            if !watch.observe(&current) {
                continue;
            }
            match notify.as_deref_mut() {
                Some(notify) => notify(*id, &current),
                None => (watch.options.callback)(&current),
            }
            notified.push(*id);
        }

        debug!(watches = watches.len(), notified = notified.len(), "store.broadcast");
        notified
    }

    /// Remove every baseline node that is neither reachable from the root
    /// nor retained. Never notifies watches.
    pub fn gc(&mut self) -> Vec<EntityId> {
        let unreachable = gc::unreachable(&self.baseline, &self.retained);
        if unreachable.is_empty() {
            return Vec::new();
        }

        let mut editor = GraphEditor::new(self.baseline.clone());
        for id in &unreachable {
            editor.remove_node(id);
        }
        let (baseline, changes) = editor.commit();
        debug!(removed = unreachable.len(), "store.gc");
        self.read_cache.on_write(false, &changes.data_changed);
        self.baseline = baseline;
        self.recompose();
        unreachable.into_iter().collect()
    }

    /// Remove a node or one field of it from the baseline right away.
    /// Returns false when there was nothing to remove.
    pub fn evict(&mut self, selector: &EvictSelector) -> bool {
        let config = self.config.clone();
        let mut tx = Transaction::new(self.baseline.clone(), &config);
        if !tx.evict(selector) {
            return false;
        }
        let (baseline, changes) = tx.commit();
        self.commit_baseline(baseline, &changes);
        self.broadcast_watches(None);
        true
    }

    pub fn retain(&mut self, id: impl Into<EntityId>) -> usize {
        self.retained.retain(&id.into())
    }

    pub fn release(&mut self, id: &str) -> usize {
        self.retained.release(id)
    }

    /// Ids a `gc` would remove right now.
    pub fn unreachable(&self) -> BTreeSet<EntityId> {
        gc::unreachable(&self.baseline, &self.retained)
    }

    pub fn extract(&self, optimistic: bool) -> CacheImage {
        persist::extract(self.audience(optimistic))
    }

    /// Replace the baseline with `image`. Recorded layers are kept and
    /// replayed on the restored baseline.
    pub fn restore(&mut self, image: &CacheImage) {
        self.baseline = persist::restore(self.config.root_id.clone(), image);
        self.read_cache.clear();
        self.optimistic = self.layers.compose(&self.baseline, &self.config);
        debug!(nodes = self.baseline.len(), "store.restore");
        self.broadcast_watches(None);
    }

    pub fn save_image(&self, store: &dyn ImageStore, key: &str) -> Result<()> {
        store.save_image(ImageRecord::encode(key, &self.extract(false))?)
    }

    /// Restore from the image saved under `key`. Returns false when there
    /// is none; a record whose node count disagrees with its bytes fails
    /// and leaves the store untouched.
    pub fn load_image(&mut self, store: &dyn ImageStore, key: &str) -> Result<bool> {
        let Some(record) = store.get_image(key)? else {
            return Ok(false);
        };
        let image = record.decode()?;
        self.restore(&image);
        Ok(true)
    }
}
