use std::collections::BTreeMap;
use std::fmt;

use crate::read::ReadResult;
use crate::selection::Query;

/// Handle of a registered watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WatchId(u64);

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watch-{}", self.0)
    }
}

pub type WatchCallback = Box<dyn FnMut(&ReadResult) + Send>;

/// A standing query and what to do when its result changes.
pub struct WatchOptions {
    pub query: Query,
    /// Observe the composed snapshot instead of the baseline.
    pub optimistic: bool,
    /// Deliver the current result as soon as the watch is registered.
    pub immediate: bool,
    pub return_partial: bool,
    pub callback: WatchCallback,
}

impl WatchOptions {
    pub fn new<F>(query: Query, callback: F) -> Self
    where
        F: FnMut(&ReadResult) + Send + 'static,
    {
        WatchOptions {
            query,
            optimistic: false,
            immediate: false,
            return_partial: false,
            callback: Box::new(callback),
        }
    }

    pub fn optimistic(mut self, optimistic: bool) -> Self {
        self.optimistic = optimistic;
        self
    }

    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    pub fn partial(mut self) -> Self {
        self.return_partial = true;
        self
    }
}

impl fmt::Debug for WatchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchOptions")
            .field("query", &self.query)
            .field("optimistic", &self.optimistic)
            .field("immediate", &self.immediate)
            .field("return_partial", &self.return_partial)
            .finish_non_exhaustive()
    }
}

pub(crate) struct Watch {
    pub(crate) options: WatchOptions,
    pub(crate) last: Option<ReadResult>,
}

impl Watch {
    /// Record `current` and report whether it differs from the last
    /// delivered result.
    pub(crate) fn observe(&mut self, current: &ReadResult) -> bool {
        if self.last.as_ref() == Some(current) {
            return false;
        }
        self.last = Some(current.clone());
        true
    }
}

#[derive(Default)]
pub(crate) struct WatchRegistry {
    next_id: u64,
    watches: BTreeMap<WatchId, Watch>,
}

impl WatchRegistry {
    pub(crate) fn register(&mut self, options: WatchOptions) -> WatchId {
        self.next_id += 1;
        let id = WatchId(self.next_id);
        self.watches.insert(id, Watch { options, last: None });
        id
    }

    pub(crate) fn remove(&mut self, id: WatchId) -> bool {
        self.watches.remove(&id).is_some()
    }

    pub(crate) fn get_mut(&mut self, id: WatchId) -> Option<&mut Watch> {
        self.watches.get_mut(&id)
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (&WatchId, &mut Watch)> {
        self.watches.iter_mut()
    }

    pub(crate) fn len(&self) -> usize {
        self.watches.len()
    }
}
