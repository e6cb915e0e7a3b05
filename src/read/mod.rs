//! Reading: reconstructing query results from the graph, and the memo
//! that carries results forward across unrelated writes.

mod memo;
mod reader;

use std::sync::Arc;

use serde_json::Value;

pub use memo::{CachedRead, QueryFingerprint, ReadCache};
pub(crate) use reader::read_query;
pub use reader::{MissingField, ReadOutcome};

/// Options for [`crate::Store::read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadOptions {
    /// Read the composed snapshot instead of the baseline.
    pub optimistic: bool,
    /// Return whatever resolved even when fields are missing.
    pub return_partial: bool,
    /// Skip the memo entirely.
    pub one_off: bool,
}

impl ReadOptions {
    pub fn optimistic() -> Self {
        ReadOptions {
            optimistic: true,
            ..Self::default()
        }
    }

    pub fn with_optimistic(mut self, optimistic: bool) -> Self {
        self.optimistic = optimistic;
        self
    }

    pub fn partial(mut self) -> Self {
        self.return_partial = true;
        self
    }

    pub fn one_off(mut self) -> Self {
        self.one_off = true;
        self
    }
}

/// What a store read or a watch delivers.
///
/// `result` is `None` when the read is incomplete and partial data was not
/// requested.
#[derive(Debug, Clone)]
pub struct ReadResult {
    pub result: Option<Arc<Value>>,
    pub complete: bool,
    pub missing: Arc<[MissingField]>,
}

impl ReadResult {
    pub(crate) fn from_cached(read: &CachedRead, return_partial: bool) -> Self {
        ReadResult {
            result: (read.complete || return_partial).then(|| read.result.clone()),
            complete: read.complete,
            missing: read.missing.clone(),
        }
    }

    pub fn data(&self) -> Option<&Value> {
        self.result.as_deref()
    }
}

impl PartialEq for ReadResult {
    fn eq(&self, other: &Self) -> bool {
        let same_result = match (&self.result, &other.result) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b) || a == b,
            (None, None) => true,
            _ => false,
        };
        same_result && self.complete == other.complete && self.missing == other.missing
    }
}
