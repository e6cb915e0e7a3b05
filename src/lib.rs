//! A normalized object-graph cache for nested, parameterized queries.
//!
//! Query results are written against a selection tree and decomposed into
//! individually addressable nodes linked by reference edges. Reads rebuild
//! results (or partial results) from the graph, report what they depended
//! on, and are memoized until a write touches one of those dependencies.
//! Speculative writes can be stacked as optimistic layers and removed out of
//! order; watches are re-diffed and notified after every change.
//!
//! ```
//! use serde_json::json;
//! use sourced_cache::{Document, Field, Query, ReadOptions, SelectionSet, Store};
//!
//! let mut store = Store::default();
//! let query = Query::new(Document::new(SelectionSet::new().field(
//!     Field::new("me").select(SelectionSet::new().fields(["__typename", "id", "name"])),
//! )));
//! let data = json!({"me": {"__typename": "User", "id": 1, "name": "Ada"}});
//!
//! store.write(&query, &data).unwrap();
//! let read = store.read(&query, ReadOptions::default()).unwrap();
//! assert_eq!(read.data(), Some(&data));
//! ```

mod config;
mod error;
mod gc;
mod graph;
mod optimistic;
mod persist;
mod read;
mod selection;
mod store;
mod transaction;
mod write;

pub use config::{
    default_entity_id, CacheConfig, EntityIdFn, EntityUpdater, ListPolicy, RedirectFn, DEFAULT_ROOT_ID,
    DEFAULT_ROOT_TYPENAME,
};
pub use error::{CacheError, Result};
pub use gc::{reachable, unreachable, EvictSelector, RetainCounts};
pub use graph::{
    as_reference, reference, ChangeSet, Edge, EdgeViolation, EntityId, FieldPath, GraphSnapshot, NodeKind,
    NodeSnapshot, NodeSource, PathSegment, REFERENCE_KEY,
};
pub use optimistic::{ChangeId, OptimisticLayer, OptimisticStack};
pub use persist::{
    decode_image, encode_image, extract, restore, CacheImage, ImageRecord, ImageStore, InMemoryImageStore,
    SerializedNode,
};
pub use read::{CachedRead, MissingField, QueryFingerprint, ReadCache, ReadOptions, ReadOutcome, ReadResult};
pub use selection::{
    is_static, ArgValue, Directive, Document, Field, Fragment, FragmentLookup, FragmentMap, FragmentSpread,
    InlineFragment, Query, Selection, SelectionSet, Variables, STATIC_DIRECTIVE,
};
pub use store::{
    BatchOptions, CacheSnapshot, Store, WatchCallback, WatchId, WatchOptions, WatchUpdatedFn, WriteOptions,
};
pub use transaction::Transaction;
