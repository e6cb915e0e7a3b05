//! The normalized graph: nodes, edges and immutable snapshots.
//!
//! A [`GraphSnapshot`] maps [`EntityId`]s to [`NodeSnapshot`]s. Every
//! reference stored in a node's payload is mirrored as an outbound edge on
//! that node and an inbound edge on the target. Snapshots are never mutated;
//! writes go through a copy-on-write editor and publish a new snapshot that
//! shares every untouched node with its predecessor.

mod editor;
mod id;
mod node;
mod snapshot;

pub use editor::ChangeSet;
pub(crate) use editor::GraphEditor;
pub(crate) use id::collect_references;
pub use id::{as_reference, reference, Edge, EntityId, FieldPath, PathSegment, REFERENCE_KEY};
pub use node::{NodeKind, NodeSnapshot};
pub(crate) use snapshot::DanglingEdges;
pub use snapshot::{EdgeViolation, GraphSnapshot, NodeSource};
