//! Exporting and importing the graph.
//!
//! [`extract`] turns a snapshot into a [`CacheImage`] keyed by id and
//! [`restore`] rebuilds an edge-consistent snapshot from one. Images can be
//! encoded to bytes and kept in an [`ImageStore`].

mod codec;
mod image;
mod in_memory;
mod store;

pub use codec::{decode_image, encode_image};
pub use image::{extract, restore, CacheImage, SerializedNode};
pub use in_memory::InMemoryImageStore;
pub use store::{ImageRecord, ImageStore};
