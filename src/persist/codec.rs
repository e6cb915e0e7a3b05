use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};
use crate::graph::{Edge, EntityId, FieldPath, NodeKind, PathSegment};

use super::image::{CacheImage, SerializedNode};

// Binary layout of an image. Node data is kept as JSON text because the
// binary format cannot carry self-describing values.

#[derive(Serialize, Deserialize)]
enum PackedSegment {
    Key(String),
    Index(u64),
}

#[derive(Serialize, Deserialize)]
struct PackedEdge {
    id: String,
    path: Vec<PackedSegment>,
}

#[derive(Serialize, Deserialize)]
struct PackedNode {
    id: String,
    kind: u8,
    typename: Option<String>,
    data: String,
    inbound: Option<Vec<PackedEdge>>,
    outbound: Option<Vec<PackedEdge>>,
}

#[derive(Serialize, Deserialize)]
struct PackedImage {
    nodes: Vec<PackedNode>,
}

fn pack_edges(edges: &Option<Vec<Edge>>) -> Option<Vec<PackedEdge>> {
    edges.as_ref().map(|edges| {
        edges
            .iter()
            .map(|edge| PackedEdge {
                id: edge.id.to_string(),
                path: edge
                    .path
                    .segments()
                    .iter()
                    .map(|segment| match segment {
                        PathSegment::Key(key) => PackedSegment::Key(key.clone()),
                        PathSegment::Index(index) => PackedSegment::Index(*index as u64),
                    })
                    .collect(),
            })
            .collect()
    })
}

fn unpack_edges(edges: Option<Vec<PackedEdge>>) -> Result<Option<Vec<Edge>>> {
    let Some(edges) = edges else {
        return Ok(None);
    };
    let mut unpacked = Vec::with_capacity(edges.len());
    for edge in edges {
        let mut path = Vec::with_capacity(edge.path.len());
        for segment in edge.path {
            path.push(match segment {
                PackedSegment::Key(key) => PathSegment::Key(key),
                PackedSegment::Index(index) => PathSegment::Index(
                    usize::try_from(index).map_err(|e| CacheError::Codec(format!("path index: {e}")))?,
                ),
            });
        }
        unpacked.push(Edge::new(EntityId::from(edge.id), FieldPath::from(path)));
    }
    Ok(Some(unpacked))
}

/// Encode an image to bytes.
pub fn encode_image(image: &CacheImage) -> Result<Vec<u8>> {
    let mut nodes = Vec::with_capacity(image.len());
    for (id, node) in image {
        let data = serde_json::to_string(&node.data)
            .map_err(|e| CacheError::Codec(format!("node data: {e}")))?;
        nodes.push(PackedNode {
            id: id.to_string(),
            kind: node.kind.into(),
            typename: node.typename.clone(),
            data,
            inbound: pack_edges(&node.inbound),
            outbound: pack_edges(&node.outbound),
        });
    }
    bitcode::serialize(&PackedImage { nodes }).map_err(|e| CacheError::Codec(format!("image serialize: {e}")))
}

/// Decode bytes produced by [`encode_image`].
pub fn decode_image(bytes: &[u8]) -> Result<CacheImage> {
    let packed: PackedImage =
        bitcode::deserialize(bytes).map_err(|e| CacheError::Codec(format!("image deserialize: {e}")))?;

    let mut image = CacheImage::new();
    for node in packed.nodes {
        let kind = NodeKind::try_from(node.kind).map_err(CacheError::Codec)?;
        let data = serde_json::from_str(&node.data)
            .map_err(|e| CacheError::Codec(format!("node data: {e}")))?;
        image.insert(
            EntityId::from(node.id),
            SerializedNode {
                kind,
                typename: node.typename,
                data,
                inbound: unpack_edges(node.inbound)?,
                outbound: unpack_edges(node.outbound)?,
            },
        );
    }
    Ok(image)
}
