use crate::error::{CacheError, Result};

use super::codec::{decode_image, encode_image};
use super::image::CacheImage;

/// A stored cache image: a key, the number of nodes at save time, and the
/// encoded bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageRecord {
    pub key: String,
    pub node_count: usize,
    pub data: Vec<u8>,
}

impl ImageRecord {
    /// Encode `image` for storage under `key`.
    pub fn encode(key: impl Into<String>, image: &CacheImage) -> Result<Self> {
        Ok(ImageRecord {
            key: key.into(),
            node_count: image.len(),
            data: encode_image(image)?,
        })
    }

    /// Decode the stored bytes. The image must hold as many nodes as were
    /// recorded at save time.
    pub fn decode(&self) -> Result<CacheImage> {
        let image = decode_image(&self.data)?;
        if image.len() != self.node_count {
            return Err(CacheError::Codec(format!(
                "image `{}` holds {} nodes, {} were saved",
                self.key,
                image.len(),
                self.node_count
            )));
        }
        Ok(image)
    }
}

/// Persistence for encoded cache images. One image per key (latest wins).
pub trait ImageStore: Send + Sync {
    /// Load the latest image saved under `key`.
    fn get_image(&self, key: &str) -> Result<Option<ImageRecord>>;

    /// Save (or overwrite) the image for `record.key`.
    fn save_image(&self, record: ImageRecord) -> Result<()>;

    /// Delete the image for `key`. Returns true if one existed.
    fn delete_image(&self, key: &str) -> Result<bool>;
}
