use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{CacheError, Result};

use super::store::{ImageRecord, ImageStore};

/// Images kept in process memory, ordered by key. Cloning shares them.
#[derive(Clone, Default)]
pub struct InMemoryImageStore {
    images: Arc<RwLock<BTreeMap<String, ImageRecord>>>,
}

impl InMemoryImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys that currently hold an image, in order.
    pub fn keys(&self) -> Result<Vec<String>> {
        Ok(self.images()?.keys().cloned().collect())
    }

    fn images(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, ImageRecord>>> {
        self.images
            .read()
            .map_err(|_| CacheError::Storage("image read lock poisoned".into()))
    }

    fn images_mut(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<String, ImageRecord>>> {
        self.images
            .write()
            .map_err(|_| CacheError::Storage("image write lock poisoned".into()))
    }
}

impl ImageStore for InMemoryImageStore {
    fn get_image(&self, key: &str) -> Result<Option<ImageRecord>> {
        Ok(self.images()?.get(key).cloned())
    }

    fn save_image(&self, record: ImageRecord) -> Result<()> {
        self.images_mut()?.insert(record.key.clone(), record);
        Ok(())
    }

    fn delete_image(&self, key: &str) -> Result<bool> {
        Ok(self.images_mut()?.remove(key).is_some())
    }
}
