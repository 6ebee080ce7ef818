//! Concurrent record cache keyed by `(type, path)`
//!
//! The cache holds the baseline reference for every record. Records are
//! only removed by `clear` during full teardown; a normal unload leaves
//! the entry in place so retries and reloads find the same record.

use crate::record::{AssetKey, AssetRecord, TypeTag};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Concurrent map from asset identity to its record
#[derive(Default)]
pub struct AssetCache {
    records: RwLock<HashMap<AssetKey, Arc<AssetRecord>>>,
}

impl AssetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the existing record or atomically insert a fresh unloaded
    /// one
    pub fn get_or_create(&self, tag: TypeTag, path: &str) -> Arc<AssetRecord> {
        {
            let records = self.records.read();
            if let Some(record) = records.get(&AssetKey::new(tag, path)) {
                return Arc::clone(record);
            }
        }

        let mut records = self.records.write();
        // Racing creators resolve to whichever entry landed first
        let path: Arc<str> = Arc::from(path);
        Arc::clone(
            records
                .entry(AssetKey::new(tag, Arc::clone(&path)))
                .or_insert_with(|| AssetRecord::new(tag, path)),
        )
    }

    pub fn get(&self, tag: TypeTag, path: &str) -> Option<Arc<AssetRecord>> {
        self.records.read().get(&AssetKey::new(tag, path)).cloned()
    }

    pub fn contains(&self, tag: TypeTag, path: &str) -> bool {
        self.records.read().contains_key(&AssetKey::new(tag, path))
    }

    /// All records at this instant, in unspecified order
    pub fn snapshot(&self) -> Vec<Arc<AssetRecord>> {
        self.records.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Drop every entry; only used at teardown
    pub fn clear(&self) {
        self.records.write().clear();
    }
}
