//! In-memory key/value storage shared by every `kv` session.
//!
//! Sessions may run on different threads (threaded strategy or several
//! reactive workers), so all access goes through a `RwLock`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Result of a storage operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageResult {
    Stored,
    Deleted,
    NotFound,
}

/// Thread-safe in-memory store
#[derive(Debug, Default)]
pub struct Storage {
    data: RwLock<HashMap<String, String>>,
}

impl Storage {
    /// Create a new storage instance
    pub fn new() -> Arc<Self> {
        info!("Initializing storage");
        Arc::new(Self::default())
    }

    /// Get a copy of the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<String> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        data.get(key).cloned()
    }

    /// Store `value` under `key`, replacing any previous value.
    pub fn set(&self, key: &str, value: &str) -> StorageResult {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        data.insert(key.to_string(), value.to_string());
        StorageResult::Stored
    }

    pub fn delete(&self, key: &str) -> StorageResult {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        match data.remove(key) {
            Some(_) => StorageResult::Deleted,
            None => StorageResult::NotFound,
        }
    }

    /// Remove every item.
    pub fn flush_all(&self) {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        let count = data.len();
        data.clear();
        debug!(count, "Flushed all items");
    }

    /// Number of stored items.
    pub fn len(&self) -> usize {
        self.data.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
