use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{check_size, SnapshotStore, StoreError, MAX_SNAPSHOT_BYTES};

/// In-process store, used by tests and dry runs.
#[derive(Debug)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    max_bytes: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_limit(MAX_SNAPSHOT_BYTES)
    }

    pub fn with_limit(max_bytes: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_bytes,
        }
    }

    /// Write raw bytes, bypassing the size limit.
    pub fn insert_raw(&self, key: &str, bytes: &[u8]) {
        self.entries.lock().insert(key.to_string(), bytes.to_vec());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        check_size(key, bytes.len(), self.max_bytes)?;
        self.entries.lock().insert(key.to_string(), bytes);
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
