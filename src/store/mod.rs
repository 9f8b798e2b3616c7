pub mod file;
pub mod memory;
pub mod pg;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use pg::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest payload a backend accepts for one key.
pub const MAX_SNAPSHOT_BYTES: usize = 16 * 1024 * 1024;
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("payload for {key} is {size} bytes, limit is {limit}")]
    TooLarge {
        key: String,
        size: usize,
        limit: usize,
    },

    #[error("snapshot version {found} not supported (expected {expected})")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("corrupt snapshot: {0}")]
    Corrupt(String),
}

/// Key -> bytes storage for tracker snapshots. A missing key is `Ok(None)`.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError>;

    /// Backend name for logging.
    fn backend(&self) -> &'static str;
}

pub(crate) fn check_size(key: &str, size: usize, limit: usize) -> Result<(), StoreError> {
    if size > limit {
        return Err(StoreError::TooLarge {
            key: key.to_string(),
            size,
            limit,
        });
    }
    Ok(())
}

/// Versioned envelope around every persisted payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot<T> {
    pub version: u32,
    pub updated_at: DateTime<Utc>,
    pub data: T,
}

pub fn encode_snapshot<T: Serialize>(data: &T) -> Result<Vec<u8>, StoreError> {
    let snapshot = Snapshot {
        version: SNAPSHOT_VERSION,
        updated_at: Utc::now(),
        data,
    };
    Ok(serde_json::to_vec(&snapshot)?)
}

pub fn decode_snapshot<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    let snapshot: Snapshot<T> = serde_json::from_slice(bytes)?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(StoreError::VersionMismatch {
            found: snapshot.version,
            expected: SNAPSHOT_VERSION,
        });
    }
    Ok(snapshot.data)
}

/// Tracker state that survives restarts.
pub trait Persistable: Send + Sync {
    fn snapshot_key(&self) -> &'static str;

    fn encode(&self) -> Result<Vec<u8>, StoreError>;

    /// Merge a stored payload into the live state. Returns records merged.
    fn restore(&self, bytes: &[u8]) -> Result<usize, StoreError>;

    /// Drop the least useful state to shrink the next snapshot. Returns the
    /// number of wallets evicted.
    fn evict_for_space(&self) -> usize;
}

/// One-time startup merge. Missing or corrupt data leaves the tracker empty.
pub async fn load_into(store: &dyn SnapshotStore, tracker: &dyn Persistable) {
    let key = tracker.snapshot_key();
    match store.get(key).await {
        Ok(Some(bytes)) => match tracker.restore(&bytes) {
            Ok(merged) => {
                tracing::info!(key, merged, backend = store.backend(), "Snapshot restored");
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "Corrupt snapshot ignored, starting empty");
            }
        },
        Ok(None) => {
            tracing::info!(key, "No snapshot found, starting empty");
        }
        Err(e) => {
            tracing::warn!(key, error = %e, "Snapshot load failed, starting empty");
        }
    }
}

/// Encode and store one tracker. An oversized payload triggers one eviction
/// round and a single retry.
pub async fn save(store: &dyn SnapshotStore, tracker: &dyn Persistable) -> Result<(), StoreError> {
    let key = tracker.snapshot_key();
    match store.put(key, tracker.encode()?).await {
        Err(StoreError::TooLarge { size, limit, .. }) => {
            let evicted = tracker.evict_for_space();
            tracing::warn!(key, size, limit, evicted, "Snapshot too large, evicted and retrying");
            store.put(key, tracker.encode()?).await
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_envelope_round_trip() {
        let bytes = encode_snapshot(&vec![1u32, 2, 3]).expect("encodes");
        let value: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(value["version"], SNAPSHOT_VERSION);
        assert!(value["updated_at"].is_string());

        let data: Vec<u32> = decode_snapshot(&bytes).expect("decodes");
        assert_eq!(data, vec![1, 2, 3]);
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let bytes = br#"{"version":99,"updated_at":"2024-01-01T00:00:00Z","data":[]}"#;
        let result: Result<Vec<u32>, _> = decode_snapshot(bytes);
        assert!(matches!(result, Err(StoreError::VersionMismatch { found: 99, .. })));
    }

    #[test]
    fn test_check_size() {
        assert!(check_size("k", 10, 10).is_ok());
        assert!(matches!(check_size("k", 11, 10), Err(StoreError::TooLarge { .. })));
    }
}
