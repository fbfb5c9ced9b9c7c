//! Sled-backed store with one tree per entity family.
//!
//! Records are JSON-encoded; ordered families (audit, runs, queue) use
//! big-endian u64 keys so sled iteration order matches id order. Per-family
//! 1-based id counters live in the `counters` tree.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Storage errors surfaced to every repository.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Sled(#[from] sled::Error),
    #[error("record encoding error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("corrupt record at {0}")]
    Corrupt(String),
}

/// Shared handle over the sled database. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    db: Arc<sled::Db>,
}

impl Store {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Ephemeral store for tests: backed by a temporary sled database that is
    /// dropped with the handle.
    pub fn temp() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Open a named tree (entity family).
    pub fn tree(&self, name: &str) -> Result<sled::Tree, StoreError> {
        Ok(self.db.open_tree(name)?)
    }

    /// Next 1-based id for a family. Monotonic per family across restarts.
    pub fn next_id(&self, family: &str) -> Result<u64, StoreError> {
        let counters = self.db.open_tree("counters")?;
        let bytes = counters.update_and_fetch(family, |old| {
            let current = old.map(decode_u64).unwrap_or(0);
            Some(current.saturating_add(1).to_be_bytes().to_vec())
        })?;
        bytes
            .map(|b| decode_u64(&b))
            .ok_or_else(|| StoreError::Corrupt(format!("counters/{family}")))
    }

    /// Flush dirty buffers to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

/// Big-endian key for ordered trees.
pub fn be_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn decode_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let len = bytes.len().min(8);
    buf[8 - len..].copy_from_slice(&bytes[..len]);
    u64::from_be_bytes(buf)
}

/// Insert a JSON-encoded record.
pub fn put_json<T: Serialize>(
    tree: &sled::Tree,
    key: impl AsRef<[u8]>,
    value: &T,
) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec(value)?;
    tree.insert(key.as_ref(), bytes)?;
    Ok(())
}

/// Fetch and decode a JSON record.
pub fn get_json<T: DeserializeOwned>(
    tree: &sled::Tree,
    key: impl AsRef<[u8]>,
) -> Result<Option<T>, StoreError> {
    match tree.get(key.as_ref())? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Decode every record under a key prefix, in key order.
pub fn scan_json<T: DeserializeOwned>(
    tree: &sled::Tree,
    prefix: impl AsRef<[u8]>,
) -> Result<Vec<T>, StoreError> {
    let mut out = Vec::new();
    for entry in tree.scan_prefix(prefix.as_ref()) {
        let (_, bytes) = entry?;
        out.push(serde_json::from_slice(&bytes)?);
    }
    Ok(out)
}
