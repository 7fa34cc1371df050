//! Key-value storage seam and the two implementations the engine uses.
//!
//! - [`MemoryStore`]: shared in-memory backend, cheap to clone.
//! - [`CacheStore`]: write overlay over any backend. Every keeper operation runs
//!   against one and flushes it only when the operation succeeds.
//!
//! Values are JSON-encoded records from `conduit_core::types`.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use conduit_core::ServiceError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("backend failure: {0}")]
    Backend(String),
    #[error("failed to decode value under key {key}: {source}")]
    Decode {
        key: String,
        source: serde_json::Error,
    },
    #[error("failed to encode value: {0}")]
    Encode(serde_json::Error),
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Decode { .. } => ServiceError::Corrupted(e.to_string()),
            other => ServiceError::Store(other.to_string()),
        }
    }
}

/// Ordered byte-keyed storage.
pub trait KvStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
    fn set(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StoreError>;
    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError>;
    /// Every entry whose key starts with `prefix`, in ascending key order.
    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;
}

// ── Typed helpers ─────────────────────────────────────────────────────────────

pub fn get_json<T: DeserializeOwned>(
    store: &dyn KvStore,
    key: &[u8],
) -> Result<Option<T>, StoreError> {
    match store.get(key)? {
        Some(bytes) => decode(key, &bytes).map(Some),
        None => Ok(None),
    }
}

pub fn put_json<T: Serialize>(
    store: &mut dyn KvStore,
    key: &[u8],
    value: &T,
) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec(value).map_err(StoreError::Encode)?;
    store.set(key, bytes)
}

/// Decode every value under `prefix`, key order preserved.
pub fn scan_json<T: DeserializeOwned>(
    store: &dyn KvStore,
    prefix: &[u8],
) -> Result<Vec<T>, StoreError> {
    store
        .prefix_scan(prefix)?
        .into_iter()
        .map(|(k, v)| decode(&k, &v))
        .collect()
}

fn decode<T: DeserializeOwned>(key: &[u8], bytes: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(bytes).map_err(|source| StoreError::Decode {
        key: hex::encode(key),
        source,
    })
}

// ── MemoryStore ───────────────────────────────────────────────────────────────

/// In-memory backend. Clones share the same map.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.get(key).map(|v| v.clone()))
    }

    fn set(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StoreError> {
        self.entries.insert(key.to_vec(), value);
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut out: Vec<(Vec<u8>, Vec<u8>)> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}

// ── CacheStore ────────────────────────────────────────────────────────────────

/// Staged writes. `None` marks a deletion.
pub type WriteSet = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

/// Read-through overlay. Reads see staged writes; nothing reaches the base
/// until [`flush`] is called with the returned [`WriteSet`].
pub struct CacheStore<'a> {
    base: &'a dyn KvStore,
    writes: WriteSet,
}

impl<'a> CacheStore<'a> {
    pub fn new(base: &'a dyn KvStore) -> Self {
        Self {
            base,
            writes: BTreeMap::new(),
        }
    }

    pub fn into_writes(self) -> WriteSet {
        self.writes
    }
}

impl KvStore for CacheStore<'_> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        match self.writes.get(key) {
            Some(staged) => Ok(staged.clone()),
            None => self.base.get(key),
        }
    }

    fn set(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StoreError> {
        self.writes.insert(key.to_vec(), Some(value));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        self.writes.insert(key.to_vec(), None);
        Ok(())
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> =
            self.base.prefix_scan(prefix)?.into_iter().collect();
        for (k, v) in self
            .writes
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
        {
            match v {
                Some(v) => merged.insert(k.clone(), v.clone()),
                None => merged.remove(k),
            };
        }
        Ok(merged.into_iter().collect())
    }
}

/// Apply staged writes to `base` in key order.
pub fn flush(base: &mut dyn KvStore, writes: WriteSet) -> Result<(), StoreError> {
    for (key, value) in writes {
        match value {
            Some(v) => base.set(&key, v)?,
            None => base.delete(&key)?,
        }
    }
    Ok(())
}
