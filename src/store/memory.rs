//! In-memory store for tests and ephemeral hosts

use std::collections::BTreeMap;
use std::sync::Mutex;

use super::PersistentStore;
use crate::error::StorageError;

type Result<T> = std::result::Result<T, StorageError>;

/// `BTreeMap`-backed [`PersistentStore`] with an optional byte quota.
///
/// The quota mimics a browser storage limit: a write that would push the
/// total above it fails with [`StorageError::QuotaExceeded`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
    quota: Mutex<Option<usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that rejects writes beyond `bytes` total
    pub fn with_quota(bytes: usize) -> Self {
        let store = Self::default();
        store.set_quota(Some(bytes));
        store
    }

    /// Change (or lift) the quota at runtime
    pub fn set_quota(&self, bytes: Option<usize>) {
        if let Ok(mut quota) = self.quota.lock() {
            *quota = bytes;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.entries
            .lock()
            .map_err(|_| StorageError::Io("memory store lock poisoned".to_string()))
    }
}

impl PersistentStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut entries = self.lock()?;

        let quota = self.quota.lock().ok().and_then(|q| *q);
        if let Some(limit) = quota {
            let others: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            if others + key.len() + value.len() > limit {
                return Err(StorageError::QuotaExceeded(key.to_string()));
            }
        }

        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.lock()?.remove(key).is_some())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()?
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}
