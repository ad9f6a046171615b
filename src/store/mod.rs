//! Durable key-value storage
//!
//! The resilience layer mirrors every queue and record it owns into a
//! [`PersistentStore`] so that it can be rebuilt after a restart. Values are
//! opaque bytes; [`StoreExt`] layers JSON on top.

pub mod memory;
pub mod sqlite;

use serde::{Serialize, de::DeserializeOwned};

use crate::error::StorageError;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Namespaced keys for everything the core persists
pub mod keys {
    pub const AUTH_TOKEN: &str = "auth.token";
    pub const REFRESH_TOKEN: &str = "auth.refresh_token";
    pub const USER_PROFILE: &str = "auth.user";
    pub const SESSION: &str = "telemetry.session";
    pub const ANONYMOUS_ID: &str = "telemetry.anonymous_id";
    pub const EVENT_QUEUE: &str = "telemetry.queue";
    pub const MUTATION_QUEUE: &str = "sync.mutations";
    pub const DEAD_LETTER: &str = "sync.dead_letter";
    pub const LAST_SYNC: &str = "sync.last_run";
    pub const SETTINGS: &str = "app.settings";

    pub const RESPONSE_PREFIX: &str = "responses.";
    pub const SNAPSHOT_PREFIX: &str = "snapshot.";

    /// Key holding the locally recorded response for a survey
    pub fn response(survey_id: &str) -> String {
        format!("{}{}", RESPONSE_PREFIX, survey_id)
    }

    /// Key holding a mirrored read-only collection
    pub fn snapshot(name: &str) -> String {
        format!("{}{}", SNAPSHOT_PREFIX, name)
    }
}

type Result<T> = std::result::Result<T, StorageError>;

/// A durable byte store surviving process restarts.
///
/// Writes are whole-value overwrites so an interrupted write can simply be
/// repeated. No multi-key atomicity is assumed.
pub trait PersistentStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Returns whether a value was present
    fn remove(&self, key: &str) -> Result<bool>;

    /// All keys starting with `prefix`, in lexical order
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

/// JSON helpers over any [`PersistentStore`]
pub trait StoreExt {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>>;

    fn put_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()>;

    /// Plain UTF-8 string value (tokens, ids)
    fn get_string(&self, key: &str) -> Result<Option<String>>;
}

impl<S: PersistentStore + ?Sized> StoreExt for S {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StorageError::Serialization {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value).map_err(|e| StorageError::Serialization {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.put(key, &bytes)
    }

    fn get_string(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .get(key)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .filter(|s| !s.is_empty()))
    }
}
