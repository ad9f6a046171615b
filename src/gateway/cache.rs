//! In-memory response cache with lazy and periodic expiry

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

/// A cached response body
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Endpoint the entry was fetched from, used for prefix invalidation
    pub endpoint: String,
    pub payload: Value,
    pub stored_at: Instant,
}

/// Statistics about cache state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
}

/// TTL-bounded response cache owned by the gateway.
///
/// An entry whose age has reached `ttl` is never returned; it is dropped the
/// next time it is read or when [`ResponseCache::sweep`] runs.
#[derive(Debug)]
pub struct ResponseCache {
    ttl: Duration,
    entries: HashMap<String, CacheEntry>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_expired(&self, entry: &CacheEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.stored_at) >= self.ttl
    }

    /// Get a fresh entry, evicting it if it has expired
    pub fn get(&mut self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let expired = self.is_expired(self.entries.get(key)?, now);
        if expired {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|e| e.payload.clone())
    }

    pub fn put(&mut self, key: String, endpoint: &str, payload: Value) {
        self.entries.insert(
            key,
            CacheEntry {
                endpoint: endpoint.to_string(),
                payload,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drop every entry fetched from an endpoint starting with `prefix`
    pub fn invalidate_prefix(&mut self, prefix: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.endpoint.starts_with(prefix));
        before - self.entries.len()
    }

    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    /// Evict all expired entries, returning how many were removed
    pub fn sweep(&mut self) -> usize {
        let now = Instant::now();
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries
            .retain(|_, e| now.saturating_duration_since(e.stored_at) < ttl);
        before - self.entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        CacheStats {
            total_entries: self.entries.len(),
            expired_entries: self
                .entries
                .values()
                .filter(|e| self.is_expired(e, now))
                .count(),
        }
    }
}
