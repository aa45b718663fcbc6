//! TTL response cache
//!
//! Avoids redundant reads of idempotent, slowly-changing data (reference and
//! catalog endpoints) within a bounded staleness window. Entries are few and
//! TTL-bounded, so there is no LRU or size-based eviction: the enumerable set
//! of cache keys the caller defines bounds growth.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

/// A cached value and the instant it stops being served
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// TTL-keyed response cache.
///
/// Single-writer by ownership: only the client facade mutates it, all other
/// components read through the facade's interface.
#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a live entry. An expired entry behaves as a miss; a miss always
    /// means a full re-fetch by the caller, never a partial merge.
    pub async fn get(&self, key: &str) -> Option<Value> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        if Instant::now() < entry.expires_at {
            debug!("Cache hit: {key}");
            Some(entry.value.clone())
        } else {
            debug!("Cache entry expired: {key}");
            None
        }
    }

    /// Store a value, overwriting any previous entry unconditionally
    pub async fn set(&self, key: impl Into<String>, value: Value, ttl: Duration) {
        let key = key.into();
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().await.insert(key, entry);
    }

    /// Remove all entries whose key contains `pattern`. Returns the number
    /// of entries removed.
    pub async fn invalidate(&self, pattern: &str) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !key.contains(pattern));
        let removed = before - entries.len();
        debug!("Invalidated {removed} cache entries matching '{pattern}'");
        removed
    }

    /// Drop every entry
    pub async fn invalidate_all(&self) {
        self.entries.write().await.clear();
        debug!("All cache entries cleared");
    }

    /// Number of entries currently held, expired or not
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
