// Pluggable TTL key-value state store.
//
// The gateway keeps two pieces of state that must outlive a single
// connection task: cached connection metadata (24h TTL, so durations can be
// reconciled after a mid-connection restart) and the exported metrics
// summary (1h TTL, for cross-process dashboards). Both go through this one
// abstraction so a deployment can swap the in-memory store for a shared
// cache service without touching callers.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use serde_json::Value;
use tokio::sync::RwLock;

/// TTL key-value store. The `Memory` variant is correct for a single
/// gateway process; a shared-cache variant slots in here for multi-instance
/// deployments.
#[derive(Debug, Clone)]
pub enum TtlStore {
    Memory(MemoryTtlStore),
}

impl TtlStore {
    pub fn memory() -> Self {
        Self::Memory(MemoryTtlStore::default())
    }

    /// Look up a value. Returns `None` if absent or expired.
    pub async fn get(&self, key: &str) -> Option<Value> {
        match self {
            Self::Memory(store) => store.get(key).await,
        }
    }

    pub async fn insert(&self, key: impl Into<String>, value: Value, ttl: Duration) {
        match self {
            Self::Memory(store) => store.insert(key.into(), value, ttl).await,
        }
    }

    /// Remove a key, returning its value if it was present and unexpired.
    pub async fn remove(&self, key: &str) -> Option<Value> {
        match self {
            Self::Memory(store) => store.remove(key).await,
        }
    }

    /// Drop expired entries. Called periodically for memory hygiene.
    pub async fn evict_expired(&self) -> usize {
        match self {
            Self::Memory(store) => store.evict_expired().await,
        }
    }

    /// Number of stored entries (including potentially expired).
    pub async fn len(&self) -> usize {
        match self {
            Self::Memory(store) => store.len().await,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryTtlStore {
    entries: Arc<RwLock<HashMap<String, TtlEntry>>>,
}

#[derive(Debug, Clone)]
struct TtlEntry {
    value: Value,
    stored_at: Instant,
    ttl: Duration,
}

impl TtlEntry {
    fn is_live(&self) -> bool {
        self.stored_at.elapsed() < self.ttl
    }
}

impl MemoryTtlStore {
    async fn get(&self, key: &str) -> Option<Value> {
        let guard = self.entries.read().await;
        guard.get(key).filter(|entry| entry.is_live()).map(|entry| entry.value.clone())
    }

    async fn insert(&self, key: String, value: Value, ttl: Duration) {
        let mut guard = self.entries.write().await;
        guard.insert(key, TtlEntry { value, stored_at: Instant::now(), ttl });
    }

    async fn remove(&self, key: &str) -> Option<Value> {
        let mut guard = self.entries.write().await;
        guard.remove(key).filter(|entry| entry.is_live()).map(|entry| entry.value)
    }

    async fn evict_expired(&self) -> usize {
        let mut guard = self.entries.write().await;
        let before = guard.len();
        guard.retain(|_, entry| entry.is_live());
        before - guard.len()
    }

    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
