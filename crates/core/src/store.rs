//! Store trait — the durable key-value collaborator that persists memories.
//!
//! Keys are opaque namespace strings (see [`crate::namespace`]). Stores
//! enforce the memory's `ttl`; the budget engine never talks to a store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::StoreError;
use crate::memory::Memory;

/// A memory together with the key it is stored under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMemory {
    pub key: String,
    pub memory: Memory,
}

/// Ordering of [`MemoryStore::scan`] results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanOrder {
    /// Most recently accessed first.
    #[default]
    Recency,
    /// Highest importance first, recency breaking ties.
    Importance,
}

impl ScanOrder {
    /// Comparator placing the preferred memory first.
    pub fn compare(&self, a: &Memory, b: &Memory) -> Ordering {
        let recency = b.last_accessed_at.cmp(&a.last_accessed_at);
        match self {
            Self::Recency => recency,
            Self::Importance => b
                .importance
                .partial_cmp(&a.importance)
                .unwrap_or(Ordering::Equal)
                .then(recency),
        }
    }
}

/// The core MemoryStore trait.
///
/// Implementations: in-memory (for tests and ephemeral sessions) and a
/// JSON-lines file.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// The backend name (e.g., "in_memory", "file").
    fn name(&self) -> &str;

    /// Fetch a live (non-expired) memory by key.
    async fn get(&self, key: &str) -> Result<Option<Memory>, StoreError>;

    /// Insert or replace the memory under `key`, honouring `memory.ttl`.
    async fn set(&self, key: &str, memory: Memory) -> Result<(), StoreError>;

    /// Delete by key. Returns whether anything was removed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Every live memory whose key starts with `prefix`, in key order.
    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<StoredMemory>, StoreError>;

    /// Live memories under `prefix`, ordered by `order`, at most `limit`.
    async fn scan(
        &self,
        prefix: &str,
        order: ScanOrder,
        limit: usize,
    ) -> Result<Vec<Memory>, StoreError> {
        let mut memories: Vec<Memory> = self
            .list_by_prefix(prefix)
            .await?
            .into_iter()
            .map(|stored| stored.memory)
            .collect();
        memories.sort_by(|a, b| order.compare(a, b));
        memories.truncate(limit);
        Ok(memories)
    }

    /// Number of live memories.
    async fn count(&self) -> Result<usize, StoreError>;

    /// Remove everything.
    async fn clear(&self) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTier;
    use chrono::{Duration, Utc};

    #[test]
    fn recency_order_prefers_latest_access() {
        let now = Utc::now();
        let old = Memory::new("old", MemoryTier::Working).at(now - Duration::hours(2));
        let new = Memory::new("new", MemoryTier::Working).at(now);
        assert_eq!(ScanOrder::Recency.compare(&new, &old), Ordering::Less);
    }

    #[test]
    fn importance_order_breaks_ties_by_recency() {
        let now = Utc::now();
        let a = Memory::new("a", MemoryTier::Working).with_importance(0.9).at(now - Duration::hours(1));
        let b = Memory::new("b", MemoryTier::Working).with_importance(0.9).at(now);
        let c = Memory::new("c", MemoryTier::Working).with_importance(0.1).at(now);

        let mut all = vec![c.clone(), a.clone(), b.clone()];
        all.sort_by(|x, y| ScanOrder::Importance.compare(x, y));
        let order: Vec<&str> = all.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }
}
