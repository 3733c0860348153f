//! In-memory store — useful for testing and ephemeral sessions.

use async_trait::async_trait;
use chrono::Utc;
use memtier_core::error::StoreError;
use memtier_core::memory::Memory;
use memtier_core::store::{MemoryStore, StoredMemory};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::record::{Record, live_with_prefix};

/// A store that keeps records in a key-ordered map.
///
/// Expired records are invisible immediately and removed lazily, on the
/// next lookup of their key or by [`InMemoryStore::purge_expired`].
pub struct InMemoryStore {
    records: Arc<RwLock<BTreeMap<String, Record>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Drop every expired record. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| record.is_live(now));
        before - records.len()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Memory>, StoreError> {
        let now = Utc::now();
        {
            let records = self.records.read().await;
            match records.get(key) {
                None => return Ok(None),
                Some(record) if record.is_live(now) => return Ok(Some(record.memory.clone())),
                Some(_) => {}
            }
        }
        self.records.write().await.remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, memory: Memory) -> Result<(), StoreError> {
        let record = Record::new(key, memory, Utc::now());
        self.records.write().await.insert(key.to_string(), record);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = Utc::now();
        let removed = self.records.write().await.remove(key);
        Ok(removed.is_some_and(|record| record.is_live(now)))
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<StoredMemory>, StoreError> {
        let records = self.records.read().await;
        Ok(live_with_prefix(&records, prefix, Utc::now()))
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let now = Utc::now();
        let records = self.records.read().await;
        Ok(records.values().filter(|r| r.is_live(now)).count())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.records.write().await.clear();
        Ok(())
    }
}
