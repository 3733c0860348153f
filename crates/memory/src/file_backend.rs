//! File-based store — persistent JSON-lines storage.
//!
//! Each line is one JSON record: `{"key": ..., "memory": {...},
//! "expires_at": ...}`. Records are loaded into memory on creation and the
//! whole file is rewritten on every mutation (set, delete, clear). This
//! gives fast reads with durable writes, and the file stays
//! human-inspectable.
//!
//! Default location: `~/.memtier/memories.jsonl`

use async_trait::async_trait;
use chrono::Utc;
use memtier_core::error::StoreError;
use memtier_core::memory::Memory;
use memtier_core::store::{MemoryStore, StoredMemory};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::record::{Record, live_with_prefix};

/// A file-backed store using JSONL (one record per line).
pub struct FileStore {
    path: PathBuf,
    records: Arc<RwLock<BTreeMap<String, Record>>>,
}

impl FileStore {
    /// Open a store at the given path.
    ///
    /// If the file exists, live records are loaded from it; corrupted lines
    /// and expired records are skipped. If it does not exist, the store
    /// starts empty and the file is created on first write.
    pub fn new(path: PathBuf) -> Self {
        let records = Self::load_from_disk(&path);
        debug!(path = %path.display(), count = records.len(), "File store loaded");
        Self {
            path,
            records: Arc::new(RwLock::new(records)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_from_disk(path: &Path) -> BTreeMap<String, Record> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return BTreeMap::new(), // not written yet
        };

        let now = Utc::now();
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<Record>(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted memory record");
                    None
                }
            })
            .filter(|record| record.is_live(now))
            .map(|record| (record.key.clone(), record))
            .collect()
    }

    /// Rewrite the file with every live record.
    async fn flush(&self) -> Result<(), StoreError> {
        let records = self.records.read().await;
        let now = Utc::now();

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Storage(format!("Failed to create store directory: {e}"))
                })?;
            }
        }

        let mut content = String::new();
        for record in records.values().filter(|r| r.is_live(now)) {
            let line = serde_json::to_string(record).map_err(|e| StoreError::Corrupted {
                key: record.key.clone(),
                reason: e.to_string(),
            })?;
            content.push_str(&line);
            content.push('\n');
        }

        std::fs::write(&self.path, &content)
            .map_err(|e| StoreError::Storage(format!("Failed to write store file: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl MemoryStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn get(&self, key: &str) -> Result<Option<Memory>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .get(key)
            .filter(|r| r.is_live(Utc::now()))
            .map(|r| r.memory.clone()))
    }

    async fn set(&self, key: &str, memory: Memory) -> Result<(), StoreError> {
        let record = Record::new(key, memory, Utc::now());
        self.records.write().await.insert(key.to_string(), record);
        self.flush().await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = Utc::now();
        let removed = self.records.write().await.remove(key);
        let deleted = removed.is_some_and(|r| r.is_live(now));
        if deleted {
            self.flush().await?;
        }
        Ok(deleted)
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
        self.flush().await
    }
}
