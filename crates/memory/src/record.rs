//! Stored record shared by the backends: a memory, its key, and when it
//! stops being visible.

use chrono::{DateTime, Duration, Utc};
use memtier_core::memory::Memory;
use memtier_core::store::StoredMemory;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Record {
    pub key: String,
    pub memory: Memory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Record {
    /// A record whose TTL (if any) starts counting at `now`. TTLs too large
    /// to represent never expire.
    pub fn new(key: &str, memory: Memory, now: DateTime<Utc>) -> Self {
        let expires_at = memory.ttl.and_then(|secs| {
            let secs = i64::try_from(secs).ok()?;
            now.checked_add_signed(Duration::try_seconds(secs)?)
        });
        Self {
            key: key.to_string(),
            memory,
            expires_at,
        }
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Live records under `prefix`, in key order.
pub(crate) fn live_with_prefix(
    records: &BTreeMap<String, Record>,
    prefix: &str,
    now: DateTime<Utc>,
) -> Vec<StoredMemory> {
    records
        .range(prefix.to_string()..)
        .take_while(|(key, _)| key.starts_with(prefix))
        .filter(|(_, record)| record.is_live(now))
        .map(|(key, record)| StoredMemory {
            key: key.clone(),
            memory: record.memory.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use memtier_core::memory::MemoryTier;

    #[test]
    fn ttl_sets_expiry() {
        let now = Utc::now();
        let memory = Memory::new("x", MemoryTier::ShortTerm).with_ttl(Some(60));
        let record = Record::new("k", memory, now);
        assert!(record.is_live(now));
        assert!(!record.is_live(now + Duration::seconds(61)));
    }

    #[test]
    fn no_ttl_never_expires() {
        let now = Utc::now();
        let record = Record::new("k", Memory::new("x", MemoryTier::Working), now);
        assert!(record.expires_at.is_none());
        assert!(record.is_live(now + Duration::days(3650)));
    }

    #[test]
    fn prefix_scan_stops_at_boundary() {
        let now = Utc::now();
        let mut records = BTreeMap::new();
        for key in ["a:1", "a:2", "ab:1", "b:1"] {
            records.insert(
                key.to_string(),
                Record::new(key, Memory::new(key, MemoryTier::Working), now),
            );
        }
        let keys: Vec<String> = live_with_prefix(&records, "a:", now)
            .into_iter()
            .map(|s| s.key)
            .collect();
        assert_eq!(keys, vec!["a:1", "a:2"]);
    }
}
