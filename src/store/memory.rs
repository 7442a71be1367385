//! Process-local backend used by tests and single-instance development runs.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};

use super::{BackendError, KvBackend};

/// Stored value with its deadline
#[derive(Clone, Debug)]
struct StoredEntry {
    value: Vec<u8>,
    /// `None` when the deadline lies beyond what `Instant` can represent
    expires_at: Option<Instant>,
}

impl StoredEntry {
    fn new(value: Vec<u8>, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now().checked_add(ttl),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// In-memory key-value store with per-entry expiry.
///
/// Atomicity comes from `DashMap` shard locks: claiming goes through the
/// entry API and `take` is a single `remove`, so concurrent takers of one
/// key cannot both receive the value.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: DashMap<String, StoredEntry>,
    counters: DashMap<String, i64>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove expired entries. Expired entries are never returned anyway,
    /// this only reclaims their memory.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        before.saturating_sub(self.entries.len())
    }

    /// Number of stored entries, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Overwrite a raw value. Lets tests plant data the exchange never wrote.
    pub fn insert_raw(&self, key: &str, value: &[u8], ttl: Duration) {
        self.entries
            .insert(key.to_string(), StoredEntry::new(value.to_vec(), ttl));
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, BackendError> {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().is_expired() {
                    return Ok(false);
                }
                occupied.insert(StoredEntry::new(value.to_vec(), ttl));
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredEntry::new(value.to_vec(), ttl));
                Ok(true)
            }
        }
    }

    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        Ok(self
            .entries
            .remove(key)
            .map(|(_, entry)| entry)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.value))
    }

    async fn incr(&self, key: &str) -> Result<i64, BackendError> {
        let mut counter = self.counters.entry(key.to_string()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn counter(&self, key: &str) -> Result<i64, BackendError> {
        Ok(self.counters.get(key).map(|c| *c).unwrap_or(0))
    }
}
