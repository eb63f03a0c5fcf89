//! # Core Traits
//!
//! The interface the storage engine exposes to the layers built on top of
//! it (replication, request handling). Everything is synchronous: a `put`
//! returns once the write is queryable in memory, not once it is on disk.

use bytes::Bytes;

use crate::Result;

/// One record of the replicated log, applied to the store in index order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub term: u64,
    pub index: u64,
    pub key: Bytes,
    pub value: Bytes,
}

impl LogEntry {
    pub fn new(term: u64, index: u64, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            term,
            index,
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Key-value store trait
pub trait KvStore: Send + Sync {
    /// Point lookup; `Ok(None)` when the key was never written
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>>;

    /// Insert or overwrite a key
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Apply a committed log entry
    fn apply(&self, entry: &LogEntry) -> Result<()> {
        self.put(&entry.key, &entry.value)
    }
}
