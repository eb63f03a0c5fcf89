use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use bytes::Bytes;
use tracing::debug;

use tidekv_core::error::{Error, Result};
use tidekv_core::RandomSource;

use super::skiplist::{Iter, SkipList};
use super::types::MemTableStats;

/// One in-memory table. Writable while active, read-only once frozen.
pub struct MemTable {
    id: u64,
    list: SkipList,
    created_at: Instant,
    frozen: AtomicBool,
}

impl MemTable {
    pub fn new(id: u64, rng: RandomSource) -> Self {
        Self {
            id,
            list: SkipList::new(rng),
            created_at: Instant::now(),
            frozen: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.is_frozen() {
            return Err(Error::MemTable {
                message: format!("MemTable {} is frozen", self.id),
            });
        }
        self.list
            .put(Bytes::copy_from_slice(key), Bytes::copy_from_slice(value));
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.list.get(key)
    }

    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        if self.is_frozen() {
            return Err(Error::MemTable {
                message: format!("MemTable {} is frozen", self.id),
            });
        }
        Ok(self.list.delete(key))
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Key plus value bytes held by the table
    pub fn binary_size(&self) -> usize {
        self.list.binary_size()
    }

    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
        debug!(
            "MemTable {} frozen ({} bytes, {} entries)",
            self.id,
            self.binary_size(),
            self.len()
        );
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    pub fn iter(&self) -> Iter<'_> {
        self.list.iter()
    }

    /// Sorted copy of every entry, ready to become an SSTable
    pub fn entries(&self) -> Vec<(Bytes, Bytes)> {
        let mut out = Vec::with_capacity(self.len());
        out.extend(self.list.iter());
        out
    }

    pub fn stats(&self) -> MemTableStats {
        MemTableStats {
            id: self.id,
            entry_count: self.len(),
            size_bytes: self.binary_size(),
            age: self.created_at.elapsed(),
            frozen: self.is_frozen(),
        }
    }
}
