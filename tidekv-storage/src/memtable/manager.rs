use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::info;

use tidekv_core::error::Result;
use tidekv_core::{Metrics, RandomSource};

use super::table::MemTable;
use super::types::{MemTableConfig, MemTableManagerStats};

struct MemTableSet {
    active: Arc<MemTable>,
    /// Frozen tables awaiting flush, oldest at the front
    frozen: VecDeque<Arc<MemTable>>,
}

/// Owns the active memtable and the queue of frozen ones.
///
/// Writers hold the set's read lock while they write into the active table,
/// so a freeze (which takes the write lock) can never race a write into the
/// table being frozen.
pub struct MemTableManager {
    tables: RwLock<MemTableSet>,
    next_id: AtomicU64,
    config: MemTableConfig,
    rng: RandomSource,
    metrics: Metrics,
}

impl MemTableManager {
    pub fn new(config: MemTableConfig, rng: RandomSource, metrics: Metrics) -> Self {
        let active = Arc::new(MemTable::new(1, rng.clone()));
        Self {
            tables: RwLock::new(MemTableSet {
                active,
                frozen: VecDeque::new(),
            }),
            next_id: AtomicU64::new(2),
            config,
            rng,
            metrics,
        }
    }

    /// Write into the active table. Returns `true` when this write froze it.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        let full = {
            let tables = self.tables.read();
            tables.active.put(key, value)?;
            tables.active.binary_size() > self.config.max_bytes
        };
        Ok(full && self.rotate(false))
    }

    /// Freeze the active table even if it is below the threshold.
    /// Returns `false` when it was empty.
    pub fn freeze_active(&self) -> bool {
        self.rotate(true)
    }

    fn rotate(&self, force: bool) -> bool {
        let mut tables = self.tables.write();
        let size = tables.active.binary_size();
        // Another writer may already have rotated
        if tables.active.is_empty() || (!force && size <= self.config.max_bytes) {
            return false;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let fresh = Arc::new(MemTable::new(id, self.rng.clone()));
        let old = std::mem::replace(&mut tables.active, fresh);
        old.freeze();
        info!(
            "Rotating MemTable {} ({} bytes, {} entries), {} awaiting flush",
            old.id(),
            size,
            old.len(),
            tables.frozen.len() + 1
        );
        tables.frozen.push_back(old);
        self.metrics.record_freeze();
        true
    }

    /// Search the active table, then frozen tables newest first
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        let (active, frozen) = self.snapshot();
        if let Some(value) = active.get(key) {
            return Some(value);
        }
        frozen.iter().rev().find_map(|table| table.get(key))
    }

    /// Current active table and frozen queue (oldest first)
    pub fn snapshot(&self) -> (Arc<MemTable>, Vec<Arc<MemTable>>) {
        let tables = self.tables.read();
        (
            Arc::clone(&tables.active),
            tables.frozen.iter().cloned().collect(),
        )
    }

    /// Next table to flush
    pub fn oldest_frozen(&self) -> Option<Arc<MemTable>> {
        self.tables.read().frozen.front().cloned()
    }

    /// Drop `table` from the queue once its contents are in the manifest
    pub fn remove_flushed(&self, table: &Arc<MemTable>) -> bool {
        let mut tables = self.tables.write();
        match tables.frozen.front() {
            Some(front) if Arc::ptr_eq(front, table) => {
                tables.frozen.pop_front();
                true
            }
            _ => false,
        }
    }

    pub fn pending(&self) -> usize {
        self.tables.read().frozen.len()
    }

    pub fn active_bytes(&self) -> usize {
        self.tables.read().active.binary_size()
    }

    pub fn stats(&self) -> MemTableManagerStats {
        let tables = self.tables.read();
        MemTableManagerStats {
            active: tables.active.stats(),
            frozen: tables.frozen.iter().map(|t| t.stats()).collect(),
        }
    }
}
