//! Storage Engine
//! ┌─────────────────────────────────────────────────────────────┐
//! │                           Db                                │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  Write Path:                                                │
//! │  ┌─────────┐    ┌─────────────────┐  over threshold         │
//! │  │   put   │───>│ active MemTable │──────freeze──────┐      │
//! │  └─────────┘    └─────────────────┘                  ▼      │
//! │                                          ┌───────────────┐  │
//! │                                          │ frozen queue  │  │
//! │                                          └───────┬───────┘  │
//! │  Flush Worker (one thread):                      │ oldest   │
//! │   build SSTable ─> insert_and_update ─> compact? │          │
//! │   ─> save manifest ─> publish ─> pop queue  <────┘          │
//! │                                                             │
//! │  Read Path:                                                 │
//! │  ┌─────────┐   ┌────────┐   ┌──────────────┐   ┌──────────┐ │
//! │  │   get   │──>│ active │──>│ frozen (new  │──>│ manifest │ │
//! │  └─────────┘   └────────┘   │ to old)      │   │ snapshot │ │
//! │                             └──────────────┘   └──────────┘ │
//! └─────────────────────────────────────────────────────────────┘
//!
//! The worker publishes a manifest containing a flushed table before it
//! removes that table from the frozen queue, so a reader always finds every
//! write in at least one of the places it searches.

use std::collections::HashSet;
use std::fs;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use tidekv_core::error::{Error, Result, ResultExt};
use tidekv_core::metrics::{Metrics, MetricsSnapshot, Timer};
use tidekv_core::traits::KvStore;
use tidekv_core::{RandomSource, StorageConfig};

use crate::manifest::{remove_orphan_tables, Manifest, ManifestOptions};
use crate::memtable::{MemTable, MemTableConfig, MemTableManager};
use crate::sstable::SSTable;

/// Per-level summary in [`DbStats`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelStats {
    pub level: usize,
    pub table_ids: Vec<u64>,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct DbStats {
    pub manifest_version: u64,
    pub max_sst_id: u64,
    pub levels: Vec<LevelStats>,
    pub active_memtable_bytes: usize,
    pub active_memtable_entries: usize,
    pub pending_flushes: usize,
    pub frozen_memtable_bytes: usize,
    /// Set once the flush worker has stopped on an error
    pub worker_halted: Option<String>,
    pub metrics: MetricsSnapshot,
}

#[derive(Default)]
struct WorkerState {
    stop: bool,
    halted: Option<String>,
}

struct DbInner {
    config: StorageConfig,
    memtables: MemTableManager,
    manifest: RwLock<Arc<Manifest>>,
    state: Mutex<WorkerState>,
    /// Signals the worker: a table was frozen or shutdown began
    wake: Condvar,
    /// Signals flush waiters: the queue shrank or the worker halted
    drained: Condvar,
    /// Tables dropped by a published manifest that is not yet on disk
    unsaved_superseded: Mutex<Vec<Arc<SSTable>>>,
    metrics: Metrics,
}

/// Embedded LSM key-value store
pub struct Db {
    inner: Arc<DbInner>,
    worker: Option<JoinHandle<()>>,
}

impl Db {
    /// Open (or create) the store in `config.data_dir` and start the flush worker
    pub fn open(config: StorageConfig) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;

        let rng = RandomSource::new(config.rng_seed);
        let metrics = Metrics::new();

        let manifest = Manifest::load(ManifestOptions::from_config(&config, rng.clone()))?;
        if config.reclaim_obsolete_tables {
            let removed = remove_orphan_tables(&config.data_dir, &manifest.table_ids())?;
            if !removed.is_empty() {
                warn!("Removed {} unreferenced SSTables: {:?}", removed.len(), removed);
            }
        }
        info!(
            "Opening database at {}: manifest version {}, {} tables, max id {}",
            config.data_dir.display(),
            manifest.version(),
            manifest.table_count(),
            manifest.max_sst_id()
        );

        let memtables = MemTableManager::new(
            MemTableConfig::from_storage(&config),
            rng,
            metrics.clone(),
        );

        let inner = Arc::new(DbInner {
            config,
            memtables,
            manifest: RwLock::new(Arc::new(manifest)),
            state: Mutex::new(WorkerState::default()),
            wake: Condvar::new(),
            drained: Condvar::new(),
            unsaved_superseded: Mutex::new(Vec::new()),
            metrics,
        });

        let worker_inner = Arc::clone(&inner);
        let worker = thread::Builder::new()
            .name("tidekv-flush".to_string())
            .spawn(move || worker_inner.run_worker())
            .with_context(|| "spawning flush worker".to_string())?;

        Ok(Self {
            inner,
            worker: Some(worker),
        })
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.inner.memtables.put(key, value)? {
            self.inner.wake_worker();
        }
        self.inner.metrics.record_put((key.len() + value.len()) as u64);
        Ok(())
    }

    /// Newest value for `key`: active memtable, frozen memtables newest
    /// first, then the current manifest
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        let value = self
            .inner
            .memtables
            .get(key)
            .or_else(|| self.manifest().get(key));
        self.inner.metrics.record_get(value.is_some());
        value
    }

    /// Freeze the active memtable and wait until every frozen table is on disk
    pub fn flush(&self) -> Result<()> {
        if self.inner.memtables.freeze_active() {
            self.inner.wake_worker();
        }
        let mut state = self.inner.state.lock();
        loop {
            if let Some(reason) = &state.halted {
                return Err(Error::WorkerHalted {
                    reason: reason.clone(),
                });
            }
            if self.inner.memtables.pending() == 0 {
                return Ok(());
            }
            self.inner.drained.wait(&mut state);
        }
    }

    /// Frozen memtables not yet turned into SSTables
    pub fn pending_flushes(&self) -> usize {
        self.inner.memtables.pending()
    }

    /// Current manifest snapshot
    pub fn manifest(&self) -> Arc<Manifest> {
        Arc::clone(&self.inner.manifest.read())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn config(&self) -> &StorageConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> DbStats {
        let manifest = self.manifest();
        let memtables = self.inner.memtables.stats();
        DbStats {
            manifest_version: manifest.version(),
            max_sst_id: manifest.max_sst_id(),
            levels: manifest
                .levels()
                .iter()
                .enumerate()
                .map(|(level, l)| LevelStats {
                    level,
                    table_ids: l.ids(),
                    bytes: l.binary_size(),
                })
                .collect(),
            active_memtable_bytes: memtables.active.size_bytes,
            active_memtable_entries: memtables.active.entry_count,
            pending_flushes: memtables.frozen.len(),
            frozen_memtable_bytes: memtables.frozen_bytes(),
            worker_halted: self.inner.state.lock().halted.clone(),
            metrics: self.inner.metrics.snapshot(),
        }
    }

    /// Flush what is buffered, stop the worker and save the final manifest
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        let worker = match self.worker.take() {
            Some(worker) => worker,
            None => return Ok(()),
        };

        self.inner.memtables.freeze_active();
        {
            let mut state = self.inner.state.lock();
            state.stop = true;
            self.inner.wake.notify_all();
        }
        if worker.join().is_err() {
            return Err(Error::Internal {
                message: "flush worker panicked".to_string(),
            });
        }

        let pending = self.inner.memtables.pending();
        if pending > 0 {
            warn!("Closing with {} memtables not flushed", pending);
        }
        let bytes = self.manifest().save()?;
        info!("Database closed, manifest saved ({} bytes)", bytes);
        let deferred = std::mem::take(&mut *self.inner.unsaved_superseded.lock());
        self.inner.retire(deferred);

        match self.inner.state.lock().halted.clone() {
            Some(reason) => Err(Error::WorkerHalted { reason }),
            None => Ok(()),
        }
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Error while closing database: {}", e);
        }
    }
}

impl KvStore for Db {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        Ok(Db::get(self, key))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        Db::put(self, key, value)
    }
}

impl DbInner {
    fn wake_worker(&self) {
        // Notify under the lock so the worker cannot miss it between its
        // queue check and its wait
        let _state = self.state.lock();
        self.wake.notify_one();
    }

    fn run_worker(&self) {
        info!("Flush worker started");
        loop {
            let stopping = {
                let mut state = self.state.lock();
                while !state.stop && self.memtables.pending() == 0 {
                    self.wake.wait(&mut state);
                }
                state.stop
            };

            while let Some(table) = self.memtables.oldest_frozen() {
                if let Err(e) = self.flush_table(&table) {
                    error!("Flushing MemTable {} failed, halting worker: {}", table.id(), e);
                    self.metrics.record_flush_error();
                    let mut state = self.state.lock();
                    state.halted = Some(e.to_string());
                    self.drained.notify_all();
                    return;
                }
                self.memtables.remove_flushed(&table);
                let _state = self.state.lock();
                self.drained.notify_all();
            }

            if stopping {
                break;
            }
        }
        info!("Flush worker stopped");
    }

    /// Turn one frozen memtable into an SSTable and publish the manifest
    /// that contains it
    fn flush_table(&self, table: &Arc<MemTable>) -> Result<()> {
        let timer = Timer::new("memtable_flush");
        let entries = table.entries();
        if entries.is_empty() {
            return Ok(());
        }

        // Only this thread replaces the manifest, so the snapshot stays current
        let current = self.manifest.read().clone();
        let id = current.max_sst_id() + 1;
        let options = &current.options().table;
        let sst = Arc::new(SSTable::create(&self.config.data_dir, id, &entries, options)?);
        info!(
            "Flushed MemTable {} to SSTable {} ({} entries, {} bytes)",
            table.id(),
            id,
            sst.entry_count(),
            sst.binary_size()
        );

        let mut next = current.insert_and_update(sst);
        let mut superseded = Vec::new();
        if next.can_do_compaction() {
            let outcome = next.size_tiered_compaction(next.max_sst_id() + 1)?;
            if !outcome.is_empty() {
                self.metrics.record_compaction(outcome.bytes_written);
            }
            superseded = outcome.superseded;
        }

        if self.config.persist_manifest_on_publish {
            next.save()?;
        }
        let version = next.version();
        *self.manifest.write() = Arc::new(next);
        debug!("Published manifest version {}", version);

        if self.config.reclaim_obsolete_tables {
            if self.config.persist_manifest_on_publish {
                self.retire(superseded);
            } else {
                // The on-disk manifest still lists these until close saves
                self.unsaved_superseded.lock().extend(superseded);
            }
        }
        self.metrics.record_flush();
        timer.stop();
        Ok(())
    }

    /// Mark tables dropped from the published manifest for deletion once
    /// their last reader lets go
    fn retire(&self, superseded: Vec<Arc<SSTable>>) {
        let live: HashSet<u64> = self.manifest.read().table_ids();
        for table in superseded {
            if !live.contains(&table.id()) {
                table.mark_obsolete();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> StorageConfig {
        StorageConfig::new(dir.path()).rng_seed(7)
    }

    #[test]
    fn test_put_get_in_memory() {
        let dir = TempDir::new().unwrap();
        let db = Db::open(config(&dir)).unwrap();
        db.put(b"k", b"v").unwrap();
        assert_eq!(db.get(b"k"), Some(Bytes::from("v")));
        assert_eq!(db.get(b"missing"), None);

        let metrics = db.metrics();
        assert_eq!(metrics.puts, 1);
        assert_eq!(metrics.gets, 2);
        assert_eq!(metrics.get_hits, 1);
    }

    #[test]
    fn test_flush_moves_data_to_sstable() {
        let dir = TempDir::new().unwrap();
        let db = Db::open(config(&dir).level_max_bytes(vec![1 << 30])).unwrap();
        db.put(b"a", b"1").unwrap();
        db.flush().unwrap();

        assert_eq!(db.pending_flushes(), 0);
        let manifest = db.manifest();
        assert_eq!(manifest.level(0).unwrap().ids(), vec![1]);
        assert_eq!(manifest.get(b"a"), Some(Bytes::from("1")));
        assert_eq!(db.get(b"a"), Some(Bytes::from("1")));
        assert!(dir.path().join("1.sst").exists());
        assert!(dir.path().join("manifest").exists());
    }

    #[test]
    fn test_flush_with_nothing_buffered() {
        let dir = TempDir::new().unwrap();
        let db = Db::open(config(&dir)).unwrap();
        db.flush().unwrap();
        assert_eq!(db.manifest().table_count(), 0);
        db.close().unwrap();
    }
}
