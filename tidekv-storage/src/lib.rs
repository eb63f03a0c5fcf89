//! # tidekv Storage Engine
//!
//! LSM-tree storage engine: writes land in a concurrent skip list, full
//! memtables are flushed by a background thread into immutable memory-mapped
//! SSTables, and a copy-on-write manifest tracks which tables form each level.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Write Path                             │
//! │                                                             │
//! │  put ──> active MemTable ──freeze──> frozen queue           │
//! │                                          │                  │
//! │                                          ▼ flush worker     │
//! │                             SSTable (level 0) ──> Manifest  │
//! │                                                     │       │
//! │                                    size-tiered compaction   │
//! │                                    level i ──> level i + 1  │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Read Path                              │
//! │                                                             │
//! │  get ──> active ──> frozen (newest first) ──> Manifest      │
//! │                                                │            │
//! │                      level 0 newest first, then one table   │
//! │                      per level by binary search; bloom      │
//! │                      filters skip most absent keys          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod compaction;
pub mod engine;
pub mod manifest;
pub mod memtable;
pub mod sstable;

pub use compaction::{CompactionOutcome, CompactionPlan, MergeIterator};
pub use engine::{Db, DbStats, LevelStats};
pub use manifest::{Level, Manifest, ManifestOptions, MANIFEST_FILE};
pub use memtable::{MemTable, MemTableManager, SkipList};
pub use sstable::{BloomFilter, SSTable, SSTableInfo, SSTableOptions};
