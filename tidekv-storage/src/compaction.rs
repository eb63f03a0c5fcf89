//! # Compaction
//!
//! Size-tiered compaction merges one whole level into the next. The inputs
//! are every table of the source level plus the destination tables whose
//! key range overlaps the source's; everything else in the destination is
//! kept untouched on either side of the merged output.
//!
//! ```text
//! level i   :            [ a ..... q ] [ c ... z ]          (all inputs)
//! level i+1 : [0..9] [a..f] [g..m] [n..r] [s..z]  [{..~]
//!              keep  └──────── overlap ───────┘   keep
//!
//! result i+1: [0..9] [       merged a..z        ] [{..~]
//! ```
//!
//! The merge is a k-way min-heap over table iterators. Each input carries a
//! rank; on equal keys the lowest rank (the newest table) wins and the rest
//! are dropped, so the output is sorted with one entry per key.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use tidekv_core::error::Result;

use crate::sstable::{SSTable, SSTableIterator, SSTableOptions};

/// Head of one input iterator, ordered so `BinaryHeap` pops the smallest
/// key first and, among equal keys, the lowest rank
#[derive(Debug)]
struct Next<'a> {
    key: &'a [u8],
    value: &'a [u8],
    rank: usize,
}

impl Ord for Next<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed to turn the max-heap into a min-heap
        other
            .key
            .cmp(self.key)
            .then_with(|| other.rank.cmp(&self.rank))
    }
}

impl PartialOrd for Next<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Next<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Next<'_> {}

/// Sorted, deduplicated view over several tables. `tables[0]` has the
/// highest priority.
pub struct MergeIterator<'a> {
    sources: Vec<SSTableIterator<'a>>,
    heap: BinaryHeap<Next<'a>>,
    last_key: Option<&'a [u8]>,
}

impl<'a> MergeIterator<'a> {
    pub fn new<I>(tables: I) -> Self
    where
        I: IntoIterator<Item = &'a SSTable>,
    {
        let mut sources: Vec<SSTableIterator<'a>> =
            tables.into_iter().map(SSTable::iter).collect();
        let mut heap = BinaryHeap::with_capacity(sources.len());
        for (rank, source) in sources.iter_mut().enumerate() {
            if let Some((key, value)) = source.next() {
                heap.push(Next { key, value, rank });
            }
        }
        Self {
            sources,
            heap,
            last_key: None,
        }
    }
}

impl<'a> Iterator for MergeIterator<'a> {
    type Item = (&'a [u8], &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let top = self.heap.pop()?;
            if let Some((key, value)) = self.sources[top.rank].next() {
                self.heap.push(Next {
                    key,
                    value,
                    rank: top.rank,
                });
            }
            if self.last_key == Some(top.key) {
                // Shadowed by a higher priority table
                continue;
            }
            self.last_key = Some(top.key);
            return Some((top.key, top.value));
        }
    }
}

/// Which destination tables a level merge rewrites
#[derive(Debug)]
pub struct CompactionPlan {
    /// Merge inputs in priority order: source newest first, then overlapping
    /// destination tables
    pub inputs: Vec<Arc<SSTable>>,
    /// Destination tables entirely below the source range
    pub keep_below: Vec<Arc<SSTable>>,
    /// Destination tables entirely above the source range
    pub keep_above: Vec<Arc<SSTable>>,
}

impl CompactionPlan {
    /// `source` is in insertion order (oldest first); `destination` is
    /// sorted and non-overlapping
    pub fn new(source: &[Arc<SSTable>], destination: &[Arc<SSTable>]) -> Self {
        let mut inputs: Vec<Arc<SSTable>> = source.iter().rev().cloned().collect();
        let min_key = source.iter().map(|t| t.first_key()).min().unwrap_or_default();
        let max_key = source.iter().map(|t| t.last_key()).max().unwrap_or_default();

        let mut keep_below = Vec::new();
        let mut keep_above = Vec::new();
        for table in destination {
            if table.last_key() < min_key {
                keep_below.push(Arc::clone(table));
            } else if table.first_key() > max_key {
                keep_above.push(Arc::clone(table));
            } else {
                inputs.push(Arc::clone(table));
            }
        }

        Self {
            inputs,
            keep_below,
            keep_above,
        }
    }

    pub fn input_bytes(&self) -> u64 {
        self.inputs.iter().map(|t| t.binary_size()).sum()
    }

    /// Merge the inputs into a single new table `<dir>/<id>.sst`
    pub fn execute(&self, dir: &Path, id: u64, options: &SSTableOptions) -> Result<SSTable> {
        let merged: Vec<(&[u8], &[u8])> =
            MergeIterator::new(self.inputs.iter().map(|t| &**t)).collect();
        let table = SSTable::create(dir, id, &merged, options)?;
        info!(
            "Compacted {} tables ({} bytes) into SSTable {} ({} entries, {} bytes)",
            self.inputs.len(),
            self.input_bytes(),
            id,
            table.entry_count(),
            table.binary_size()
        );
        Ok(table)
    }

    /// New destination level: untouched tables around the merged one
    pub fn assemble(self, merged: Arc<SSTable>) -> (Vec<Arc<SSTable>>, Vec<Arc<SSTable>>) {
        let mut level = self.keep_below;
        level.push(merged);
        level.extend(self.keep_above);
        (level, self.inputs)
    }
}

/// What one `size_tiered_compaction` cascade did
#[derive(Debug, Default)]
pub struct CompactionOutcome {
    /// Ids of tables written by the cascade
    pub created: Vec<u64>,
    /// Tables no longer referenced by the compacted manifest
    pub superseded: Vec<Arc<SSTable>>,
    pub bytes_read: u64,
    pub bytes_written: u64,
    /// Source levels merged, in cascade order
    pub levels: Vec<usize>,
}

impl CompactionOutcome {
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}
