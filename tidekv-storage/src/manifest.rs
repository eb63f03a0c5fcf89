//! # Manifest - Versioned Level Set
//!
//! A manifest is one immutable version of the LSM tree: which SSTables make
//! up each level. Publishing a new version means building a modified copy
//! and swapping the shared pointer; readers holding the old version keep a
//! consistent view for as long as they hold it.
//!
//! ```text
//! level 0 : [7] [9] [12]          overlapping, searched newest first
//! level 1 : [3: a..f] [11: g..z]  sorted, disjoint, binary searched
//! level 2 : [1: a..z]
//! ```
//!
//! ## File Format
//!
//! All fields are native-endian u64. Each level lists its table ids in
//! order and ends with `u64::MAX`.
//!
//! ```text
//! version | level_count | (id* u64::MAX){level_count}
//! ```

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use byteorder::{NativeEndian, WriteBytesExt};
use bytes::Bytes;
use memmap2::{Mmap, MmapMut};
use tracing::{debug, info};

use tidekv_core::error::{Error, Result, ResultExt};
use tidekv_core::{RandomSource, StorageConfig};

use crate::compaction::{CompactionOutcome, CompactionPlan, MergeIterator};
use crate::sstable::{Decoder, SSTable, SSTableOptions, WORD};

pub const MANIFEST_FILE: &str = "manifest";
const MANIFEST_TMP_FILE: &str = "manifest.tmp";
const LEVEL_END: u64 = u64::MAX;

/// Where tables live and how the tree is shaped
#[derive(Debug, Clone)]
pub struct ManifestOptions {
    pub dir: PathBuf,
    /// Byte budget per level; levels past the end are never compacted further
    pub level_max_bytes: Vec<u64>,
    pub table: SSTableOptions,
}

impl ManifestOptions {
    pub fn from_config(config: &StorageConfig, rng: RandomSource) -> Self {
        Self {
            dir: config.data_dir.clone(),
            level_max_bytes: config.level_max_bytes.clone(),
            table: SSTableOptions::from_config(config, rng),
        }
    }
}

/// Tables of one level, in insertion order for level 0 and key order below
#[derive(Debug, Clone, Default)]
pub struct Level {
    tables: Vec<Arc<SSTable>>,
    bytes: u64,
}

impl Level {
    fn from_tables(tables: Vec<Arc<SSTable>>) -> Self {
        let bytes = tables.iter().map(|t| t.binary_size()).sum();
        Self { tables, bytes }
    }

    fn push(&mut self, table: Arc<SSTable>) {
        self.bytes += table.binary_size();
        self.tables.push(table);
    }

    pub fn tables(&self) -> &[Arc<SSTable>] {
        &self.tables
    }

    /// Sum of table file sizes
    pub fn binary_size(&self) -> u64 {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn ids(&self) -> Vec<u64> {
        self.tables.iter().map(|t| t.id()).collect()
    }

    /// Overlapping tables: the newest one holding the key wins
    fn get_newest_first(&self, key: &[u8]) -> Option<&[u8]> {
        self.tables.iter().rev().find_map(|t| t.get_ref(key))
    }

    /// Disjoint tables: only the rightmost one starting at or before the key can hold it
    fn get_sorted(&self, key: &[u8]) -> Option<&[u8]> {
        let idx = self.tables.partition_point(|t| t.first_key() <= key);
        self.tables.get(idx.checked_sub(1)?)?.get_ref(key)
    }
}

/// One immutable version of the level set. Cloning is cheap: tables are shared.
#[derive(Clone)]
pub struct Manifest {
    version: u64,
    levels: Vec<Level>,
    max_sst_id: u64,
    options: Arc<ManifestOptions>,
}

impl Manifest {
    /// Version 1 with a single empty level
    pub fn new(options: ManifestOptions) -> Self {
        Self {
            version: 1,
            levels: vec![Level::default()],
            max_sst_id: 0,
            options: Arc::new(options),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.options.dir.join(MANIFEST_FILE)
    }

    /// Read `<dir>/manifest` and open every table it names. A missing file
    /// yields a fresh manifest; anything unreadable is fatal.
    pub fn load(options: ManifestOptions) -> Result<Self> {
        let path = options.dir.join(MANIFEST_FILE);
        if !path.exists() {
            info!("No manifest at {}, starting empty", path.display());
            return Ok(Self::new(options));
        }

        let file = File::open(&path)
            .with_context(|| format!("opening manifest {}", path.display()))?;
        let mmap = unsafe { Mmap::map(&file) }
            .with_context(|| format!("mapping manifest {}", path.display()))?;
        let (version, level_ids) = parse_manifest(&mmap).map_err(|e| match e {
            Error::Corruption { details } => Error::Manifest {
                message: format!("{}: {}", path.display(), details),
            },
            other => other,
        })?;

        let mut seen = HashSet::new();
        let mut max_sst_id = 0;
        let mut levels = Vec::with_capacity(level_ids.len().max(1));
        for ids in level_ids {
            let mut tables = Vec::with_capacity(ids.len());
            for id in ids {
                if !seen.insert(id) {
                    return Err(Error::Manifest {
                        message: format!("SSTable {} listed twice", id),
                    });
                }
                let table = SSTable::open(&options.dir, id).map_err(|e| Error::Manifest {
                    message: format!("loading SSTable {}: {}", id, e),
                })?;
                max_sst_id = max_sst_id.max(id);
                tables.push(Arc::new(table));
            }
            levels.push(Level::from_tables(tables));
        }
        if levels.is_empty() {
            levels.push(Level::default());
        }

        let manifest = Self {
            version,
            levels,
            max_sst_id,
            options: Arc::new(options),
        };
        info!(
            "Loaded manifest version {}: {} levels, {} tables",
            manifest.version,
            manifest.levels.len(),
            manifest.table_count()
        );
        Ok(manifest)
    }

    /// Write the manifest file, replacing any previous one. Returns the
    /// number of bytes written.
    pub fn save(&self) -> Result<u64> {
        let size = 2 * WORD
            + self
                .levels
                .iter()
                .map(|l| (l.len() + 1) * WORD)
                .sum::<usize>();

        let tmp = self.options.dir.join(MANIFEST_TMP_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)
            .with_context(|| format!("creating {}", tmp.display()))?;
        file.set_len(size as u64)
            .with_context(|| format!("sizing {}", tmp.display()))?;

        let mut mmap = unsafe { MmapMut::map_mut(&file) }
            .with_context(|| format!("mapping {}", tmp.display()))?;
        {
            let mut cursor = Cursor::new(&mut mmap[..]);
            cursor.write_u64::<NativeEndian>(self.version)?;
            cursor.write_u64::<NativeEndian>(self.levels.len() as u64)?;
            for level in &self.levels {
                for table in level.tables() {
                    cursor.write_u64::<NativeEndian>(table.id())?;
                }
                cursor.write_u64::<NativeEndian>(LEVEL_END)?;
            }
            cursor.flush()?;
        }
        mmap.flush()
            .with_context(|| format!("flushing {}", tmp.display()))?;
        drop(mmap);

        let path = self.path();
        fs::rename(&tmp, &path)
            .with_context(|| format!("replacing {}", path.display()))?;
        debug!("Saved manifest version {} ({} bytes)", self.version, size);
        Ok(size as u64)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Largest table id ever referenced; new ids are allocated above it
    pub fn max_sst_id(&self) -> u64 {
        self.max_sst_id
    }

    pub fn options(&self) -> &ManifestOptions {
        &self.options
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn level(&self, index: usize) -> Option<&Level> {
        self.levels.get(index)
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn table_count(&self) -> usize {
        self.levels.iter().map(Level::len).sum()
    }

    pub fn table_ids(&self) -> HashSet<u64> {
        self.levels
            .iter()
            .flat_map(|l| l.tables().iter().map(|t| t.id()))
            .collect()
    }

    /// Latest value for `key` across all levels
    pub fn get_ref(&self, key: &[u8]) -> Option<&[u8]> {
        let (first, rest) = self.levels.split_first()?;
        first
            .get_newest_first(key)
            .or_else(|| rest.iter().find_map(|level| level.get_sorted(key)))
    }

    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.get_ref(key).map(Bytes::copy_from_slice)
    }

    /// Next version: this one plus `table` appended to level 0
    pub fn insert_and_update(&self, table: Arc<SSTable>) -> Manifest {
        let mut next = self.clone();
        next.version += 1;
        next.max_sst_id = next.max_sst_id.max(table.id());
        next.levels[0].push(table);
        next
    }

    /// Level 0 is over its budget
    pub fn can_do_compaction(&self) -> bool {
        match (self.levels.first(), self.options.level_max_bytes.first()) {
            (Some(level), Some(&budget)) => level.binary_size() > budget,
            _ => false,
        }
    }

    /// Merge level 0 into level 1, then keep cascading while the level just
    /// filled is over its budget. The first output table gets `new_id`,
    /// later ones the next unused id.
    pub fn size_tiered_compaction(&mut self, new_id: u64) -> Result<CompactionOutcome> {
        let mut outcome = CompactionOutcome::default();
        let mut id = new_id;
        let budgets = self.options.level_max_bytes.clone();

        for (level, &budget) in budgets.iter().enumerate() {
            let over_budget = self
                .levels
                .get(level)
                .map_or(false, |l| !l.is_empty() && l.binary_size() > budget);
            if !over_budget {
                break;
            }

            let (merged, superseded) = self.compact_level(level, id)?;
            outcome.created.push(merged.id());
            outcome.bytes_written += merged.binary_size();
            outcome.bytes_read += superseded.iter().map(|t| t.binary_size()).sum::<u64>();
            outcome.superseded.extend(superseded);
            outcome.levels.push(level);
            id = self.max_sst_id + 1;
        }

        if !outcome.is_empty() {
            info!(
                "Compaction cascade over levels {:?} wrote tables {:?}, now {} levels",
                outcome.levels,
                outcome.created,
                self.levels.len()
            );
        }
        Ok(outcome)
    }

    /// Merge every table of `level` with the overlapping tables of
    /// `level + 1` into one new table `new_id`. Returns the new table and
    /// the tables it replaces.
    pub fn compact_level(
        &mut self,
        level: usize,
        new_id: u64,
    ) -> Result<(Arc<SSTable>, Vec<Arc<SSTable>>)> {
        let source = match self.levels.get(level) {
            Some(l) if !l.is_empty() => l.tables().to_vec(),
            _ => {
                return Err(Error::Compaction {
                    reason: format!("level {} has no tables to compact", level),
                })
            }
        };
        if self.table_ids().contains(&new_id) {
            return Err(Error::Compaction {
                reason: format!("SSTable id {} is already in use", new_id),
            });
        }
        if level + 1 == self.levels.len() {
            self.levels.push(Level::default());
        }

        let plan = CompactionPlan::new(&source, self.levels[level + 1].tables());
        let merged = Arc::new(
            plan.execute(&self.options.dir, new_id, &self.options.table)
                .map_err(|e| Error::Compaction {
                    reason: format!("merging level {} into {}: {}", level, level + 1, e),
                })?,
        );
        let (destination, superseded) = plan.assemble(Arc::clone(&merged));

        self.levels[level] = Level::default();
        self.levels[level + 1] = Level::from_tables(destination);
        self.max_sst_id = self.max_sst_id.max(new_id);
        Ok((merged, superseded))
    }

    /// Every live entry, newest value per key, in key order
    pub fn iter(&self) -> MergeIterator<'_> {
        let mut tables: Vec<&SSTable> = Vec::with_capacity(self.table_count());
        if let Some((first, rest)) = self.levels.split_first() {
            tables.extend(first.tables().iter().rev().map(|t| &**t));
            for level in rest {
                tables.extend(level.tables().iter().map(|t| &**t));
            }
        }
        MergeIterator::new(tables)
    }
}

impl std::fmt::Debug for Manifest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manifest")
            .field("version", &self.version)
            .field("max_sst_id", &self.max_sst_id)
            .field(
                "levels",
                &self.levels.iter().map(Level::ids).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// `(version, ids per level)`
fn parse_manifest(buf: &[u8]) -> Result<(u64, Vec<Vec<u64>>)> {
    let mut decoder = Decoder::new(buf, 0);
    let version = decoder.u64("version")?;
    let level_count = decoder.length("level_count")?;
    if level_count > decoder.remaining() / WORD {
        return Err(Error::corruption(format!(
            "level_count {} cannot fit in {} bytes",
            level_count,
            buf.len()
        )));
    }

    let mut levels = Vec::with_capacity(level_count);
    for _ in 0..level_count {
        let mut ids = Vec::new();
        loop {
            let id = decoder.u64("table id")?;
            if id == LEVEL_END {
                break;
            }
            ids.push(id);
        }
        levels.push(ids);
    }
    if decoder.remaining() != 0 {
        return Err(Error::corruption(format!(
            "{} trailing bytes",
            decoder.remaining()
        )));
    }
    Ok((version, levels))
}

/// Remove files in `dir` that look like tables but are not in `live`
pub fn remove_orphan_tables(dir: &Path, live: &HashSet<u64>) -> Result<Vec<u64>> {
    let mut removed = Vec::new();
    let entries =
        fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("listing {}", dir.display()))?;
        let name = entry.file_name();
        let id = match name.to_str().and_then(crate::sstable::parse_sstable_file_name) {
            Some(id) => id,
            None => continue,
        };
        if live.contains(&id) {
            continue;
        }
        fs::remove_file(entry.path())
            .with_context(|| format!("removing orphan {}", entry.path().display()))?;
        removed.push(id);
    }
    removed.sort_unstable();
    Ok(removed)
}
