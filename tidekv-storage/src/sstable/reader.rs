//! SSTable reader implementation
//!
//! An open table is a read-only mapping plus a parsed index of byte ranges
//! into it. Nothing is copied at open time; lookups return slices of the
//! mapping (or [`Bytes`] copies of them).

use std::fs::{self, File};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use memmap2::Mmap;
use tracing::{debug, warn};

use tidekv_core::error::{Error, Result, ResultExt};

use crate::sstable::types::{sstable_path, Decoder, SSTableInfo, WORD};
use crate::sstable::{BloomFilter, SSTableIterator, SSTableOptions, SSTableWriter};

/// Immutable, memory-mapped sorted table
pub struct SSTable {
    id: u64,
    path: PathBuf,
    mmap: Mmap,
    blocks: Vec<DataBlock>,
    entry_count: u64,
    obsolete: AtomicBool,
}

pub(crate) struct DataBlock {
    pub(crate) first_key: Range<usize>,
    pub(crate) bloom: BloomFilter,
    pub(crate) entries: Vec<EntryHandle>,
}

#[derive(Debug, Clone)]
pub(crate) struct EntryHandle {
    pub(crate) key: Range<usize>,
    pub(crate) value: Range<usize>,
}

impl SSTable {
    /// Build `<dir>/<id>.sst` from sorted, deduplicated entries and open it
    pub fn create<K, V>(
        dir: impl AsRef<Path>,
        id: u64,
        entries: &[(K, V)],
        options: &SSTableOptions,
    ) -> Result<Self>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        SSTableWriter::new(dir, id, options.clone()).write(entries)
    }

    /// Map and parse an existing `<dir>/<id>.sst`
    pub fn open(dir: impl AsRef<Path>, id: u64) -> Result<Self> {
        let path = sstable_path(dir.as_ref(), id);
        let file = File::open(&path)
            .with_context(|| format!("opening SSTable {}", path.display()))?;
        let file_size = file
            .metadata()
            .with_context(|| format!("stat SSTable {}", path.display()))?
            .len();
        if file_size < (2 * WORD) as u64 {
            return Err(Error::corruption(format!(
                "SSTable {} is {} bytes, too small for an index",
                path.display(),
                file_size
            )));
        }

        let mmap = unsafe { Mmap::map(&file) }
            .with_context(|| format!("mapping SSTable {}", path.display()))?;
        Self::from_mmap(id, path, mmap)
    }

    pub(crate) fn from_mmap(id: u64, path: PathBuf, mmap: Mmap) -> Result<Self> {
        let blocks = parse_table(&mmap).map_err(|e| match e {
            Error::Corruption { details } => Error::corruption(format!(
                "SSTable {}: {}",
                path.display(),
                details
            )),
            other => other,
        })?;
        let entry_count = blocks.iter().map(|b| b.entries.len() as u64).sum();

        debug!(
            "Opened SSTable {}: {} blocks, {} entries, {} bytes",
            id,
            blocks.len(),
            entry_count,
            mmap.len()
        );

        Ok(Self {
            id,
            path,
            mmap,
            blocks,
            entry_count,
            obsolete: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the file in bytes
    pub fn binary_size(&self) -> u64 {
        self.mmap.len() as u64
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub(crate) fn bytes(&self, range: &Range<usize>) -> &[u8] {
        &self.mmap[range.clone()]
    }

    pub(crate) fn blocks(&self) -> &[DataBlock] {
        &self.blocks
    }

    /// Point lookup returning a slice of the mapping
    pub fn get_ref(&self, key: &[u8]) -> Option<&[u8]> {
        // Rightmost block whose first key is <= key
        let idx = self
            .blocks
            .partition_point(|b| self.bytes(&b.first_key) <= key);
        let block = self.blocks.get(idx.checked_sub(1)?)?;
        if !block.bloom.may_contain(key) {
            return None;
        }
        let pos = block
            .entries
            .binary_search_by(|e| self.bytes(&e.key).cmp(key))
            .ok()?;
        Some(self.bytes(&block.entries[pos].value))
    }

    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.get_ref(key).map(Bytes::copy_from_slice)
    }

    /// Smallest key in the table
    pub fn first_key(&self) -> &[u8] {
        match self.blocks.first() {
            Some(block) => self.bytes(&block.first_key),
            None => &[],
        }
    }

    /// Largest key in the table
    pub fn last_key(&self) -> &[u8] {
        self.last_entry().map(|(k, _)| k).unwrap_or_default()
    }

    pub fn last_entry(&self) -> Option<(&[u8], &[u8])> {
        let entry = self.blocks.last()?.entries.last()?;
        Some((self.bytes(&entry.key), self.bytes(&entry.value)))
    }

    /// Entries in ascending key order
    pub fn iter(&self) -> SSTableIterator<'_> {
        SSTableIterator::new(self)
    }

    pub fn info(&self) -> SSTableInfo {
        SSTableInfo {
            id: self.id,
            path: self.path.clone(),
            file_size: self.binary_size(),
            entry_count: self.entry_count,
            block_count: self.blocks.len(),
            first_key: self.first_key().to_vec(),
            last_key: self.last_key().to_vec(),
        }
    }

    /// Unlink the file once the last handle to this table is dropped
    pub fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::Release);
    }

    pub fn is_obsolete(&self) -> bool {
        self.obsolete.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for SSTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SSTable")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("blocks", &self.blocks.len())
            .field("entries", &self.entry_count)
            .finish()
    }
}

impl Drop for SSTable {
    fn drop(&mut self) {
        if !self.is_obsolete() {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed obsolete SSTable {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove obsolete SSTable {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

/// Parse the index block and every data block it points at
fn parse_table(buf: &[u8]) -> Result<Vec<DataBlock>> {
    let mut index = Decoder::new(buf, 0);
    let index_size = index.length("index total_size")?;
    if index_size < 2 * WORD || index_size > buf.len() {
        return Err(Error::corruption(format!(
            "index size {} outside file of {} bytes",
            index_size,
            buf.len()
        )));
    }
    let block_count = index.length("index entry_count")?;
    if block_count == 0 {
        return Err(Error::corruption("index lists no data blocks"));
    }
    if block_count > (index_size - 2 * WORD) / (2 * WORD) {
        return Err(Error::corruption(format!(
            "index entry_count {} cannot fit in {} bytes",
            block_count, index_size
        )));
    }

    // Blocks follow the index back to back
    let mut expected_offset = index_size;
    let mut blocks = Vec::with_capacity(block_count);
    for i in 0..block_count {
        let offset = index.length("block_offset")?;
        let key_len = index.length("first_key_len")?;
        let first_key = index.span(key_len, "first_key")?;
        if offset != expected_offset {
            return Err(Error::corruption(format!(
                "block {} at offset {}, expected {}",
                i, offset, expected_offset
            )));
        }
        let (block, end) = parse_block(buf, offset, first_key)?;
        expected_offset = end;
        blocks.push(block);
    }

    if index.position() != index_size {
        return Err(Error::corruption(format!(
            "index declares {} bytes but entries end at {}",
            index_size,
            index.position()
        )));
    }
    if expected_offset != buf.len() {
        return Err(Error::corruption(format!(
            "{} trailing bytes after last block",
            buf.len() - expected_offset
        )));
    }
    Ok(blocks)
}

/// Parse the data block at `offset`, returning it and its end offset
fn parse_block(buf: &[u8], offset: usize, first_key: Range<usize>) -> Result<(DataBlock, usize)> {
    let size = Decoder::new(buf, offset).length("block_size")?;
    let end = offset
        .checked_add(size)
        .filter(|&end| size >= 2 * WORD && end <= buf.len())
        .ok_or_else(|| {
            Error::corruption(format!(
                "block at {} claims {} bytes of a {} byte file",
                offset,
                size,
                buf.len()
            ))
        })?;

    let mut decoder = Decoder::new(&buf[..end], offset + WORD);
    let bloom = BloomFilter::decode(&mut decoder)?;
    let count = decoder.length("entry_count")?;
    if count == 0 || count > decoder.remaining() / (2 * WORD) {
        return Err(Error::corruption(format!(
            "block at {} has impossible entry_count {}",
            offset, count
        )));
    }

    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let key_len = decoder.length("key_len")?;
        let value_len = decoder.length("value_len")?;
        let key = decoder.span(key_len, "key")?;
        let value = decoder.span(value_len, "value")?;
        entries.push(EntryHandle { key, value });
    }
    if decoder.position() != end {
        return Err(Error::corruption(format!(
            "block at {} has {} unused bytes",
            offset,
            end - decoder.position()
        )));
    }
    if buf[first_key.clone()] != buf[entries[0].key.clone()] {
        return Err(Error::corruption(format!(
            "index first key does not match block at {}",
            offset
        )));
    }

    Ok((
        DataBlock {
            first_key,
            bloom,
            entries,
        },
        end,
    ))
}
