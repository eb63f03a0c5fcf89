//! SSTable types, file naming and the bounds-checked field decoder

use std::ops::Range;
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, NativeEndian};

use tidekv_core::error::{Error, Result};
use tidekv_core::{RandomSource, StorageConfig};

/// Every integer field in an SST or manifest file is one native-endian u64
pub const WORD: usize = std::mem::size_of::<u64>();

/// File extension of table files inside the data directory
pub const SSTABLE_EXTENSION: &str = "sst";

/// `<id>.sst`
pub fn sstable_file_name(id: u64) -> String {
    format!("{}.{}", id, SSTABLE_EXTENSION)
}

pub fn sstable_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(sstable_file_name(id))
}

/// Parse an id back out of a table file name; `None` for anything else
pub fn parse_sstable_file_name(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(SSTABLE_EXTENSION)?.strip_suffix('.')?;
    stem.parse().ok()
}

/// Knobs used when writing a table
#[derive(Debug, Clone)]
pub struct SSTableOptions {
    /// Entry payload (`16 + key + value` bytes per entry) that closes a block
    pub block_max_bytes: usize,
    pub bloom_false_positive_rate: f64,
    /// Source of bloom filter seeds
    pub rng: RandomSource,
}

impl SSTableOptions {
    pub fn from_config(config: &StorageConfig, rng: RandomSource) -> Self {
        Self {
            block_max_bytes: config.block_max_bytes,
            bloom_false_positive_rate: config.bloom_false_positive_rate,
            rng,
        }
    }
}

impl Default for SSTableOptions {
    fn default() -> Self {
        let config = StorageConfig::default();
        Self::from_config(&config, RandomSource::default())
    }
}

/// Summary of one open table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SSTableInfo {
    pub id: u64,
    pub path: PathBuf,
    pub file_size: u64,
    pub entry_count: u64,
    pub block_count: usize,
    pub first_key: Vec<u8>,
    pub last_key: Vec<u8>,
}

/// Cursor over an immutable byte buffer that refuses to read past its end.
///
/// Every failure is reported as [`Error::Corruption`] naming the field that
/// could not be read, so a truncated file never panics the reader.
pub(crate) struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub(crate) fn new(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub(crate) fn u64(&mut self, field: &str) -> Result<u64> {
        let range = self.span(WORD, field)?;
        Ok(NativeEndian::read_u64(&self.buf[range]))
    }

    /// A u64 that has to fit the address space
    pub(crate) fn length(&mut self, field: &str) -> Result<usize> {
        let value = self.u64(field)?;
        usize::try_from(value)
            .map_err(|_| Error::corruption(format!("{} {} does not fit in memory", field, value)))
    }

    /// Claim the next `len` bytes and return their absolute range
    pub(crate) fn span(&mut self, len: usize, field: &str) -> Result<Range<usize>> {
        if len > self.remaining() {
            return Err(Error::corruption(format!(
                "{} needs {} bytes at offset {} but only {} remain",
                field,
                len,
                self.pos,
                self.remaining()
            )));
        }
        let start = self.pos;
        self.pos += len;
        Ok(start..self.pos)
    }

    pub(crate) fn skip(&mut self, len: usize, field: &str) -> Result<()> {
        self.span(len, field).map(|_| ())
    }
}
