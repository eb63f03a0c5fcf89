//! SSTable writer implementation

use std::fs::OpenOptions;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use memmap2::MmapMut;
use tracing::{debug, info};

use tidekv_core::error::{Error, Result, ResultExt};

use crate::sstable::types::sstable_path;
use crate::sstable::{BlockBuilder, IndexBuilder, SSTable, SSTableOptions};

/// Writes one immutable table in a single pass over a sorted entry slice.
///
/// The blocks are encoded first so the exact file size is known; the file is
/// then truncated to that size, mapped writable, filled, flushed and reopened
/// as a read-only mapping that backs the returned [`SSTable`].
pub struct SSTableWriter {
    dir: PathBuf,
    id: u64,
    options: SSTableOptions,
}

impl SSTableWriter {
    pub fn new(dir: impl AsRef<Path>, id: u64, options: SSTableOptions) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            id,
            options,
        }
    }

    /// Write `entries`, which must be non-empty with strictly increasing keys
    pub fn write<K, V>(self, entries: &[(K, V)]) -> Result<SSTable>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        validate_entries(entries)?;

        let mut index = IndexBuilder::new();
        let mut blocks: Vec<Vec<u8>> = Vec::new();
        let mut block = BlockBuilder::new(self.options.block_max_bytes);
        let fp_rate = self.options.bloom_false_positive_rate;

        for (key, value) in entries {
            let (key, value) = (key.as_ref(), value.as_ref());
            if !block.add(key, value) {
                blocks.push(block.finish(fp_rate, &self.options.rng)?);
                let accepted = block.add(key, value);
                debug_assert!(accepted);
            }
            if block.len() == 1 {
                index.add_block(key);
            }
        }
        if !block.is_empty() {
            blocks.push(block.finish(fp_rate, &self.options.rng)?);
        }

        let block_sizes: Vec<usize> = blocks.iter().map(Vec::len).collect();
        let index_bytes = index.finish(&block_sizes)?;
        let total_size = index_bytes.len() + block_sizes.iter().sum::<usize>();

        let path = sstable_path(&self.dir, self.id);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .with_context(|| format!("creating SSTable {}", path.display()))?;
        file.set_len(total_size as u64)
            .with_context(|| format!("sizing SSTable {}", path.display()))?;

        let mut mmap = unsafe { MmapMut::map_mut(&file) }
            .with_context(|| format!("mapping SSTable {}", path.display()))?;
        {
            let mut cursor = Cursor::new(&mut mmap[..]);
            cursor.write_all(&index_bytes)?;
            for block in &blocks {
                cursor.write_all(block)?;
            }
            if cursor.position() as usize != total_size {
                return Err(Error::SSTable {
                    message: format!(
                        "SSTable {} wrote {} of {} bytes",
                        self.id,
                        cursor.position(),
                        total_size
                    ),
                });
            }
        }
        mmap.flush()
            .with_context(|| format!("flushing SSTable {}", path.display()))?;
        let mmap = mmap.make_read_only()?;

        debug!(
            "SSTable {} layout: index {} bytes, {} blocks",
            self.id,
            index_bytes.len(),
            blocks.len()
        );
        info!(
            "Finished writing SSTable {}: {} entries, {} bytes",
            self.id,
            entries.len(),
            total_size
        );

        SSTable::from_mmap(self.id, path, mmap)
    }
}

fn validate_entries<K: AsRef<[u8]>, V>(entries: &[(K, V)]) -> Result<()> {
    if entries.is_empty() {
        return Err(Error::InvalidArgument {
            message: "cannot build an SSTable from zero entries".to_string(),
        });
    }
    if let Some(pos) = entries
        .windows(2)
        .position(|w| w[0].0.as_ref() >= w[1].0.as_ref())
    {
        return Err(Error::InvalidArgument {
            message: format!(
                "SSTable keys must be strictly increasing (entry {} is not)",
                pos + 1
            ),
        });
    }
    Ok(())
}
