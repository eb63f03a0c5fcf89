//! # SSTable - Sorted String Table
//!
//! SSTables are immutable, sorted files produced by flushing a memtable or
//! by compaction. Every integer is a native-endian u64; there is no
//! compression and no checksum.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    SSTable File Structure                    │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │ Index Block                                            │  │
//! │  │  total_size | entry_count                              │  │
//! │  │  (block_offset | first_key_len | first_key)*           │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │ Data Block 1                                           │  │
//! │  │  block_size | BloomFilter | entry_count                │  │
//! │  │  (key_len | value_len | key | value)*                  │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! │  Data Block 2 ...                                            │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! A point lookup binary-searches the index for the rightmost block whose
//! first key is not greater than the target, asks that block's bloom filter,
//! then binary-searches the block's entries.

mod bloom;
mod builder;
mod iterator;
mod reader;
mod types;
mod writer;

pub use bloom::BloomFilter;
pub use builder::{entry_encoded_len, BlockBuilder, IndexBuilder};
pub use iterator::SSTableIterator;
pub use reader::SSTable;
pub use types::{
    parse_sstable_file_name, sstable_file_name, sstable_path, SSTableInfo, SSTableOptions,
    SSTABLE_EXTENSION, WORD,
};
pub use writer::SSTableWriter;

pub(crate) use types::Decoder;
