//! Block and index builders for SSTable

use byteorder::{NativeEndian, WriteBytesExt};

use tidekv_core::error::Result;
use tidekv_core::RandomSource;

use crate::sstable::types::WORD;
use crate::sstable::BloomFilter;

/// Bytes one entry occupies inside a data block
#[inline]
pub fn entry_encoded_len(key: &[u8], value: &[u8]) -> usize {
    2 * WORD + key.len() + value.len()
}

/// Builder for SSTable data blocks
///
/// ```text
/// block_size | BloomFilter | entry_count | (key_len value_len key value)*
/// ```
pub struct BlockBuilder<'a> {
    entries: Vec<(&'a [u8], &'a [u8])>,
    payload: usize,
    max_payload: usize,
}

impl<'a> BlockBuilder<'a> {
    pub fn new(max_payload: usize) -> Self {
        Self {
            entries: Vec::new(),
            payload: 0,
            max_payload,
        }
    }

    /// Add a key-value pair to the block
    /// Returns false if the block is full; an empty block takes any entry
    pub fn add(&mut self, key: &'a [u8], value: &'a [u8]) -> bool {
        let entry_size = entry_encoded_len(key, value);
        if !self.is_empty() && self.payload + entry_size > self.max_payload {
            return false;
        }
        self.entries.push((key, value));
        self.payload += entry_size;
        true
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn first_key(&self) -> Option<&'a [u8]> {
        self.entries.first().map(|(k, _)| *k)
    }

    /// Encode the block, building its bloom filter from the buffered keys
    pub fn finish(&mut self, fp_rate: f64, rng: &RandomSource) -> Result<Vec<u8>> {
        let mut bloom = BloomFilter::new(self.entries.len(), fp_rate, rng);
        for (key, _) in &self.entries {
            bloom.insert(key);
        }

        let block_size = WORD + bloom.encoded_len() + WORD + self.payload;
        let mut out = Vec::with_capacity(block_size);
        out.write_u64::<NativeEndian>(block_size as u64)?;
        bloom.encode_into(&mut out)?;
        out.write_u64::<NativeEndian>(self.entries.len() as u64)?;
        for (key, value) in self.entries.drain(..) {
            out.write_u64::<NativeEndian>(key.len() as u64)?;
            out.write_u64::<NativeEndian>(value.len() as u64)?;
            out.extend_from_slice(key);
            out.extend_from_slice(value);
        }
        debug_assert_eq!(out.len(), block_size);

        self.payload = 0;
        Ok(out)
    }
}

/// Builder for the index block that opens every table
///
/// ```text
/// total_size | entry_count | (block_offset first_key_len first_key)*
/// ```
#[derive(Default)]
pub struct IndexBuilder {
    first_keys: Vec<Vec<u8>>,
}

impl IndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the next block by its first key
    pub fn add_block(&mut self, first_key: &[u8]) {
        self.first_keys.push(first_key.to_vec());
    }

    pub fn block_count(&self) -> usize {
        self.first_keys.len()
    }

    /// Size of the encoded index; the first data block starts here
    pub fn encoded_len(&self) -> usize {
        2 * WORD
            + self
                .first_keys
                .iter()
                .map(|k| 2 * WORD + k.len())
                .sum::<usize>()
    }

    /// Encode the index given the byte size of each data block, in order
    pub fn finish(&self, block_sizes: &[usize]) -> Result<Vec<u8>> {
        debug_assert_eq!(block_sizes.len(), self.first_keys.len());
        let total_size = self.encoded_len();
        let mut out = Vec::with_capacity(total_size);
        out.write_u64::<NativeEndian>(total_size as u64)?;
        out.write_u64::<NativeEndian>(self.first_keys.len() as u64)?;

        let mut offset = total_size;
        for (first_key, size) in self.first_keys.iter().zip(block_sizes) {
            out.write_u64::<NativeEndian>(offset as u64)?;
            out.write_u64::<NativeEndian>(first_key.len() as u64)?;
            out.extend_from_slice(first_key);
            offset += size;
        }
        Ok(out)
    }
}
