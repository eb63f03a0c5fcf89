//! Per-block bloom filter
//!
//! Each data block carries its own filter so a point lookup can skip the
//! block's binary search for most absent keys. Sizing follows
//!
//! ```text
//! bit_length = floor(-ln(p) * n / ln(2)^2 * 2.35) + 1
//! hash_count = max(1, floor(0.69 * bit_length / n))
//! ```
//!
//! Each hash function is a seeded polynomial over the key bytes
//! (`h = h * seed + byte`, wrapping), reduced modulo `bit_length`.
//!
//! ## Serialized form
//!
//! ```text
//! ┌────────────┬────────────┬──────────────────┬─────────┬─────────────────────┐
//! │ hash_count │ bit_length │ seeds[hash_count]│ padding │ words[bit_length/64+1]│
//! │    u64     │    u64     │       u64        │ 8 bytes │        u64          │
//! └────────────┴────────────┴──────────────────┴─────────┴─────────────────────┘
//! ```
//!
//! The header and seeds are always a whole number of words, so the padding
//! `8 - (offset % 8)` is always a full word.

use byteorder::{NativeEndian, WriteBytesExt};

use tidekv_core::error::{Error, Result};
use tidekv_core::RandomSource;

use crate::sstable::types::{Decoder, WORD};

const LN2: f64 = std::f64::consts::LN_2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    seeds: Vec<u64>,
    bit_length: u64,
    words: Vec<u64>,
}

impl BloomFilter {
    /// Size a filter for `expected_items` keys at false-positive rate `fp_rate`
    pub fn new(expected_items: usize, fp_rate: f64, rng: &RandomSource) -> Self {
        let n = expected_items.max(1) as f64;
        let bit_length = (-fp_rate.ln() * n / LN2 / LN2 * 2.35) as u64 + 1;
        let hash_count = ((0.69 * bit_length as f64 / n) as usize).max(1);

        // Odd multipliers keep every key byte in the low bits of the hash
        let seeds = (0..hash_count).map(|_| rng.next_u64() | 1).collect();

        Self {
            seeds,
            bit_length,
            words: vec![0; Self::word_count(bit_length)],
        }
    }

    fn word_count(bit_length: u64) -> usize {
        (bit_length / 64) as usize + 1
    }

    #[inline]
    fn hash(seed: u64, key: &[u8]) -> u64 {
        key.iter()
            .fold(0u64, |h, &b| h.wrapping_mul(seed).wrapping_add(b as u64))
    }

    pub fn insert(&mut self, key: &[u8]) {
        for &seed in &self.seeds {
            let pos = Self::hash(seed, key) % self.bit_length;
            self.words[(pos / 64) as usize] |= 1u64 << (pos % 64);
        }
    }

    /// `false` means the key is definitely absent
    pub fn may_contain(&self, key: &[u8]) -> bool {
        self.seeds.iter().all(|&seed| {
            let pos = Self::hash(seed, key) % self.bit_length;
            self.words[(pos / 64) as usize] & (1u64 << (pos % 64)) != 0
        })
    }

    pub fn hash_count(&self) -> usize {
        self.seeds.len()
    }

    pub fn bit_length(&self) -> u64 {
        self.bit_length
    }

    fn header_len(&self) -> usize {
        2 * WORD + self.seeds.len() * WORD
    }

    fn padding(&self) -> usize {
        WORD - self.header_len() % WORD
    }

    /// Bytes [`encode_into`](Self::encode_into) will append
    pub fn encoded_len(&self) -> usize {
        self.header_len() + self.padding() + self.words.len() * WORD
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<()> {
        out.write_u64::<NativeEndian>(self.seeds.len() as u64)?;
        out.write_u64::<NativeEndian>(self.bit_length)?;
        for &seed in &self.seeds {
            out.write_u64::<NativeEndian>(seed)?;
        }
        out.extend(std::iter::repeat(0u8).take(self.padding()));
        for &word in &self.words {
            out.write_u64::<NativeEndian>(word)?;
        }
        Ok(())
    }

    /// Parse a filter at the decoder's position, leaving it just past the bit words
    pub(crate) fn decode(decoder: &mut Decoder<'_>) -> Result<Self> {
        let hash_count = decoder.length("bloom hash_count")?;
        let bit_length = decoder.u64("bloom bit_length")?;
        if hash_count == 0 || bit_length == 0 {
            return Err(Error::corruption(format!(
                "bloom filter with {} hashes over {} bits",
                hash_count, bit_length
            )));
        }
        if hash_count > decoder.remaining() / WORD {
            return Err(Error::corruption(format!(
                "bloom hash_count {} exceeds block",
                hash_count
            )));
        }

        let seeds = (0..hash_count)
            .map(|_| decoder.u64("bloom seed"))
            .collect::<Result<Vec<_>>>()?;

        let header_len = 2 * WORD + hash_count * WORD;
        decoder.skip(WORD - header_len % WORD, "bloom padding")?;

        let word_count = Self::word_count(bit_length);
        if word_count > decoder.remaining() / WORD {
            return Err(Error::corruption(format!(
                "bloom bit_length {} exceeds block",
                bit_length
            )));
        }
        let words = (0..word_count)
            .map(|_| decoder.u64("bloom word"))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            seeds,
            bit_length,
            words,
        })
    }
}
