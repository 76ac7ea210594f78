//! Channel cache blocks
//!
//! A block covers `[index * size, index * size + size)` of the sequence
//! space for one channel and records which of those sequences the channel
//! has seen. Blocks are merged, never overwritten: presence bits are
//! unioned and metadata fields take the maximum.

use serde::{Deserialize, Serialize};

use crate::bitset::SequenceBitset;

/// Index of the block owning `seq`
pub fn block_index(seq: u64, block_size: u64) -> u64 {
    seq / block_size
}

/// Metadata carried alongside the presence bits
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMeta {
    /// Highest sequence recorded in this block
    pub high_seq: u64,
    /// Last time a writer touched this block (Unix millis)
    pub updated_at_millis: i64,
}

impl BlockMeta {
    fn merge(&mut self, other: &BlockMeta) {
        self.high_seq = self.high_seq.max(other.high_seq);
        self.updated_at_millis = self.updated_at_millis.max(other.updated_at_millis);
    }
}

/// Presence record for one `(channel, block_index)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheBlock {
    channel: String,
    index: u64,
    block_size: u64,
    bits: SequenceBitset,
    meta: BlockMeta,
}

impl CacheBlock {
    /// Create an empty block
    pub fn new(channel: impl Into<String>, index: u64, block_size: u64) -> Self {
        Self {
            channel: channel.into(),
            index,
            block_size,
            bits: SequenceBitset::new(block_size),
            meta: BlockMeta::default(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn meta(&self) -> &BlockMeta {
        &self.meta
    }

    /// First sequence covered by this block
    pub fn start_seq(&self) -> u64 {
        self.index * self.block_size
    }

    /// Whether `seq` falls inside this block's range
    pub fn covers(&self, seq: u64) -> bool {
        block_index(seq, self.block_size) == self.index
    }

    /// Record `seq`, returning whether it was newly recorded
    ///
    /// Sequences owned by another block are ignored.
    pub fn add_sequence(&mut self, seq: u64) -> bool {
        if !self.covers(seq) {
            return false;
        }
        let added = self.bits.set(seq - self.start_seq());
        self.meta.high_seq = self.meta.high_seq.max(seq);
        self.meta.updated_at_millis = chrono::Utc::now().timestamp_millis();
        added
    }

    pub fn has_sequence(&self, seq: u64) -> bool {
        self.covers(seq) && self.bits.contains(seq - self.start_seq())
    }

    /// Union another copy of the same block into this one
    pub fn merge(&mut self, other: &CacheBlock) {
        debug_assert_eq!(self.index, other.index);
        self.bits.union_with(&other.bits);
        self.meta.merge(&other.meta);
    }

    /// Recorded sequences strictly greater than `since`, ascending
    pub fn sequences_after(&self, since: u64) -> impl Iterator<Item = u64> + '_ {
        let start = self.start_seq();
        let first_offset = if since < start {
            0
        } else {
            since - start + 1
        };
        self.bits.iter_from(first_offset).map(move |o| start + o)
    }

    /// Every recorded sequence, ascending
    pub fn sequences(&self) -> impl Iterator<Item = u64> + '_ {
        let start = self.start_seq();
        self.bits.iter().map(move |o| start + o)
    }

    /// Number of recorded sequences
    pub fn len(&self) -> u64 {
        self.bits.count()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_boundaries() {
        assert_eq!(block_index(9_999, 10_000), 0);
        assert_eq!(block_index(10_000, 10_000), 1);

        let mut first = CacheBlock::new("ABC", 0, 10_000);
        let mut second = CacheBlock::new("ABC", 1, 10_000);
        assert!(first.add_sequence(9_999));
        assert!(!first.add_sequence(10_000));
        assert!(second.add_sequence(10_000));

        assert!(first.has_sequence(9_999));
        assert!(!first.has_sequence(10_000));
        assert!(second.has_sequence(10_000));
        assert_eq!(second.start_seq(), 10_000);
    }

    #[test]
    fn test_merge_is_union_and_max() {
        let mut a = CacheBlock::new("ABC", 0, 100);
        let mut b = CacheBlock::new("ABC", 0, 100);
        a.add_sequence(5);
        b.add_sequence(7);
        b.add_sequence(50);

        a.merge(&b);
        assert_eq!(a.sequences().collect::<Vec<_>>(), vec![5, 7, 50]);
        assert_eq!(a.meta().high_seq, 50);

        // Merging an older copy back in changes nothing
        let snapshot = a.clone();
        let mut older = CacheBlock::new("ABC", 0, 100);
        older.add_sequence(5);
        a.merge(&older);
        assert_eq!(a.sequences().collect::<Vec<_>>(), snapshot.sequences().collect::<Vec<_>>());
        assert_eq!(a.meta().high_seq, 50);
    }

    #[test]
    fn test_sequences_after() {
        let mut block = CacheBlock::new("ABC", 1, 100);
        for seq in [100, 101, 150, 199] {
            block.add_sequence(seq);
        }
        assert_eq!(block.sequences_after(0).collect::<Vec<_>>(), vec![100, 101, 150, 199]);
        assert_eq!(block.sequences_after(100).collect::<Vec<_>>(), vec![101, 150, 199]);
        assert_eq!(block.sequences_after(150).collect::<Vec<_>>(), vec![199]);
        assert_eq!(block.sequences_after(199).count(), 0);
    }

    #[test]
    fn test_postcard_size_is_bounded() {
        let empty = postcard::to_allocvec(&CacheBlock::new("ABC", 0, 10_000)).unwrap();
        let mut full = CacheBlock::new("ABC", 0, 10_000);
        for seq in 0..10_000 {
            full.add_sequence(seq);
        }
        let full = postcard::to_allocvec(&full).unwrap();
        // Fixed-size words: bounded by one varint per 64 sequences
        assert!(full.len() <= (10_000 / 64 + 1) * 10 + 64);
        assert!(empty.len() < full.len());
    }
}
