//! Fixed-size presence bitset
//!
//! One bit per sequence offset inside a block. The length is fixed at
//! construction, so memory and encoded size per block are bounded by the
//! block size.

use serde::{Deserialize, Serialize};

const WORD_BITS: u64 = 64;

/// Fixed-capacity bitset over offsets `0..len`
///
/// Decoding rejects a word count that does not match `len`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BitsetRepr", into = "BitsetRepr")]
pub struct SequenceBitset {
    len: u64,
    words: Vec<u64>,
}

/// Wire form of [`SequenceBitset`]
#[derive(Serialize, Deserialize)]
struct BitsetRepr {
    len: u64,
    words: Vec<u64>,
}

impl TryFrom<BitsetRepr> for SequenceBitset {
    type Error = String;

    fn try_from(repr: BitsetRepr) -> Result<Self, Self::Error> {
        let expected = repr.len.div_ceil(WORD_BITS);
        if repr.words.len() as u64 != expected {
            return Err(format!(
                "bitset of {} bits needs {} words, found {}",
                repr.len,
                expected,
                repr.words.len()
            ));
        }
        Ok(Self {
            len: repr.len,
            words: repr.words,
        })
    }
}

impl From<SequenceBitset> for BitsetRepr {
    fn from(bits: SequenceBitset) -> Self {
        Self {
            len: bits.len,
            words: bits.words,
        }
    }
}

impl SequenceBitset {
    /// Create an empty bitset holding `len` bits
    pub fn new(len: u64) -> Self {
        Self {
            len,
            words: vec![0; len.div_ceil(WORD_BITS) as usize],
        }
    }

    /// Capacity in bits
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether no bit is set
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Set a bit, returning whether it was newly set
    ///
    /// Offsets outside the capacity are ignored and return `false`.
    pub fn set(&mut self, offset: u64) -> bool {
        if offset >= self.len {
            return false;
        }
        let (word, mask) = Self::locate(offset);
        let was_set = self.words[word] & mask != 0;
        self.words[word] |= mask;
        !was_set
    }

    /// Whether a bit is set; out-of-range offsets are never set
    pub fn contains(&self, offset: u64) -> bool {
        if offset >= self.len {
            return false;
        }
        let (word, mask) = Self::locate(offset);
        self.words[word] & mask != 0
    }

    /// Union `other` into `self`
    ///
    /// Never clears a bit. Bits of `other` beyond this capacity are dropped.
    pub fn union_with(&mut self, other: &SequenceBitset) {
        for (mine, theirs) in self.words.iter_mut().zip(&other.words) {
            *mine |= *theirs;
        }
        self.clear_tail();
    }

    /// Number of set bits
    pub fn count(&self) -> u64 {
        self.words.iter().map(|w| u64::from(w.count_ones())).sum()
    }

    /// Set offsets in ascending order
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.iter_from(0)
    }

    /// Set offsets `>= start` in ascending order
    pub fn iter_from(&self, start: u64) -> impl Iterator<Item = u64> + '_ {
        let first_word = (start / WORD_BITS) as usize;
        self.words
            .iter()
            .enumerate()
            .skip(first_word)
            .flat_map(move |(i, &word)| {
                let base = i as u64 * WORD_BITS;
                let mut remaining = if base < start {
                    word & (!0u64 << (start - base))
                } else {
                    word
                };
                std::iter::from_fn(move || {
                    if remaining == 0 {
                        return None;
                    }
                    let bit = u64::from(remaining.trailing_zeros());
                    remaining &= remaining - 1;
                    Some(base + bit)
                })
            })
    }

    fn locate(offset: u64) -> (usize, u64) {
        ((offset / WORD_BITS) as usize, 1u64 << (offset % WORD_BITS))
    }

    fn clear_tail(&mut self) {
        let used = self.len % WORD_BITS;
        if used != 0
            && let Some(last) = self.words.last_mut()
        {
            *last &= (1u64 << used) - 1;
        }
    }
}
