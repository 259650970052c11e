//! Utility types shared by the segment bookkeeping
//!
//! [`Bitmap`] backs the per-segment valid-block maps as well as the dirty,
//! free and victim section maps.

const WORD_BITS: usize = u64::BITS as usize;

/// Fixed-length bitmap stored as 64-bit words
#[derive(Clone, PartialEq, Eq)]
pub struct Bitmap {
    words: Vec<u64>,
    len: usize,
}

impl Bitmap {
    /// Create a bitmap of `len` cleared bits
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(WORD_BITS)],
            len,
        }
    }

    /// Number of bits
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the bitmap holds no bits at all
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Test bit `idx`; out-of-range bits read as clear
    #[inline]
    pub fn get(&self, idx: usize) -> bool {
        if idx >= self.len {
            return false;
        }
        self.words[idx / WORD_BITS] & (1 << (idx % WORD_BITS)) != 0
    }

    /// Set bit `idx`, returning its previous value
    #[inline]
    pub fn set(&mut self, idx: usize) -> bool {
        debug_assert!(idx < self.len);
        let word = &mut self.words[idx / WORD_BITS];
        let mask = 1 << (idx % WORD_BITS);
        let prev = *word & mask != 0;
        *word |= mask;
        prev
    }

    /// Clear bit `idx`, returning its previous value
    #[inline]
    pub fn clear(&mut self, idx: usize) -> bool {
        debug_assert!(idx < self.len);
        let word = &mut self.words[idx / WORD_BITS];
        let mask = 1 << (idx % WORD_BITS);
        let prev = *word & mask != 0;
        *word &= !mask;
        prev
    }

    /// Number of set bits
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// First set bit in `[from, end)`, or `end` if there is none.
    pub fn find_next_bit(&self, from: usize, end: usize) -> usize {
        let end = end.min(self.len);
        if from >= end {
            return end;
        }
        let mut word_idx = from / WORD_BITS;
        let mut word = self.words[word_idx] & (u64::MAX << (from % WORD_BITS));
        loop {
            if word != 0 {
                let idx = word_idx * WORD_BITS + word.trailing_zeros() as usize;
                return idx.min(end);
            }
            word_idx += 1;
            if word_idx * WORD_BITS >= end {
                return end;
            }
            word = self.words[word_idx];
        }
    }

    /// Iterate over the indices of set bits
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        let mut next = 0;
        std::iter::from_fn(move || {
            let idx = self.find_next_bit(next, self.len);
            if idx >= self.len {
                return None;
            }
            next = idx + 1;
            Some(idx)
        })
    }
}

impl std::fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bitmap")
            .field("len", &self.len)
            .field("ones", &self.count_ones())
            .finish()
    }
}
