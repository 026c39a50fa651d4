//! A packed bit set with owned storage.
//!
//! All shift-and-mask arithmetic on packed words lives in this module; the
//! rest of the crate manipulates bits only through the checked accessors.

use alloc::{boxed::Box, vec};

#[derive(Clone, PartialEq, Eq)]
pub struct Bitmap {
    num_bits: usize,
    words: Box<[u64]>,
}

impl Bitmap {
    /// Constructs a new bitmap of `num_bits` bits, all clear.
    pub fn new(num_bits: usize) -> Bitmap {
        assert!(num_bits > 0);

        let num_words = Self::num_words(num_bits);

        Bitmap {
            num_bits,
            words: vec![0u64; num_words].into_boxed_slice(),
        }
    }

    #[inline]
    pub fn num_words(num_bits: usize) -> usize {
        num_bits
            .checked_add(u64::BITS as usize - 1)
            .unwrap()
            .checked_div(u64::BITS as usize)
            .unwrap()
    }

    /// Returns a tuple of the index of the word containing `bit` and a mask
    /// which extracts it.
    #[inline]
    const fn index_and_mask(bit: usize) -> (usize, u64) {
        (
            bit / u64::BITS as usize,
            1 << (bit as u64 % u64::BITS as u64),
        )
    }

    /// Tests the indexed bit.
    #[inline]
    pub fn test(&self, index: usize) -> bool {
        assert!(index < self.num_bits);

        let (word_idx, mask) = Self::index_and_mask(index);

        self.words[word_idx] & mask != 0
    }

    /// Sets the indexed bit.
    #[inline]
    pub fn set(&mut self, index: usize) {
        assert!(index < self.num_bits);

        let (word_idx, mask) = Self::index_and_mask(index);

        self.words[word_idx] |= mask;
    }

    /// Clears the indexed bit.
    #[inline]
    pub fn clear(&mut self, index: usize) {
        assert!(index < self.num_bits);

        let (word_idx, mask) = Self::index_and_mask(index);

        self.words[word_idx] &= !mask;
    }

    /// Returns `true` if no bit is set.
    pub fn all_clear(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }
}

impl core::fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Bitmap")
            .field("num_bits", &self.num_bits)
            .field("words", &self.words)
            .finish()
    }
}
