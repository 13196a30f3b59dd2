//! Categorical split storage.
//!
//! Category sets are stored as packed `u32` bitsets where a set bit means the
//! category goes RIGHT. Categories not in the set (including categories past
//! the end of the bitset) go LEFT. Missing values follow the node's default
//! direction and never reach this module.

/// Packed bitsets for every categorical split of a forest.
///
/// Split nodes reference their bitset by segment number (the order in which
/// the segments were pushed), not by node position, so the number of
/// segments never exceeds the number of nodes.
#[derive(Debug, Clone, Default)]
pub struct CategoriesStorage {
    /// Flat array of bitset words (32 categories per word).
    bitsets: Box<[u32]>,
    /// Per-segment `(start_word, n_words)` into `bitsets`.
    segments: Box<[(u32, u32)]>,
}

impl CategoriesStorage {
    #[inline]
    pub fn empty() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    #[inline]
    pub fn n_segments(&self) -> usize {
        self.segments.len()
    }

    /// Whether `category` is in the set of `segment` (goes right).
    #[inline]
    pub fn category_goes_right(&self, segment: usize, category: u32) -> bool {
        let (start, size) = self.segments[segment];
        let word_idx = category >> 5;
        if word_idx >= size {
            return false;
        }
        let word = self.bitsets[(start + word_idx) as usize];
        (word >> (category & 31)) & 1 != 0
    }

    /// Same as [`category_goes_right`](Self::category_goes_right) for a raw
    /// feature value. Values that are not a valid category go left.
    #[inline]
    pub fn value_goes_right(&self, segment: usize, value: f64) -> bool {
        category_of(value).is_some_and(|category| self.category_goes_right(segment, category))
    }

    /// Bitset words of a segment.
    #[inline]
    pub fn bitset(&self, segment: usize) -> &[u32] {
        let (start, size) = self.segments[segment];
        &self.bitsets[start as usize..(start + size) as usize]
    }

    /// Sorted categories of a segment.
    pub fn categories(&self, segment: usize) -> Vec<u32> {
        bitset_to_categories(self.bitset(segment))
    }
}

/// Accumulates segments for a [`CategoriesStorage`].
#[derive(Debug, Default)]
pub(crate) struct CategoriesBuilder {
    bitsets: Vec<u32>,
    segments: Vec<(u32, u32)>,
}

impl CategoriesBuilder {
    /// Append the bitset of `categories`; returns the segment number, or
    /// `None` if the word count overflows the segment table.
    pub(crate) fn push(&mut self, categories: &[u32]) -> Option<usize> {
        let bitset = categories_to_bitset(categories);
        let start = u32::try_from(self.bitsets.len()).ok()?;
        let size = u32::try_from(bitset.len()).ok()?;
        start.checked_add(size)?;
        self.bitsets.extend_from_slice(&bitset);
        self.segments.push((start, size));
        Some(self.segments.len() - 1)
    }

    pub(crate) fn n_segments(&self) -> usize {
        self.segments.len()
    }

    pub(crate) fn finish(self) -> CategoriesStorage {
        CategoriesStorage {
            bitsets: self.bitsets.into_boxed_slice(),
            segments: self.segments.into_boxed_slice(),
        }
    }
}

/// Convert a feature value to a category.
///
/// Categories are non-negative whole numbers; anything else (negative,
/// fractional, too large, NaN) is not a category.
#[inline]
pub fn category_of(value: f64) -> Option<u32> {
    if value >= 0.0 && value <= u32::MAX as f64 && value.fract() == 0.0 {
        Some(value as u32)
    } else {
        None
    }
}

/// Build a packed bitset with bit `c` set for each category `c`.
///
/// Word `w` holds categories `32 * w .. 32 * w + 31`, least significant bit
/// first.
pub fn categories_to_bitset(categories: &[u32]) -> Vec<u32> {
    let Some(&max_cat) = categories.iter().max() else {
        return Vec::new();
    };
    let mut bitset = vec![0u32; (max_cat >> 5) as usize + 1];
    for &cat in categories {
        bitset[(cat >> 5) as usize] |= 1 << (cat & 31);
    }
    bitset
}

/// Inverse of [`categories_to_bitset`]: sorted set bits.
pub fn bitset_to_categories(bitset: &[u32]) -> Vec<u32> {
    let mut categories = Vec::new();
    for (word_idx, &word) in bitset.iter().enumerate() {
        let mut bits = word;
        while bits != 0 {
            let bit = bits.trailing_zeros();
            categories.push(word_idx as u32 * 32 + bit);
            bits &= bits - 1;
        }
    }
    categories
}
