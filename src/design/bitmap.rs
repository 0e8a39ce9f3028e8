//! Byte bitmaps over candidate indices

/// Fixed-capacity set of candidate indices, one bit per candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSet {
    bits: Vec<u8>,
    capacity: usize,
}

impl CandidateSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            bits: vec![0; capacity.div_ceil(8)],
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Byte and mask holding `index`; None past the capacity.
    #[inline]
    fn slot(&self, index: usize) -> Option<(usize, u8)> {
        (index < self.capacity).then(|| (index >> 3, 1 << (index & 0x07)))
    }

    /// Out-of-range indices are never members.
    pub fn contains(&self, index: usize) -> bool {
        self.slot(index)
            .is_some_and(|(byte, mask)| self.bits[byte] & mask != 0)
    }

    /// Returns false when the index was already present or out of range.
    pub fn insert(&mut self, index: usize) -> bool {
        match self.slot(index) {
            Some((byte, mask)) if self.bits[byte] & mask == 0 => {
                self.bits[byte] |= mask;
                true
            }
            _ => false,
        }
    }

    pub fn remove(&mut self, index: usize) -> bool {
        match self.slot(index) {
            Some((byte, mask)) if self.bits[byte] & mask != 0 => {
                self.bits[byte] &= !mask;
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&b| b == 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.capacity).filter(move |&i| self.contains(i))
    }
}
