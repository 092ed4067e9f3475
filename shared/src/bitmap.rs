//! A dynamically-sized bitmap, used as a first-fit slot allocator.

use alloc::boxed::Box;
use alloc::vec;

const BITS_PER_WORD: usize = usize::BITS as usize;

pub struct Bitmap {
    bit_count: usize,
    words: Box<[usize]>,
}

impl Bitmap {
    /// Creates a bitmap of `bit_count` bits, all initially clear.
    pub fn new(bit_count: usize) -> Self {
        let word_count = bit_count.div_ceil(BITS_PER_WORD);
        Self {
            bit_count,
            words: vec![0; word_count].into_boxed_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.bit_count
    }

    pub fn is_empty(&self) -> bool {
        self.bit_count == 0
    }

    pub fn get(&self, idx: usize) -> bool {
        assert!(idx < self.bit_count, "bit index {idx} out of bounds");
        self.words[idx / BITS_PER_WORD] >> (idx % BITS_PER_WORD) & 1 != 0
    }

    pub fn set(&mut self, idx: usize, value: bool) {
        assert!(idx < self.bit_count, "bit index {idx} out of bounds");
        let mask = 1 << (idx % BITS_PER_WORD);
        if value {
            self.words[idx / BITS_PER_WORD] |= mask;
        } else {
            self.words[idx / BITS_PER_WORD] &= !mask;
        }
    }

    /// Finds the lowest clear bit, sets it, and returns its index.
    /// Returns `None` when every bit is set.
    pub fn scan_and_flip(&mut self) -> Option<usize> {
        for idx in 0..self.bit_count {
            if !self.get(idx) {
                self.set(idx, true);
                return Some(idx);
            }
        }
        None
    }

    pub fn count_set(&self) -> usize {
        (0..self.bit_count).filter(|&idx| self.get(idx)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get() {
        let mut bitmap = Bitmap::new(130);
        assert_eq!(bitmap.len(), 130);
        assert!(!bitmap.get(0));
        assert!(!bitmap.get(129));

        bitmap.set(0, true);
        bitmap.set(64, true);
        bitmap.set(129, true);
        assert!(bitmap.get(0));
        assert!(bitmap.get(64));
        assert!(bitmap.get(129));
        assert!(!bitmap.get(1));
        assert_eq!(bitmap.count_set(), 3);

        bitmap.set(64, false);
        assert!(!bitmap.get(64));
        assert_eq!(bitmap.count_set(), 2);
    }

    #[test]
    fn scan_is_first_fit() {
        let mut bitmap = Bitmap::new(4);
        assert_eq!(bitmap.scan_and_flip(), Some(0));
        assert_eq!(bitmap.scan_and_flip(), Some(1));
        assert_eq!(bitmap.scan_and_flip(), Some(2));

        // Freeing the lowest slot makes it the next one handed out.
        bitmap.set(0, false);
        assert_eq!(bitmap.scan_and_flip(), Some(0));
        assert_eq!(bitmap.scan_and_flip(), Some(3));
        assert_eq!(bitmap.scan_and_flip(), None);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn out_of_bounds_get() {
        let bitmap = Bitmap::new(8);
        bitmap.get(8);
    }
}
