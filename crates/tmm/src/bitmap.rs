//! One bit per physical frame.
//!
//! Bit `i` lives in word `i / 32` at position `i % 32`; a set bit means the frame is in
//! use. Searches skip whole words that are entirely set before looking at single bits.

/// Number of frames tracked by one bitmap word.
pub const BITS_PER_WORD: usize = u32::BITS as usize;

/// A frame bitmap over borrowed word storage.
pub struct FrameBitmap<'m> {
    words: &'m mut [u32],
    bits: usize,
}

impl<'m> FrameBitmap<'m> {
    /// Wraps `words` as a bitmap of `bits` frames.
    ///
    /// # Panics
    ///
    /// Panics if `words` is too small to hold `bits` bits.
    pub fn new(words: &'m mut [u32], bits: usize) -> Self {
        assert!(
            bits <= words.len() * BITS_PER_WORD,
            "bitmap storage too small for {bits} frames"
        );
        Self { words, bits }
    }

    /// Returns the number of words needed to track `bits` frames.
    pub const fn words_for(bits: usize) -> usize {
        bits.div_ceil(BITS_PER_WORD)
    }

    /// Returns the number of frames tracked.
    pub fn len(&self) -> usize {
        self.bits
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Sets (`used`) or clears every bit of the storage, including padding bits.
    pub fn fill(&mut self, used: bool) {
        self.words.fill(if used { u32::MAX } else { 0 });
    }

    #[inline]
    pub fn set(&mut self, index: usize) {
        assert!(index < self.bits, "frame {index} outside bitmap");
        self.words[index / BITS_PER_WORD] |= 1 << (index % BITS_PER_WORD);
    }

    #[inline]
    pub fn clear(&mut self, index: usize) {
        assert!(index < self.bits, "frame {index} outside bitmap");
        self.words[index / BITS_PER_WORD] &= !(1 << (index % BITS_PER_WORD));
    }

    #[inline]
    pub fn test(&self, index: usize) -> bool {
        assert!(index < self.bits, "frame {index} outside bitmap");
        self.words[index / BITS_PER_WORD] & (1 << (index % BITS_PER_WORD)) != 0
    }

    /// Returns the number of set bits among the tracked frames.
    pub fn count_set(&self) -> usize {
        let full_words = self.bits / BITS_PER_WORD;
        let mut count: usize = self.words[..full_words]
            .iter()
            .map(|word| word.count_ones() as usize)
            .sum();

        let tail = self.bits % BITS_PER_WORD;
        if tail != 0 {
            let mask = (1u32 << tail) - 1;
            count += (self.words[full_words] & mask).count_ones() as usize;
        }
        count
    }

    /// Returns the lowest clear bit.
    pub fn first_clear(&self) -> Option<usize> {
        self.first_clear_from(0)
    }

    /// Returns the lowest clear bit at or after `start`.
    pub fn first_clear_from(&self, start: usize) -> Option<usize> {
        let mut index = start;
        while index < self.bits {
            let word_index = index / BITS_PER_WORD;
            let word = self.words[word_index];

            // Clear bits of this word at or above `index`.
            let candidates = !word & (u32::MAX << (index % BITS_PER_WORD));
            if candidates != 0 {
                let found = word_index * BITS_PER_WORD + candidates.trailing_zeros() as usize;
                return (found < self.bits).then_some(found);
            }

            index = (word_index + 1) * BITS_PER_WORD;
        }
        None
    }

    /// Returns the number of consecutive clear bits starting at `start`, at most `limit`.
    pub fn clear_run_length(&self, start: usize, limit: usize) -> usize {
        let end = start.saturating_add(limit).min(self.bits);
        (start..end).take_while(|&index| !self.test(index)).count()
    }

    /// Returns the start of the lowest run of `count` consecutive clear bits.
    ///
    /// Each failed candidate moves the search past the set bit that ended its run, so the
    /// search visits every bit at most twice and always terminates.
    pub fn find_clear_run(&self, count: usize) -> Option<usize> {
        if count == 0 {
            return None;
        }

        let mut start = self.first_clear()?;
        while start.checked_add(count)? <= self.bits {
            let run = self.clear_run_length(start, count);
            if run == count {
                return Some(start);
            }
            start = self.first_clear_from(start + run)?;
        }
        None
    }

    /// Sets `count` bits starting at `start`.
    pub fn set_range(&mut self, start: usize, count: usize) {
        for index in start..start + count {
            self.set(index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bitmap(words: &mut [u32], bits: usize) -> FrameBitmap<'_> {
        FrameBitmap::new(words, bits)
    }

    #[test]
    fn set_clear_and_test_address_the_right_bit() {
        let mut words = [0u32; 2];
        let mut map = bitmap(&mut words, 64);

        map.set(0);
        map.set(33);
        assert!(map.test(0));
        assert!(map.test(33));
        assert!(!map.test(32));
        assert_eq!(map.count_set(), 2);

        map.clear(33);
        assert!(!map.test(33));
        drop(map);
        assert_eq!(words, [1, 0]);
    }

    #[test]
    fn count_ignores_padding_bits() {
        let mut words = [0u32; 2];
        let mut map = bitmap(&mut words, 40);
        map.fill(true);
        assert_eq!(map.count_set(), 40);
    }

    #[test]
    fn first_clear_skips_full_words() {
        let mut words = [u32::MAX, u32::MAX, 0xFFFF_FFF7];
        let map = bitmap(&mut words, 96);
        assert_eq!(map.first_clear(), Some(67));
    }

    #[test]
    fn first_clear_from_respects_start() {
        let mut words = [0b1010u32];
        let map = bitmap(&mut words, 32);
        assert_eq!(map.first_clear_from(0), Some(0));
        assert_eq!(map.first_clear_from(1), Some(2));
        assert_eq!(map.first_clear_from(3), Some(4));
    }

    #[test]
    fn first_clear_ignores_padding_bits() {
        let mut words = [u32::MAX, 0];
        let map = bitmap(&mut words, 36);
        assert_eq!(map.first_clear(), Some(32));

        let mut words = [u32::MAX, 0xF];
        let map = bitmap(&mut words, 36);
        assert_eq!(map.first_clear(), None);
    }

    #[test]
    fn finds_lowest_run() {
        // Frames 0, 4 and 9 used; first run of 4 starts at 5.
        let mut words = [0b10_0001_0001u32];
        let map = bitmap(&mut words, 32);
        assert_eq!(map.find_clear_run(3), Some(1));
        assert_eq!(map.find_clear_run(4), Some(5));
        assert_eq!(map.find_clear_run(5), Some(10));
    }

    #[test]
    fn run_may_span_words() {
        let mut words = [0x0FFF_FFFFu32, 0xFFFF_FFF0];
        let map = bitmap(&mut words, 64);
        assert_eq!(map.find_clear_run(8), Some(28));
        assert_eq!(map.find_clear_run(9), None);
    }

    #[test]
    fn alternating_bitmap_has_no_run_of_two() {
        let mut words = [0x5555_5555u32; 8];
        let map = bitmap(&mut words, 256);
        assert_eq!(map.find_clear_run(1), Some(1));
        assert_eq!(map.find_clear_run(2), None);
    }

    #[test]
    fn run_must_fit_before_the_end() {
        let mut words = [0u32];
        let map = bitmap(&mut words, 8);
        assert_eq!(map.find_clear_run(8), Some(0));
        assert_eq!(map.find_clear_run(9), None);
        assert_eq!(map.find_clear_run(0), None);
    }

    #[test]
    fn set_range_marks_every_bit() {
        let mut words = [0u32];
        let mut map = bitmap(&mut words, 32);
        map.set_range(3, 4);
        assert_eq!(map.count_set(), 4);
        drop(map);
        assert_eq!(words[0], 0b111_1000);
    }
}
