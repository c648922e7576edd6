//! Component D: the mode-partitioned bump arena (§3, §4, Design Notes §9).
//!
//! Only one mode is ever active at a time, so the arena never needs to
//! track more than one claim: a single `free_offset` word cursor that's
//! bumped on activation and walked back on deactivation. The concrete
//! per-mode state that claim backs (`Translate`/`UpdateController`) is
//! assembled one level up, in `bridge.rs`.

/// Rounds a byte count up to a whole number of 32-bit words.
pub const fn round_up_words(bytes: usize) -> usize {
    (bytes + 3) / 4
}

// The arena backing a real `Bridge` must be able to hold update mode's
// largest single sub-chunk buffer, the biggest claim either mode makes.
static_assertions::const_assert!(
    crate::config::HEAP_WORDS >= round_up_words(crate::config::UPDATE_MAX_SUBCHUNK)
);

/// Word-aligned bump allocator over a fixed `WORDS`-word region.
///
/// Invariant (§3): at most one mode is active at a time; a mode
/// transition drains the arena exactly (the orchestrator deactivates
/// with precisely the word count it activated with).
#[derive(Debug)]
pub struct Arena<const WORDS: usize> {
    free_offset: usize,
}

impl<const WORDS: usize> Default for Arena<WORDS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const WORDS: usize> Arena<WORDS> {
    pub const fn new() -> Self {
        Self { free_offset: 0 }
    }

    pub const fn capacity_words(&self) -> usize {
        WORDS
    }

    pub fn free_offset_words(&self) -> usize {
        self.free_offset
    }

    /// Bumps `free_offset` by `round_up_words(bytes_needed)`. Returns the
    /// word offset the caller's region starts at, or `None` — and
    /// leaves `free_offset` unchanged — if that would exceed `WORDS`
    /// (§8 "Arena accounting").
    pub fn activate(&mut self, bytes_needed: usize) -> Option<usize> {
        let words = round_up_words(bytes_needed);
        if self.free_offset + words > WORDS {
            return None;
        }
        let offset = self.free_offset;
        self.free_offset += words;
        Some(offset)
    }

    /// Walks `free_offset` back by exactly the word count a prior
    /// `activate` returned space for. Returns `false` (a memory leak,
    /// §7) if `bytes_claimed` doesn't round to no more than the current
    /// `free_offset` — the caller is expected to latch `memoryLeak` in
    /// that case.
    pub fn deactivate(&mut self, bytes_claimed: usize) -> bool {
        let words = round_up_words(bytes_claimed);
        if words > self.free_offset {
            return false;
        }
        self.free_offset -= words;
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn activate_bumps_and_deactivate_drains_exactly() {
        let mut a: Arena<16> = Arena::new();
        let off = a.activate(40).unwrap(); // 10 words
        assert_eq!(off, 0);
        assert_eq!(a.free_offset_words(), 10);
        assert!(a.deactivate(40));
        assert_eq!(a.free_offset_words(), 0);
    }

    #[test]
    fn activate_over_capacity_leaves_offset_unchanged() {
        let mut a: Arena<4> = Arena::new();
        assert!(a.activate(8).is_some()); // 2 words, fits
        assert_eq!(a.free_offset_words(), 2);
        assert!(a.activate(100).is_none()); // would need 25 words, doesn't fit
        assert_eq!(a.free_offset_words(), 2);
    }

    #[test]
    fn deactivate_mismatch_reports_leak() {
        let mut a: Arena<16> = Arena::new();
        a.activate(16).unwrap(); // 4 words
        assert!(!a.deactivate(100)); // more than claimed -> leak
        assert_eq!(a.free_offset_words(), 4);
    }

    #[test]
    fn round_up_words_matches_word_size() {
        assert_eq!(round_up_words(0), 0);
        assert_eq!(round_up_words(1), 1);
        assert_eq!(round_up_words(4), 1);
        assert_eq!(round_up_words(5), 2);
    }
}
