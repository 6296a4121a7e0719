//! Lock-free, fixed-size bit-set used to track which page indices have
//! already been captured into a delta file.
//!
//! Sized exactly once, at checkpoint-mark time (see [`super::writer::DeltaWriter::init`]);
//! it is never resized afterward. Mutations are CAS operations on 32-bit
//! word slots, so concurrent listener callbacks never block each other.

use std::sync::atomic::{AtomicU32, Ordering};

pub struct AtomicBitSet {
    words: Vec<AtomicU32>,
    len: usize,
}

impl AtomicBitSet {
    #[must_use]
    pub fn new(len: usize) -> Self {
        let word_count = len.div_ceil(32);
        let mut words = Vec::with_capacity(word_count);
        words.resize_with(word_count, || AtomicU32::new(0));
        Self { words, len }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Atomically sets bit `idx` from 0 to 1. Returns `true` if this call was
    /// the one that set it; `false` if it was already set or `idx` is out of
    /// range (indices past the fixed size postdate the checkpoint barrier
    /// and are intentionally ignored).
    pub fn try_set(&self, idx: usize) -> bool {
        if idx >= self.len {
            return false;
        }
        let word_idx = idx / 32;
        let bit = 1u32 << (idx % 32);
        let word = &self.words[word_idx];
        let mut current = word.load(Ordering::Relaxed);
        loop {
            if current & bit != 0 {
                return false;
            }
            match word.compare_exchange_weak(
                current,
                current | bit,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    #[must_use]
    pub fn is_set(&self, idx: usize) -> bool {
        if idx >= self.len {
            return false;
        }
        let word = self.words[idx / 32].load(Ordering::Relaxed);
        word & (1u32 << (idx % 32)) != 0
    }
}
