//! Property test for §8 property 3 ("At-most-once CoW capture"), exercised
//! directly against [`AtomicBitSet`] rather than through the full delta
//! writer, since the bit-set is what actually enforces the guarantee.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use partition_snapshot_core::delta::AtomicBitSet;
use proptest::prelude::*;

proptest! {
    /// For any sequence of (possibly repeated, possibly out-of-range)
    /// indices raced across several threads, each in-range index is won by
    /// exactly one `try_set` call.
    #[test]
    fn try_set_wins_exactly_once_per_index(
        len in 1usize..64,
        indices in prop::collection::vec(0usize..80, 1..400),
        thread_count in 1usize..6,
    ) {
        let set = Arc::new(AtomicBitSet::new(len));
        let indices = Arc::new(indices);

        let mut wins: HashMap<usize, usize> = HashMap::new();
        let handles: Vec<_> = (0..thread_count)
            .map(|t| {
                let set = set.clone();
                let indices = indices.clone();
                thread::spawn(move || {
                    let mut local_wins = Vec::new();
                    for (i, &idx) in indices.iter().enumerate() {
                        if i % thread_count == t && set.try_set(idx) {
                            local_wins.push(idx);
                        }
                    }
                    local_wins
                })
            })
            .collect();

        for h in handles {
            for idx in h.join().unwrap() {
                *wins.entry(idx).or_insert(0) += 1;
            }
        }

        for (&idx, &count) in &wins {
            prop_assert_eq!(count, 1, "index {} won more than once", idx);
        }
        for &idx in indices.iter() {
            if idx < len {
                prop_assert!(set.is_set(idx));
            } else {
                prop_assert!(!set.is_set(idx));
            }
        }
    }
}
