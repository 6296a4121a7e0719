//! Delta writer (C2): copy-on-write capture of pages modified during a
//! snapshot's checkpoint window.

mod bitset;
mod writer;

pub use bitset::AtomicBitSet;
pub use writer::{CpDoneFn, DeltaWriter, InterruptFn};
