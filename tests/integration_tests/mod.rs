//! Multi-component scenarios: two or more of C1-C8 wired together, matching
//! the end-to-end scenarios named in §8.

mod peer_transfer;
mod quiet_snapshot;
