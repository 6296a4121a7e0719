#![forbid(unsafe_code)]

//! Partition snapshot and file-based rebalance core.
//!
//! This crate produces a point-in-time, checkpoint-consistent copy of a
//! node's partition page stores and streams it, together with a delta of
//! pages modified during the copy, to a peer or to a local snapshot
//! directory; the companion receive path reassembles those files and
//! brings the resulting partitions back online.
//!
//! Configuration loading, cluster discovery/membership, the key-value API,
//! and cluster-wide coordination of snapshot operations live above this
//! crate; it only exposes the node-local snapshot task, the transfer
//! engine, and the file-rebalance driver, against the collaborator
//! contracts in [`checkpoint`] and [`pagestore`].

pub mod checkpoint;
pub mod config;
pub mod delta;
pub mod errors;
pub mod fsutil;
pub mod logger;
pub mod pagestore;
pub mod rebalance;
pub mod receiver;
pub mod restorer;
pub mod sender;
pub mod snapshot_task;
pub mod transmission;
pub mod types;
pub mod utils;
