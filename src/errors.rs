//! Crate-wide error type.
//!
//! One enum for every failure mode the core can raise, matching the error
//! kinds named in the design (`ProtocolError`, `IOError`, `IntegrityError`,
//! `CancelledError`, `StateError`, `TopologyChanged`). Components store the
//! *first* error they observe via [`FirstError`] and rethrow it on close;
//! anything after that is logged but not propagated.

use std::fmt;
use std::sync::Mutex;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("state error: {0}")]
    State(String),

    #[error("rebalance topology changed: {0}")]
    TopologyChanged(String),

    #[error("partition not found: group={group_id} partition={partition_id}")]
    NoSuchPartition { group_id: i32, partition_id: i32 },
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// First-writer-wins error latch shared across a task's concurrent subtasks.
///
/// Every component in this crate that fans out parallel work (the snapshot
/// task's per-partition jobs, a chunk session's per-chunk loop) reports
/// failures here instead of returning them up the call stack directly; the
/// first report decides what the whole operation fails with, matching the
/// "first-writer-wins" rule in the design.
pub struct FirstError(Mutex<Option<CoreError>>);

impl FirstError {
    #[must_use]
    pub const fn new() -> Self {
        Self(Mutex::new(None))
    }

    /// Records `err` if no error has been recorded yet. Returns `true` if
    /// this call was the one that set it.
    pub fn set(&self, err: CoreError) -> bool {
        let mut guard = self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if guard.is_some() {
            log::debug!("suppressed error after first: {err}");
            false
        } else {
            *guard = Some(err);
            true
        }
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner).is_some()
    }

    /// Takes the recorded error, if any, leaving the latch empty.
    pub fn take(&self) -> Option<CoreError> {
        self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take()
    }
}

impl Default for FirstError {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FirstError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        f.debug_struct("FirstError").field("set", &guard.is_some()).finish()
    }
}
