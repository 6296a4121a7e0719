//! Operational knobs for the snapshot/rebalance core.
//!
//! Loading configuration from files, CLI flags, or cluster config is the
//! orchestrator's job (see the crate-level Non-goals). This module only
//! holds the small set of plain values the core itself needs, built with
//! [`Default`] and a builder the way the teacher's `CacheConfig` is built
//! and threaded into `Cache::new_with_config`.

use std::num::NonZeroUsize;
use std::path::PathBuf;

/// Default chunk size for a transmission session: 256 KiB, matching the
/// page-store's large-page scale.
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

#[derive(Debug, Clone)]
pub struct SnapshotCoreConfig {
    /// Overrides the page size reported by the `PageStore`. `None` defers to
    /// the store.
    pub page_size_override: Option<usize>,
    /// Size of one chunk in a resumable transmission session.
    pub chunk_size: usize,
    /// Number of partitions copied concurrently by one snapshot task.
    pub snapshot_parallelism: NonZeroUsize,
    /// Number of times a dropped transmission connection is retried before
    /// the session gives up and reports an `IOError`.
    pub io_retry_count: u32,
    /// Root directory for scratch files (partial chunk receives, temporary
    /// part files before atomic rename).
    pub temp_dir: PathBuf,
}

impl Default for SnapshotCoreConfig {
    fn default() -> Self {
        Self {
            page_size_override: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            snapshot_parallelism: std::thread::available_parallelism()
                .unwrap_or(NonZeroUsize::new(1).expect("1 is nonzero")),
            io_retry_count: 1,
            temp_dir: std::env::temp_dir(),
        }
    }
}

impl SnapshotCoreConfig {
    #[must_use]
    pub fn builder() -> SnapshotCoreConfigBuilder {
        SnapshotCoreConfigBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct SnapshotCoreConfigBuilder {
    inner: Option<SnapshotCoreConfig>,
}

impl SnapshotCoreConfigBuilder {
    fn base(&mut self) -> &mut SnapshotCoreConfig {
        self.inner.get_or_insert_with(SnapshotCoreConfig::default)
    }

    #[must_use]
    pub fn page_size(mut self, size: usize) -> Self {
        self.base().page_size_override = Some(size);
        self
    }

    #[must_use]
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.base().chunk_size = size;
        self
    }

    #[must_use]
    pub fn snapshot_parallelism(mut self, n: NonZeroUsize) -> Self {
        self.base().snapshot_parallelism = n;
        self
    }

    #[must_use]
    pub fn io_retry_count(mut self, n: u32) -> Self {
        self.base().io_retry_count = n;
        self
    }

    #[must_use]
    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base().temp_dir = dir.into();
        self
    }

    #[must_use]
    pub fn build(mut self) -> SnapshotCoreConfig {
        self.inner.take().unwrap_or_default()
    }
}
