//! Partition restorer (C7): atomically installs a received partition file,
//! replays its delta, and switches the partition to write-accepting mode on
//! the next checkpoint.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bincode::config::standard;
use parking_lot::Mutex as PlMutex;
use tokio::sync::{mpsc, oneshot};

use crate::checkpoint::{CheckpointContext, CheckpointListener};
use crate::errors::{CoreError, Result};
use crate::pagestore::{PageFrame, PageId, PageStore};
use crate::types::GroupPartitionId;

/// The page-store manager and partition-mode collaborator this restorer
/// drives. Resolving paths, opening the installed store, and flipping a
/// partition's read/write mode are the host engine's job (out of scope per
/// the crate's non-goals); this crate only consumes the contract.
pub trait PartitionStoreManager: Send + Sync {
    fn destination_path(&self, pair: GroupPartitionId) -> PathBuf;

    fn partition_file_exists(&self, pair: GroupPartitionId) -> bool;

    fn group_destroyed(&self, group_id: i32) -> bool {
        let _ = group_id;
        false
    }

    /// Whether the restore this artifact belongs to has already been
    /// cancelled, completed, or superseded by a topology change.
    fn is_restore_stale(&self, pair: GroupPartitionId) -> bool {
        let _ = pair;
        false
    }

    /// Highest-applied counter of the partition's current read-only store,
    /// captured just before activation.
    fn read_only_counter(&self, pair: GroupPartitionId) -> i64;

    /// Highest-applied counter of the live partition, captured just before
    /// activation.
    fn live_counter(&self, pair: GroupPartitionId) -> i64;

    /// Switches the partition to write-accepting mode and clears its
    /// on-heap entry maps.
    ///
    /// # Errors
    /// Returns an error if the mode switch fails.
    fn switch_to_writable(&self, pair: GroupPartitionId) -> Result<()>;

    /// Opens the just-installed file as this partition's page store, for
    /// delta replay.
    ///
    /// # Errors
    /// Returns an error if the store cannot be opened.
    fn open_installed_store(&self, pair: GroupPartitionId) -> Result<Arc<dyn PageStore>>;

    /// Resolves once the prior store generation has no outstanding readers.
    fn await_partition_release(&self, pair: GroupPartitionId) -> oneshot::Receiver<()>;
}

/// Emitted once a partition finishes activation: the counter range a
/// historical-rebalance handoff must still cover is `(initial, hwm]`.
#[derive(Debug, Clone, Copy)]
pub struct RestoreCompletion {
    pub pair: GroupPartitionId,
    pub node_id_hash: u64,
    pub hwm: i64,
}

enum RestoreOp {
    Activate { pair: GroupPartitionId, node_id: String },
}

/// Drains a FIFO queue of scheduled partition activations under the
/// checkpoint thread's mark-begin step, giving every activation a
/// consistent view free of concurrent page writes.
pub struct PartitionRestorer {
    store_manager: Arc<dyn PartitionStoreManager>,
    queue: PlMutex<VecDeque<RestoreOp>>,
    delta_paths: PlMutex<HashMap<GroupPartitionId, PathBuf>>,
    completions: mpsc::UnboundedSender<RestoreCompletion>,
}

impl PartitionRestorer {
    #[must_use]
    pub fn new(
        store_manager: Arc<dyn PartitionStoreManager>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<RestoreCompletion>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                store_manager,
                queue: PlMutex::new(VecDeque::new()),
                delta_paths: PlMutex::new(HashMap::new()),
                completions: tx,
            }),
            rx,
        )
    }

    /// Invoked on the transport thread once a partition file has fully
    /// arrived: installs it atomically and schedules activation on the
    /// next checkpoint.
    ///
    /// # Errors
    /// Returns an error if the destination already has a partition file, or
    /// if the install itself fails.
    pub fn on_partition_received(&self, node_id: &str, staged_file: &Path, pair: GroupPartitionId) -> Result<()> {
        if self.store_manager.is_restore_stale(pair) {
            let _ = std::fs::remove_file(staged_file);
            log::debug!("restore stale for {pair}, discarding received partition file");
            return Ok(());
        }
        let dest = self.store_manager.destination_path(pair);
        if self.store_manager.partition_file_exists(pair) {
            return Err(CoreError::State(format!("partition file already exists for {pair}")));
        }
        crate::fsutil::install_new_file(staged_file, &dest)?;
        log::info!("installed partition file for {pair} from {node_id}");
        self.queue.lock().push_back(RestoreOp::Activate { pair, node_id: node_id.to_string() });
        Ok(())
    }

    /// Invoked once a partition's delta file has fully arrived. Staged for
    /// replay at activation time rather than applied directly, so a
    /// reordered arrival relative to the partition file never races the
    /// install.
    pub fn on_delta_received(&self, pair: GroupPartitionId, staged_delta: PathBuf) {
        self.delta_paths.lock().insert(pair, staged_delta);
    }

    fn perform_activation(&self, pair: GroupPartitionId, node_id: &str) -> Result<()> {
        if self.store_manager.group_destroyed(pair.group_id) {
            log::debug!("group {} destroyed before activation of {pair}, skipping", pair.group_id);
            return Ok(());
        }
        let read_cntr = self.store_manager.read_only_counter(pair);
        let snapshot_cntr = self.store_manager.live_counter(pair);
        self.store_manager.switch_to_writable(pair)?;

        if let Some(delta_path) = self.delta_paths.lock().remove(&pair) {
            let store = self.store_manager.open_installed_store(pair)?;
            replay_delta(&store, &delta_path)?;
            let _ = std::fs::remove_file(&delta_path);
        }

        let hwm = read_cntr.max(snapshot_cntr);
        debug_assert!(hwm >= read_cntr && hwm >= snapshot_cntr);
        let release_rx = self.store_manager.await_partition_release(pair);
        let completions = self.completions.clone();
        let node_id_hash = {
            use std::hash::{Hash, Hasher};
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            node_id.hash(&mut hasher);
            hasher.finish()
        };
        tokio::spawn(async move {
            if release_rx.await.is_ok() {
                let _ = completions.send(RestoreCompletion { pair, node_id_hash, hwm });
            }
        });
        Ok(())
    }

    /// True if a partition's delta has not yet arrived; used by
    /// `on_mark_checkpoint_begin` to defer its activation to the next
    /// checkpoint rather than activate with no delta applied.
    fn has_pending_delta_wait(&self, pair: GroupPartitionId) -> bool {
        !self.delta_paths.lock().contains_key(&pair)
    }
}

fn replay_delta(store: &Arc<dyn PageStore>, delta_path: &Path) -> Result<()> {
    let mut file = File::open(delta_path)?;
    while let Ok((frame, _)) = bincode::serde::decode_from_std_read::<PageFrame, _, _>(&mut file, standard()) {
        if !frame.verify_checksum() {
            log::warn!("delta replay: checksum mismatch for page {}, treating as absent", frame.header.page_id);
            continue;
        }
        let page_id = PageId(frame.header.page_id);
        if u64::from(page_id.page_index()) < store.pages() {
            store.write(page_id, &frame.data)?;
        } else {
            log::debug!("delta replay: page {} postdates the installed store size, skipping", frame.header.page_id);
        }
    }
    Ok(())
}

impl CheckpointListener for PartitionRestorer {
    fn on_mark_checkpoint_begin(&self, _ctx: &CheckpointContext) {
        let mut queue = self.queue.lock();
        let mut deferred = VecDeque::new();
        while let Some(op) = queue.pop_front() {
            match op {
                RestoreOp::Activate { pair, node_id } => {
                    if self.has_pending_delta_wait(pair) {
                        deferred.push_back(RestoreOp::Activate { pair, node_id });
                        continue;
                    }
                    if let Err(err) = self.perform_activation(pair, &node_id) {
                        log::error!("activation failed for {pair}: {err}");
                    }
                }
            }
        }
        queue.extend(deferred);
    }
}
