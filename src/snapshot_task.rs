//! Snapshot task (C3): orchestrates one node-local, point-in-time snapshot
//! for a set of `(group, partition)` pairs through the checkpoint
//! subsystem's mark-begin/mark-end/finished lifecycle.

use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::{Mutex as PlMutex, RwLock as PlRwLock};
use tokio::sync::{Notify, Semaphore, oneshot};

use crate::checkpoint::{CheckpointContext, CheckpointListener, CheckpointSubsystem};
use crate::config::SnapshotCoreConfig;
use crate::delta::DeltaWriter;
use crate::errors::{CoreError, FirstError, Result};
use crate::pagestore::{PageStore, WriteListener};
use crate::sender::SnapshotSender;
use crate::types::GroupPartitionId;

/// Reports whether a partition is in `OWNING` state at checkpoint-mark time.
/// Tracking partition state is out of scope for this crate (see the
/// `PageStore`/`CheckpointSubsystem` collaborator split); `SnapshotTask` only
/// consults this contract to refuse allocating a snapshot for a partition
/// that isn't `OWNING`, per the mark-end `StateError` rule. `None` (no
/// collaborator supplied) treats every partition as owning.
pub trait PartitionOwnership: Send + Sync {
    fn is_owning(&self, pair: GroupPartitionId) -> bool;
}

/// One snapshot task's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotState {
    New,
    StartedWaitingMark,
    Marked,
    Running,
    DoneOk,
    DoneErr,
    Cancelled,
}

fn join_err(e: tokio::task::JoinError) -> CoreError {
    CoreError::State(format!("artifact task panicked or was cancelled: {e}"))
}

struct PartitionEntry {
    store: Arc<dyn PageStore>,
    delta_writer: Arc<DeltaWriter>,
    listener_handle: Arc<dyn WriteListener>,
    delta_path: PathBuf,
}

/// Drives one named snapshot through the checkpoint lifecycle: tail-copy,
/// mark-partition-copied, delta send, per partition, plus metadata and
/// cache-config artifacts, finishing with exactly one `sender.close`.
pub struct SnapshotTask {
    snapshot_name: String,
    #[allow(dead_code)]
    source_node_id: String,
    sender: Arc<dyn SnapshotSender>,
    checkpoint: Arc<dyn CheckpointSubsystem>,
    ownership: Option<Arc<dyn PartitionOwnership>>,
    partitions: HashMap<GroupPartitionId, PartitionEntry>,
    cache_configs: Vec<(String, String, Vec<u8>)>,
    binary_meta: Option<Vec<u8>>,
    marshaller_meta: Option<Vec<u8>>,
    parallelism: Arc<Semaphore>,
    state: PlRwLock<SnapshotState>,
    part_lengths: PlRwLock<HashMap<GroupPartitionId, u64>>,
    cp_finished: Arc<AtomicBool>,
    cp_notify: Arc<Notify>,
    cancelled: Arc<AtomicBool>,
    first_error: Arc<FirstError>,
    tmp_dir: PathBuf,
    result_tx: PlMutex<Option<oneshot::Sender<Result<()>>>>,
    self_weak: OnceLock<Weak<SnapshotTask>>,
}

impl SnapshotTask {
    /// Builds and starts a snapshot task: creates the per-partition delta
    /// writers, registers as a checkpoint listener, and returns a receiver
    /// that resolves once the task reaches a terminal state.
    ///
    /// # Errors
    /// Returns an error if a delta file cannot be created under `tmp_dir`.
    pub fn spawn(
        config: &SnapshotCoreConfig,
        checkpoint: Arc<dyn CheckpointSubsystem>,
        sender: Arc<dyn SnapshotSender>,
        snapshot_name: String,
        source_node_id: String,
        partitions: HashMap<GroupPartitionId, Arc<dyn PageStore>>,
        ownership: Option<Arc<dyn PartitionOwnership>>,
        cache_configs: Vec<(String, String, Vec<u8>)>,
        binary_meta: Option<Vec<u8>>,
        marshaller_meta: Option<Vec<u8>>,
    ) -> Result<(Arc<Self>, oneshot::Receiver<Result<()>>)> {
        let tmp_dir = config.temp_dir.join(format!("snapshot-{snapshot_name}"));
        std::fs::create_dir_all(&tmp_dir)?;

        let cp_finished = Arc::new(AtomicBool::new(false));
        let cancelled = Arc::new(AtomicBool::new(false));

        let mut entries = HashMap::new();
        for (pair, store) in partitions {
            let delta_path = tmp_dir.join(format!("{}.delta", pair.encode()));
            let file = File::create(&delta_path)?;
            let cp_finished_for_writer = cp_finished.clone();
            let cancelled_for_writer = cancelled.clone();
            let mut writer = DeltaWriter::new(
                store.clone(),
                file,
                Arc::new(move || cp_finished_for_writer.load(Ordering::Acquire)),
                Arc::new(move || cancelled_for_writer.load(Ordering::Relaxed)),
            );
            writer.set_page_size_override(config.page_size_override);
            let writer = Arc::new(writer);
            let listener_handle: Arc<dyn WriteListener> = writer.clone();
            store.add_write_listener(listener_handle.clone());
            entries.insert(pair, PartitionEntry { store, delta_writer: writer, listener_handle, delta_path });
        }

        let (result_tx, result_rx) = oneshot::channel();

        let task = Arc::new(Self {
            snapshot_name,
            source_node_id,
            sender,
            checkpoint: checkpoint.clone(),
            ownership,
            partitions: entries,
            cache_configs,
            binary_meta,
            marshaller_meta,
            parallelism: Arc::new(Semaphore::new(config.snapshot_parallelism.get())),
            state: PlRwLock::new(SnapshotState::New),
            part_lengths: PlRwLock::new(HashMap::new()),
            cp_finished,
            cp_notify: Arc::new(Notify::new()),
            cancelled,
            first_error: Arc::new(FirstError::new()),
            tmp_dir,
            result_tx: PlMutex::new(Some(result_tx)),
            self_weak: OnceLock::new(),
        });
        let _ = task.self_weak.set(Arc::downgrade(&task));

        *task.state.write() = SnapshotState::StartedWaitingMark;
        let listener: Arc<dyn CheckpointListener> = task.clone();
        checkpoint.add_checkpoint_listener(listener);
        log::info!("snapshot task {} started, waiting for checkpoint mark", task.snapshot_name);

        Ok((task, result_rx))
    }

    #[must_use]
    pub fn state(&self) -> SnapshotState {
        *self.state.read()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.snapshot_name
    }

    /// Cancels the task. Already-produced artifacts are not deleted until
    /// `close` runs (which happens once all in-flight subtasks settle).
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
        self.first_error.set(CoreError::Cancelled(format!("snapshot {} cancelled", self.snapshot_name)));
        log::warn!("snapshot task {} cancelled", self.snapshot_name);
    }

    fn this(&self) -> Arc<Self> {
        self.self_weak.get().and_then(Weak::upgrade).expect("self_weak set in spawn")
    }

    async fn await_checkpoint_end(&self) {
        loop {
            if self.cp_finished.load(Ordering::Acquire) {
                return;
            }
            let notified = self.cp_notify.notified();
            if self.cp_finished.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }

    async fn run_partition(self: Arc<Self>, pair: GroupPartitionId) {
        let permit = match self.parallelism.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };
        if let Err(err) = self.run_partition_inner(pair).await {
            log::error!("snapshot {}: partition {pair} failed: {err}", self.snapshot_name);
            self.first_error.set(err);
        }
        drop(permit);
    }

    async fn run_partition_inner(&self, pair: GroupPartitionId) -> Result<()> {
        let entry = self
            .partitions
            .get(&pair)
            .ok_or(CoreError::NoSuchPartition { group_id: pair.group_id, partition_id: pair.partition_id })?;
        let length = *self
            .part_lengths
            .read()
            .get(&pair)
            .ok_or_else(|| CoreError::State(format!("allocation length missing for partition {pair}")))?;
        let backing = entry
            .store
            .backing_path()
            .ok_or_else(|| CoreError::State(format!("partition {pair} has no backing file to snapshot")))?;
        let cache_dir = pair.cache_group_dir_name();

        let sender = self.sender.clone();
        let backing_for_part = backing.clone();
        tokio::task::spawn_blocking(move || sender.send_part(&cache_dir, pair, &backing_for_part, length))
            .await
            .map_err(join_err)??;
        log::debug!("snapshot {}: tail copied for partition {pair}", self.snapshot_name);

        entry.delta_writer.mark_partition_copied();
        self.await_checkpoint_end().await;

        let sender = self.sender.clone();
        let cache_dir = pair.cache_group_dir_name();
        let delta_path = entry.delta_path.clone();
        tokio::task::spawn_blocking(move || sender.send_delta(&cache_dir, pair, &delta_path))
            .await
            .map_err(join_err)??;
        log::debug!("snapshot {}: delta sent for partition {pair}", self.snapshot_name);

        entry.delta_writer.close()?;
        entry.store.remove_write_listener(&entry.listener_handle);
        let _ = std::fs::remove_file(&entry.delta_path);
        Ok(())
    }

    async fn run(self: Arc<Self>) {
        let sender = self.sender.clone();
        let init_result =
            tokio::task::spawn_blocking(move || sender.init()).await.map_err(join_err).and_then(|r| r);
        if let Err(e) = init_result {
            log::error!("snapshot {}: sender init failed: {e}", self.snapshot_name);
            self.first_error.set(e);
            self.finish().await;
            return;
        }

        let mut handles = Vec::new();

        for (cache_dir, file_name, bytes) in self.cache_configs.clone() {
            let sender = self.sender.clone();
            let first_error = self.first_error.clone();
            handles.push(tokio::spawn(async move {
                let result = tokio::task::spawn_blocking(move || sender.send_cache_config(&cache_dir, &file_name, &bytes))
                    .await
                    .map_err(join_err)
                    .and_then(|r| r);
                if let Err(e) = result {
                    first_error.set(e);
                }
            }));
        }
        if let Some(bytes) = self.binary_meta.clone() {
            let sender = self.sender.clone();
            let first_error = self.first_error.clone();
            handles.push(tokio::spawn(async move {
                let result =
                    tokio::task::spawn_blocking(move || sender.send_binary_meta(&bytes)).await.map_err(join_err).and_then(|r| r);
                if let Err(e) = result {
                    first_error.set(e);
                }
            }));
        }
        if let Some(bytes) = self.marshaller_meta.clone() {
            let sender = self.sender.clone();
            let first_error = self.first_error.clone();
            handles.push(tokio::spawn(async move {
                let result = tokio::task::spawn_blocking(move || sender.send_marshaller_meta(&bytes))
                    .await
                    .map_err(join_err)
                    .and_then(|r| r);
                if let Err(e) = result {
                    first_error.set(e);
                }
            }));
        }
        for pair in self.partitions.keys().copied().collect::<Vec<_>>() {
            let this = self.clone();
            handles.push(tokio::spawn(async move { this.run_partition(pair).await }));
        }

        for handle in handles {
            let _ = handle.await;
        }

        self.finish().await;
    }

    async fn finish(self: Arc<Self>) {
        let err = self.first_error.take();
        if let Err(e) = self.sender.close(err.as_ref()) {
            log::warn!("snapshot {}: sender close failed: {e}", self.snapshot_name);
        }
        let cancelled = self.cancelled.load(Ordering::Relaxed);
        if err.is_some() || cancelled {
            log::warn!("snapshot {}: cleaning up temp dir after failure/cancel", self.snapshot_name);
            let _ = std::fs::remove_dir_all(&self.tmp_dir);
        }

        *self.state.write() = if err.is_some() {
            SnapshotState::DoneErr
        } else if cancelled {
            SnapshotState::Cancelled
        } else {
            SnapshotState::DoneOk
        };

        let listener: Arc<dyn CheckpointListener> = self.clone();
        self.checkpoint.remove_checkpoint_listener(&listener);

        log::info!("snapshot {} finished: {:?}", self.snapshot_name, self.state());
        if let Some(tx) = self.result_tx.lock().take() {
            let _ = tx.send(err.map_or(Ok(()), Err));
        }
    }
}

impl CheckpointListener for SnapshotTask {
    fn before_checkpoint_begin(&self, ctx: &CheckpointContext) {
        log::info!("snapshot {}: before checkpoint begin ({})", self.snapshot_name, ctx.reason);
        let progress = self.checkpoint.force_checkpoint(format!("snapshot:{}", self.snapshot_name));
        let cp_finished = self.cp_finished.clone();
        let cp_notify = self.cp_notify.clone();
        let first_error = self.first_error.clone();
        tokio::spawn(async move {
            match progress.finished.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => first_error.set(e),
                Err(_) => first_error.set(CoreError::State("checkpoint progress channel dropped".into())),
            }
            cp_finished.store(true, Ordering::Release);
            cp_notify.notify_waiters();
        });
    }

    fn on_mark_checkpoint_begin(&self, _ctx: &CheckpointContext) {}

    fn on_mark_checkpoint_end(&self, _ctx: &CheckpointContext) -> Result<()> {
        *self.state.write() = SnapshotState::Marked;
        for (pair, entry) in &self.partitions {
            if let Some(probe) = &self.ownership {
                if !probe.is_owning(*pair) {
                    let err = CoreError::State(format!("partition {pair} not in OWNING state at checkpoint mark"));
                    log::warn!("snapshot {}: {err}", self.snapshot_name);
                    self.first_error.set(err);
                    continue;
                }
            }
            let length = entry.store.size();
            self.part_lengths.write().insert(*pair, length);
            let allocated_pages = crate::utils::num::u64_to_usize(entry.store.pages()).unwrap_or(usize::MAX);
            entry.delta_writer.init(allocated_pages);
            log::debug!("snapshot {}: partition {pair} allocation length={length}", self.snapshot_name);
        }
        Ok(())
    }

    fn on_checkpoint_begin(&self, ctx: &CheckpointContext) {
        *self.state.write() = SnapshotState::Running;
        log::info!("snapshot {}: checkpoint begin ({}), submitting artifact tasks", self.snapshot_name, ctx.reason);
        let this = self.this();
        tokio::spawn(async move { this.run().await });
    }
}
