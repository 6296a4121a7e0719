//! Snapshot sender (C4): a polymorphic sink that writes snapshot outputs
//! either to a local directory or to a remote peer over a chunked
//! transmission session.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use parking_lot::Mutex as PlMutex;
use serde::Serialize;

use crate::errors::{CoreError, FirstError, Result};
use crate::transmission::{Channel, ChunkSender, Source, TransmissionPolicy};
use crate::types::{ArtifactKind, GroupPartitionId, SerializableInstant};

/// Destination-agnostic sink for one snapshot's outputs, matching the
/// design's per-artifact operations. `close` is always called exactly once
/// by the owning [`crate::snapshot_task::SnapshotTask`], on success,
/// cancellation, or error.
pub trait SnapshotSender: Send + Sync {
    /// One-time setup before any artifact is sent.
    ///
    /// # Errors
    /// Returns an error if the sink cannot be prepared.
    fn init(&self) -> Result<()>;

    /// # Errors
    /// Returns an error if the config blob cannot be written/sent.
    fn send_cache_config(&self, cache_dir: &str, file_name: &str, bytes: &[u8]) -> Result<()>;

    /// # Errors
    /// Returns an error if the metadata blob cannot be written/sent.
    fn send_binary_meta(&self, bytes: &[u8]) -> Result<()>;

    /// # Errors
    /// Returns an error if the metadata blob cannot be written/sent.
    fn send_marshaller_meta(&self, bytes: &[u8]) -> Result<()>;

    /// Sends the first `length` bytes of `file` as the partition tail.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the sink write fails.
    fn send_part(&self, cache_dir: &str, pair: GroupPartitionId, file: &Path, length: u64) -> Result<()>;

    /// Sends the full contents of `file` as this partition's delta.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the sink write fails.
    fn send_delta(&self, cache_dir: &str, pair: GroupPartitionId, file: &Path) -> Result<()>;

    /// Releases resources exactly once. `error`, if present, is the first
    /// error observed anywhere in the owning snapshot task; it is preserved
    /// (e.g. propagated to the peer, or used to decide whether to delete a
    /// partially-written local tree).
    ///
    /// # Errors
    /// Returns an error if releasing resources itself fails.
    fn close(&self, error: Option<&CoreError>) -> Result<()>;
}

fn cache_group_dir(root: &Path, snapshot_name: &str, node_folder: &str, cache_dir: &str) -> PathBuf {
    root.join(snapshot_name).join(node_folder).join(cache_dir)
}

#[derive(Serialize)]
struct ManifestPartEntry {
    group_id: i32,
    partition_id: i32,
    part_file: String,
    part_length: u64,
    delta_file: String,
}

/// Local-sender manifest (B.1): lets a restore path or operational tooling
/// discover what a snapshot directory contains without re-deriving it from
/// directory listings.
#[derive(Serialize)]
struct Manifest {
    snapshot_name: String,
    source_node_id: String,
    started_at: SerializableInstant,
    parts: Vec<ManifestPartEntry>,
}

/// Writes snapshot outputs under
/// `<root>/<snapshotName>/<nodeFolder>/<cacheGroupDir>/` with the stable
/// filenames the persisted layout names: `part-<id>.bin`,
/// `part-<id>.bin.delta`, cache configs, and metadata blobs.
pub struct LocalSender {
    root: PathBuf,
    snapshot_name: String,
    node_folder: String,
    source_node_id: String,
    started_at: SerializableInstant,
    manifest: Mutex<Vec<ManifestPartEntry>>,
    first_error: FirstError,
}

impl LocalSender {
    #[must_use]
    pub fn new(root: PathBuf, snapshot_name: String, node_folder: String, source_node_id: String) -> Self {
        Self {
            root,
            snapshot_name,
            node_folder,
            source_node_id,
            started_at: SerializableInstant::now(),
            manifest: Mutex::new(Vec::new()),
            first_error: FirstError::new(),
        }
    }

    fn snapshot_root(&self) -> PathBuf {
        self.root.join(&self.snapshot_name)
    }

    fn node_root(&self) -> PathBuf {
        self.snapshot_root().join(&self.node_folder)
    }

    fn copy_range(src: &Path, dest: &Path, length: u64) -> std::io::Result<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut input = File::open(src)?;
        let mut output = File::create(dest)?;
        let mut remaining = length;
        let mut buf = vec![0u8; 256 * 1024];
        while remaining > 0 {
            let want = buf.len().min(remaining as usize);
            let n = std::io::Read::read(&mut input, &mut buf[..want])?;
            if n == 0 {
                break;
            }
            output.write_all(&buf[..n])?;
            remaining -= n as u64;
        }
        output.sync_all()
    }
}

impl SnapshotSender for LocalSender {
    fn init(&self) -> Result<()> {
        fs::create_dir_all(self.node_root())?;
        Ok(())
    }

    fn send_cache_config(&self, cache_dir: &str, file_name: &str, bytes: &[u8]) -> Result<()> {
        let dest = cache_group_dir(&self.root, &self.snapshot_name, &self.node_folder, cache_dir).join(file_name);
        crate::fsutil::write_atomic(&self.root.join("_tmp"), &dest, bytes)?;
        Ok(())
    }

    fn send_binary_meta(&self, bytes: &[u8]) -> Result<()> {
        let dest = self.node_root().join("binary-meta.bin");
        crate::fsutil::write_atomic(&self.root.join("_tmp"), &dest, bytes)?;
        Ok(())
    }

    fn send_marshaller_meta(&self, bytes: &[u8]) -> Result<()> {
        let dest = self.node_root().join("marshaller-meta.bin");
        crate::fsutil::write_atomic(&self.root.join("_tmp"), &dest, bytes)?;
        Ok(())
    }

    fn send_part(&self, cache_dir: &str, pair: GroupPartitionId, file: &Path, length: u64) -> Result<()> {
        let dest = cache_group_dir(&self.root, &self.snapshot_name, &self.node_folder, cache_dir)
            .join(pair.part_file_name());
        Self::copy_range(file, &dest, length)?;
        self.manifest.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(ManifestPartEntry {
            group_id: pair.group_id,
            partition_id: pair.partition_id,
            part_file: pair.part_file_name(),
            part_length: length,
            delta_file: pair.delta_file_name(),
        });
        log::debug!("local sender wrote part {pair} ({length} bytes) to {}", dest.display());
        Ok(())
    }

    fn send_delta(&self, cache_dir: &str, pair: GroupPartitionId, file: &Path) -> Result<()> {
        let dest = cache_group_dir(&self.root, &self.snapshot_name, &self.node_folder, cache_dir)
            .join(pair.delta_file_name());
        let len = fs::metadata(file)?.len();
        Self::copy_range(file, &dest, len)?;
        log::debug!("local sender wrote delta {pair} ({len} bytes) to {}", dest.display());
        Ok(())
    }

    fn close(&self, error: Option<&CoreError>) -> Result<()> {
        if let Some(err) = error {
            self.first_error.set(CoreError::State(err.to_string()));
            log::warn!("local sender closing after error, deleting {}", self.snapshot_root().display());
            let _ = fs::remove_dir_all(self.snapshot_root());
            return Ok(());
        }
        let manifest = Manifest {
            snapshot_name: self.snapshot_name.clone(),
            source_node_id: self.source_node_id.clone(),
            started_at: self.started_at,
            parts: std::mem::take(&mut *self.manifest.lock().unwrap_or_else(std::sync::PoisonError::into_inner)),
        };
        let bytes = serde_json::to_vec_pretty(&manifest).map_err(|e| CoreError::Protocol(e.to_string()))?;
        let dest = self.node_root().join("manifest.json");
        crate::fsutil::write_atomic(&self.root.join("_tmp"), &dest, &bytes)?;
        Ok(())
    }
}

/// Wraps a [`ChunkSender`] over a peer [`Channel`], mapping each `send*`
/// call onto a framed transmission carrying `(group, partition, kind)`
/// params. An `IOError` mid-transfer is retried, per §7, by re-issuing the
/// same artifact with `reconnect=true` so the peer's `pending_resume` ack
/// tells us where to pick up; this is attempted `io_retry_count` times
/// before the error is surfaced as the snapshot's failure.
pub struct RemoteSender {
    channel: PlMutex<Box<dyn Channel>>,
    chunk_sender: ChunkSender,
    io_retry_count: u32,
    first_error: FirstError,
}

impl RemoteSender {
    #[must_use]
    pub fn new(channel: Box<dyn Channel>, chunk_sender: ChunkSender, io_retry_count: u32) -> Self {
        Self { channel: PlMutex::new(channel), chunk_sender, io_retry_count, first_error: FirstError::new() }
    }

    /// Builds a `RemoteSender` whose retry budget is `config.io_retry_count`.
    #[must_use]
    pub fn from_config(
        channel: Box<dyn Channel>,
        chunk_sender: ChunkSender,
        config: &crate::config::SnapshotCoreConfig,
    ) -> Self {
        Self::new(channel, chunk_sender, config.io_retry_count)
    }

    /// Runs one `send` attempt through `build_source`, retrying on
    /// `CoreError::Io` up to `io_retry_count` times with `reconnect=true`.
    /// `build_source` is called fresh on every attempt since `Source`
    /// borrows its backing file/bytes and can't be reused across calls.
    fn send_retrying<'b>(
        &self,
        name: &str,
        count: i64,
        policy: TransmissionPolicy,
        params: &HashMap<String, Vec<u8>>,
        mut build_source: impl FnMut() -> Result<Source<'b>>,
    ) -> Result<()> {
        let mut channel = self.channel.lock();
        let mut attempt = 0u32;
        let mut reconnect = false;
        loop {
            let source = build_source()?;
            match self.chunk_sender.send(&mut **channel, name, source, count, policy, params.clone(), reconnect) {
                Ok(()) => return Ok(()),
                Err(CoreError::Io(e)) if attempt < self.io_retry_count => {
                    attempt += 1;
                    reconnect = true;
                    log::warn!(
                        "remote sender retrying {name} after I/O error (attempt {attempt}/{}): {e}",
                        self.io_retry_count
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn send_bytes(&self, name: &str, kind: ArtifactKind, bytes: &[u8]) -> Result<()> {
        let params = params_for(kind, None);
        self.send_retrying(name, bytes.len() as i64, TransmissionPolicy::Chunk, &params, || {
            Ok(Source::Bytes(bytes))
        })
    }

    fn send_file_range(
        &self,
        name: &str,
        kind: ArtifactKind,
        pair: Option<GroupPartitionId>,
        file: &Path,
        length: i64,
    ) -> Result<()> {
        let params = params_for(kind, pair);
        let mut src = File::open(file)?;
        self.send_retrying(name, length, TransmissionPolicy::File, &params, move || Ok(Source::File(&mut src)))
    }
}

fn params_for(kind: ArtifactKind, pair: Option<GroupPartitionId>) -> HashMap<String, Vec<u8>> {
    let mut params = HashMap::new();
    params.insert(crate::transmission::PARAM_KIND.to_string(), kind.as_str().as_bytes().to_vec());
    if let Some(pair) = pair {
        params.insert(crate::transmission::PARAM_GROUP_ID.to_string(), pair.group_id.to_le_bytes().to_vec());
        params.insert(
            crate::transmission::PARAM_PARTITION_ID.to_string(),
            pair.partition_id.to_le_bytes().to_vec(),
        );
    }
    params
}

impl SnapshotSender for RemoteSender {
    fn init(&self) -> Result<()> {
        Ok(())
    }

    fn send_cache_config(&self, _cache_dir: &str, file_name: &str, bytes: &[u8]) -> Result<()> {
        self.send_bytes(file_name, ArtifactKind::CacheCfg, bytes)
    }

    fn send_binary_meta(&self, bytes: &[u8]) -> Result<()> {
        self.send_bytes("binary-meta", ArtifactKind::BinaryMeta, bytes)
    }

    fn send_marshaller_meta(&self, bytes: &[u8]) -> Result<()> {
        self.send_bytes("marshaller-meta", ArtifactKind::MarshallerMeta, bytes)
    }

    fn send_part(&self, _cache_dir: &str, pair: GroupPartitionId, file: &Path, length: u64) -> Result<()> {
        self.send_file_range(&pair.part_file_name(), ArtifactKind::Part, Some(pair), file, length as i64)
    }

    fn send_delta(&self, _cache_dir: &str, pair: GroupPartitionId, file: &Path) -> Result<()> {
        let len = fs::metadata(file)?.len();
        self.send_file_range(&pair.delta_file_name(), ArtifactKind::Delta, Some(pair), file, len as i64)
    }

    fn close(&self, error: Option<&CoreError>) -> Result<()> {
        let mut channel = self.channel.lock();
        if let Some(err) = error {
            self.first_error.set(CoreError::State(err.to_string()));
            return self.chunk_sender.close_session_with_error(&mut **channel, err);
        }
        self.chunk_sender.close_session(&mut **channel)
    }
}
