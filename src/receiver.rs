//! Partition receiver (C6): the [`ArtifactSink`] driving the far end of a
//! chunked transmission session, staging each artifact under a temp path and
//! handing completed partition files and deltas off to the
//! [`crate::restorer::PartitionRestorer`].

use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use crate::errors::{CoreError, Result};
use crate::restorer::PartitionRestorer;
use crate::transmission::session::ArtifactSink;
use crate::transmission::TransmissionMeta;
use crate::types::{ArtifactKind, GroupPartitionId};

/// Where staged artifacts land before they are installed or interpreted.
/// The receiver never writes directly to a partition's final location; that
/// is the restorer's job once a file artifact is fully received.
pub struct PartitionReceiver {
    staging_dir: PathBuf,
    node_id: String,
    restorer: Arc<PartitionRestorer>,
    in_memory: std::sync::Mutex<HashMap<String, Vec<u8>>>,
    /// `(name, staged path)` of a `FILE`-policy artifact currently mid-receive,
    /// so a dropped connection can report `pending_resume` once a fresh
    /// session resumes reading from this same sink.
    in_flight_file: std::sync::Mutex<Option<(String, PathBuf)>>,
    on_cache_config: Box<dyn Fn(&str, &str, Vec<u8>) -> Result<()> + Send + Sync>,
    on_binary_meta: Box<dyn Fn(Vec<u8>) -> Result<()> + Send + Sync>,
    on_marshaller_meta: Box<dyn Fn(Vec<u8>) -> Result<()> + Send + Sync>,
}

impl PartitionReceiver {
    #[must_use]
    pub fn new(
        staging_dir: PathBuf,
        node_id: String,
        restorer: Arc<PartitionRestorer>,
        on_cache_config: Box<dyn Fn(&str, &str, Vec<u8>) -> Result<()> + Send + Sync>,
        on_binary_meta: Box<dyn Fn(Vec<u8>) -> Result<()> + Send + Sync>,
        on_marshaller_meta: Box<dyn Fn(Vec<u8>) -> Result<()> + Send + Sync>,
    ) -> Self {
        Self {
            staging_dir,
            node_id,
            restorer,
            in_memory: std::sync::Mutex::new(HashMap::new()),
            in_flight_file: std::sync::Mutex::new(None),
            on_cache_config,
            on_binary_meta,
            on_marshaller_meta,
        }
    }

    fn staged_path(&self, pair: GroupPartitionId, kind: ArtifactKind) -> PathBuf {
        let file_name = match kind {
            ArtifactKind::Part => format!("{}-{}.part.staged", pair.group_id, pair.partition_id),
            ArtifactKind::Delta => format!("{}-{}.delta.staged", pair.group_id, pair.partition_id),
            _ => unreachable!("staged_path only used for file-policy artifacts"),
        };
        self.staging_dir.join(file_name)
    }

    fn artifact_kind(meta: &TransmissionMeta) -> Result<ArtifactKind> {
        match meta.kind() {
            Some("part") => Ok(ArtifactKind::Part),
            Some("delta") => Ok(ArtifactKind::Delta),
            Some("cacheCfg") => Ok(ArtifactKind::CacheCfg),
            Some("binaryMeta") => Ok(ArtifactKind::BinaryMeta),
            Some("marshallerMeta") => Ok(ArtifactKind::MarshallerMeta),
            other => Err(CoreError::Protocol(format!("unrecognized artifact kind {other:?} for {}", meta.name))),
        }
    }
}

impl ArtifactSink for PartitionReceiver {
    fn open_file_dest(&mut self, meta: &TransmissionMeta) -> Result<File> {
        let kind = Self::artifact_kind(meta)?;
        let pair = meta
            .partition()
            .ok_or_else(|| CoreError::Protocol(format!("{} is missing group/partition params", meta.name)))?;
        std::fs::create_dir_all(&self.staging_dir)?;
        let path = self.staged_path(pair, kind);

        let mut in_flight = self.in_flight_file.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match in_flight.as_ref() {
            Some((name, _)) if !meta.initial && name != &meta.name => {
                return Err(CoreError::Protocol(format!(
                    "reconnect for {} while {name} is still in flight",
                    meta.name
                )));
            }
            _ => *in_flight = Some((meta.name.clone(), path.clone())),
        }

        Ok(crate::fsutil::open_rw_no_trunc(&path)?)
    }

    fn on_chunk(&mut self, meta: &TransmissionMeta, buf: &[u8]) -> Result<()> {
        let mut in_memory = self.in_memory.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        in_memory.entry(meta.name.clone()).or_default().extend_from_slice(buf);
        Ok(())
    }

    fn on_artifact_complete(&mut self, meta: &TransmissionMeta) -> Result<()> {
        let kind = Self::artifact_kind(meta)?;
        if matches!(kind, ArtifactKind::Part | ArtifactKind::Delta) {
            *self.in_flight_file.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = None;
        }
        match kind {
            ArtifactKind::Part => {
                let pair = meta
                    .partition()
                    .ok_or_else(|| CoreError::Protocol(format!("{} is missing group/partition params", meta.name)))?;
                let staged = self.staged_path(pair, kind);
                log::info!("received partition file {pair} ({} bytes) from {}", meta.count, self.node_id);
                self.restorer.on_partition_received(&self.node_id, &staged, pair)
            }
            ArtifactKind::Delta => {
                let pair = meta
                    .partition()
                    .ok_or_else(|| CoreError::Protocol(format!("{} is missing group/partition params", meta.name)))?;
                let staged = self.staged_path(pair, kind);
                log::info!("received delta {pair} ({} bytes) from {}", meta.count, self.node_id);
                self.restorer.on_delta_received(pair, staged);
                Ok(())
            }
            ArtifactKind::CacheCfg => {
                let bytes = self
                    .in_memory
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .remove(&meta.name)
                    .unwrap_or_default();
                (self.on_cache_config)("default", &meta.name, bytes)
            }
            ArtifactKind::BinaryMeta => {
                let bytes = self
                    .in_memory
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .remove(&meta.name)
                    .unwrap_or_default();
                (self.on_binary_meta)(bytes)
            }
            ArtifactKind::MarshallerMeta => {
                let bytes = self
                    .in_memory
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .remove(&meta.name)
                    .unwrap_or_default();
                (self.on_marshaller_meta)(bytes)
            }
        }
    }

    fn pending_resume(&mut self) -> Option<(String, i64)> {
        let in_flight = self.in_flight_file.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let (name, path) = in_flight.as_ref()?;
        let uploaded = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        Some((name.clone(), uploaded as i64))
    }
}
