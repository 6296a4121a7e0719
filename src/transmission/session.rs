//! Chunked transmission (C5): framed, resumable send/receive of one
//! artifact at a time over a [`Channel`].
//!
//! Framing on the wire is a big-endian `u64` byte length followed by a
//! bincode-encoded [`TransmissionMeta`], mirroring the length-prefixed frame
//! convention the teacher's write-ahead log uses for its own records. Each
//! meta is followed by exactly `meta.count` payload bytes, except the
//! sentinel `TransmissionMeta::closed()` which ends the session.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use bincode::config::standard;

use crate::errors::{CoreError, Result};

use super::channel::Channel;
use super::meta::{ErrorDescription, TransmissionMeta, TransmissionPolicy};

/// Polled between chunks so a cancelled snapshot or a stopped rebalance
/// aborts an in-flight transmission promptly.
pub type StopCheckFn = Arc<dyn Fn() -> bool + Send + Sync>;

fn write_framed<W: Write>(w: &mut W, meta: &TransmissionMeta) -> Result<()> {
    let bytes = bincode::serde::encode_to_vec(meta, standard()).map_err(CoreError::Encode)?;
    w.write_all(&(bytes.len() as u64).to_be_bytes())?;
    w.write_all(&bytes)?;
    w.flush()?;
    Ok(())
}

fn read_framed<R: Read>(r: &mut R) -> Result<TransmissionMeta> {
    let mut len_buf = [0u8; 8];
    r.read_exact(&mut len_buf)?;
    let len = u64::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    let (meta, _) =
        bincode::serde::decode_from_slice::<TransmissionMeta, _>(&buf, standard()).map_err(CoreError::Decode)?;
    Ok(meta)
}

/// What a sender transmits for one artifact: a byte range of an open file,
/// or an in-memory buffer.
pub enum Source<'a> {
    File(&'a mut File),
    Bytes(&'a [u8]),
}

/// Drives the sender side of one artifact transmission: acquire source IO,
/// optionally reconnect, then loop chunks until `transferred == count`.
pub struct ChunkSender {
    chunk_size: usize,
    stop: StopCheckFn,
}

impl ChunkSender {
    #[must_use]
    pub fn new(chunk_size: usize, stop: StopCheckFn) -> Self {
        Self { chunk_size: chunk_size.max(1), stop }
    }

    /// Sends `source` to `channel` as one artifact named `name`.
    ///
    /// If `reconnect` is set, first reads a reconnect-ack meta from the peer
    /// to learn how many bytes it already has for this name and resumes
    /// from there; a name mismatch or a negative acked offset is a protocol
    /// error.
    ///
    /// # Errors
    /// Returns an error on protocol mismatch, I/O failure, or cancellation.
    pub fn send(
        &self,
        channel: &mut dyn Channel,
        name: &str,
        mut source: Source<'_>,
        count: i64,
        policy: TransmissionPolicy,
        params: HashMap<String, Vec<u8>>,
        reconnect: bool,
    ) -> Result<()> {
        let mut transferred: i64 = 0;
        if reconnect {
            let ack = read_framed(channel)?;
            if ack.name != name {
                return Err(CoreError::Protocol(format!(
                    "reconnect ack name mismatch: expected {name}, got {}",
                    ack.name
                )));
            }
            if ack.offset < 0 {
                return Err(CoreError::Protocol("reconnect ack reported negative offset".into()));
            }
            transferred = ack.offset;
        }

        let mut meta =
            TransmissionMeta::new(name, transferred, count - transferred, transferred == 0, policy);
        meta.params = params;
        write_framed(channel, &meta)?;

        if let Source::File(file) = &mut source {
            file.seek(SeekFrom::Start(transferred as u64))?;
        }

        let mut buf = vec![0u8; self.chunk_size];
        while transferred < count {
            if (self.stop)() {
                return Err(CoreError::Cancelled(format!("transmission of {name} stopped")));
            }
            let want = self.chunk_size.min((count - transferred) as usize);
            let n = match &mut source {
                Source::File(file) => file.read(&mut buf[..want])?,
                Source::Bytes(data) => {
                    let start = transferred as usize;
                    let n = want;
                    buf[..n].copy_from_slice(&data[start..start + n]);
                    n
                }
            };
            if n == 0 {
                return Err(CoreError::Protocol(format!(
                    "source for {name} exhausted after {transferred} of {count} bytes"
                )));
            }
            channel.write_all(&buf[..n])?;
            transferred += n as i64;
            crate::transfer_trace!("sent {name}: {transferred}/{count}");
        }
        channel.flush()?;
        debug_assert_eq!(transferred, count);
        Ok(())
    }

    /// Writes the sentinel meta that terminates the session.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    pub fn close_session(&self, channel: &mut dyn Channel) -> Result<()> {
        write_framed(channel, &TransmissionMeta::closed())
    }

    /// Sends a terminal error to the peer, folding it into the session close
    /// frame so the far end can surface it instead of seeing a bare hangup.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    pub fn close_session_with_error(&self, channel: &mut dyn Channel, err: &CoreError) -> Result<()> {
        let meta = TransmissionMeta::closed().with_error(ErrorDescription::from_core_error(err));
        write_framed(channel, &meta)
    }
}

/// Receiver-side callbacks, one implementation per logical consumer (the
/// partition receiver is the production implementation; tests substitute a
/// simpler one). Calls for a single artifact always arrive in the order
/// `open_file_dest`/`chunk_size_hint` (once) then `on_chunk`/file-write
/// (zero or more times) then `on_artifact_complete` (once) — the ordering
/// property the design calls out for a receiving session.
pub trait ArtifactSink {
    /// Opens (or reopens, on reconnect) the destination for a `FILE`-policy
    /// artifact. Implementations must refuse to switch destinations for a
    /// reconnecting (`meta.initial == false`) artifact of the same name.
    ///
    /// # Errors
    /// Returns an error if the destination cannot be opened.
    fn open_file_dest(&mut self, meta: &TransmissionMeta) -> Result<File>;

    /// Optional chunk-size override for a `CHUNK`-policy artifact; `None`
    /// defers to the session default.
    fn chunk_size_hint(&mut self, meta: &TransmissionMeta) -> Option<usize> {
        let _ = meta;
        None
    }

    /// Delivers one filled (or final, partial) chunk buffer for a
    /// `CHUNK`-policy artifact.
    ///
    /// # Errors
    /// Returns an error if the chunk cannot be consumed.
    fn on_chunk(&mut self, meta: &TransmissionMeta, buf: &[u8]) -> Result<()>;

    /// Called once all of an artifact's bytes have arrived.
    ///
    /// # Errors
    /// Returns an error if post-processing fails.
    fn on_artifact_complete(&mut self, meta: &TransmissionMeta) -> Result<()>;

    /// If this sink has partial progress on a named artifact from a prior,
    /// dropped connection, returns `(name, bytes_already_held)` so the
    /// receive loop can offer a reconnect ack before the next meta arrives.
    fn pending_resume(&mut self) -> Option<(String, i64)> {
        None
    }
}

/// Runs the receiver side of a session to completion: reads artifacts in
/// arrival order until the peer sends the close sentinel or a hard error.
///
/// # Errors
/// Returns an error on protocol violation, I/O failure, cancellation, or an
/// error the peer reported via the close frame.
pub fn receive_loop(
    channel: &mut dyn Channel,
    stop: &StopCheckFn,
    default_chunk_size: usize,
    sink: &mut dyn ArtifactSink,
) -> Result<()> {
    loop {
        if let Some((name, uploaded)) = sink.pending_resume() {
            let ack = TransmissionMeta::new(name, uploaded, 0, false, TransmissionPolicy::File);
            write_framed(channel, &ack)?;
        }

        let meta = read_framed(channel)?;
        if meta.is_closed() {
            if let Some(err) = &meta.error {
                return Err(CoreError::Protocol(format!("peer closed session with error: {}", err.message)));
            }
            return Ok(());
        }
        if let Some(err) = &meta.error {
            return Err(CoreError::Protocol(format!("peer reported error for {}: {}", meta.name, err.message)));
        }

        match meta.policy {
            TransmissionPolicy::File => receive_file_artifact(channel, stop, default_chunk_size, &meta, sink)?,
            TransmissionPolicy::Chunk => receive_chunk_artifact(channel, stop, default_chunk_size, &meta, sink)?,
        }
    }
}

fn receive_file_artifact(
    channel: &mut dyn Channel,
    stop: &StopCheckFn,
    default_chunk_size: usize,
    meta: &TransmissionMeta,
    sink: &mut dyn ArtifactSink,
) -> Result<()> {
    let mut dest = sink.open_file_dest(meta)?;
    dest.seek(SeekFrom::Start(meta.offset.max(0) as u64))?;
    let mut transferred: i64 = 0;
    let mut buf = vec![0u8; default_chunk_size.max(1)];
    while transferred < meta.count {
        if stop() {
            return Err(CoreError::Cancelled(format!("receive of {} stopped", meta.name)));
        }
        let want = buf.len().min((meta.count - transferred) as usize);
        channel.read_exact(&mut buf[..want])?;
        dest.write_all(&buf[..want])?;
        transferred += want as i64;
        crate::transfer_trace!("received {}: {}/{}", meta.name, transferred, meta.count);
    }
    dest.flush()?;
    sink.on_artifact_complete(meta)
}

fn receive_chunk_artifact(
    channel: &mut dyn Channel,
    stop: &StopCheckFn,
    default_chunk_size: usize,
    meta: &TransmissionMeta,
    sink: &mut dyn ArtifactSink,
) -> Result<()> {
    let chunk_size = sink.chunk_size_hint(meta).filter(|&c| c > 0).unwrap_or(default_chunk_size).max(1);
    let mut transferred: i64 = 0;
    let mut buf = vec![0u8; chunk_size];
    while transferred < meta.count {
        if stop() {
            return Err(CoreError::Cancelled(format!("receive of {} stopped", meta.name)));
        }
        let want = chunk_size.min((meta.count - transferred) as usize);
        let mut filled = 0usize;
        while filled < want {
            let n = channel.read(&mut buf[filled..want])?;
            if n == 0 {
                return Err(CoreError::Protocol(format!(
                    "channel closed mid-artifact for {} after {transferred} of {} bytes",
                    meta.name, meta.count
                )));
            }
            filled += n;
        }
        sink.on_chunk(meta, &buf[..want])?;
        transferred += want as i64;
    }
    sink.on_artifact_complete(meta)
}
