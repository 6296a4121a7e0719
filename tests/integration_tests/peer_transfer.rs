//! E4 — peer stream, happy path (§8): a part file and its delta cross a
//! simulated peer channel through the chunked-transmission protocol and
//! come out the other side installed and replayed into a fresh store.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use bincode::config::standard;
use partition_snapshot_core::checkpoint::{CheckpointContext, CheckpointListener};
use partition_snapshot_core::errors::Result;
use partition_snapshot_core::pagestore::{FilePageStore, PageFrame, PageId, PageStore};
use partition_snapshot_core::restorer::PartitionRestorer;
use partition_snapshot_core::transmission::session::receive_loop;
use partition_snapshot_core::transmission::{ChunkSender, Source, TransmissionPolicy};
use partition_snapshot_core::types::{ArtifactKind, GroupPartitionId};
use tokio::sync::oneshot;

struct DiskManager {
    dest_dir: PathBuf,
}

impl partition_snapshot_core::restorer::PartitionStoreManager for DiskManager {
    fn destination_path(&self, pair: GroupPartitionId) -> PathBuf {
        self.dest_dir.join(pair.part_file_name())
    }
    fn partition_file_exists(&self, pair: GroupPartitionId) -> bool {
        self.destination_path(pair).exists()
    }
    fn read_only_counter(&self, _pair: GroupPartitionId) -> i64 {
        100
    }
    fn live_counter(&self, _pair: GroupPartitionId) -> i64 {
        100
    }
    fn switch_to_writable(&self, _pair: GroupPartitionId) -> Result<()> {
        Ok(())
    }
    fn open_installed_store(&self, pair: GroupPartitionId) -> Result<Arc<dyn PageStore>> {
        Ok(Arc::new(FilePageStore::open(&self.destination_path(pair), 32, 0)?))
    }
    fn await_partition_release(&self, _pair: GroupPartitionId) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(());
        rx
    }
}

fn artifact_params(pair: GroupPartitionId, kind: ArtifactKind) -> HashMap<String, Vec<u8>> {
    let mut params = HashMap::new();
    params.insert(partition_snapshot_core::transmission::PARAM_KIND.to_string(), kind.as_str().as_bytes().to_vec());
    params.insert(
        partition_snapshot_core::transmission::PARAM_GROUP_ID.to_string(),
        pair.group_id.to_le_bytes().to_vec(),
    );
    params.insert(
        partition_snapshot_core::transmission::PARAM_PARTITION_ID.to_string(),
        pair.partition_id.to_le_bytes().to_vec(),
    );
    params
}

#[tokio::test]
async fn sender_to_receiver_round_trip_reconstructs_the_partition() {
    let dir = tempfile::tempdir().unwrap();
    let pair = GroupPartitionId::new(10, 0);

    let source_path = dir.path().join("source.bin");
    let source = FilePageStore::open(&source_path, 32, 0).unwrap();
    for page in 0..4u32 {
        source.write(PageId::new(0, page), &[page as u8; 32]).unwrap();
    }
    let tail_bytes = std::fs::read(&source_path).unwrap();

    let delta_path = dir.path().join("delta.bin");
    {
        let mut f = std::fs::File::create(&delta_path).unwrap();
        let frame = PageFrame::new(PageId::new(0, 2).0, vec![0xEE; 32]);
        bincode::serde::encode_into_std_write(&frame, &mut f, standard()).unwrap();
    }
    let delta_len = std::fs::metadata(&delta_path).unwrap().len();

    let mut send_chan = crate::support::LoopChannel::new();
    let chunk_sender = ChunkSender::new(48, crate::support::never_stop());
    {
        let mut source_file = std::fs::File::open(&source_path).unwrap();
        chunk_sender
            .send(
                &mut send_chan,
                &pair.part_file_name(),
                Source::File(&mut source_file),
                tail_bytes.len() as i64,
                TransmissionPolicy::File,
                artifact_params(pair, ArtifactKind::Part),
                false,
            )
            .unwrap();
    }
    {
        let mut delta_file = std::fs::File::open(&delta_path).unwrap();
        chunk_sender
            .send(
                &mut send_chan,
                &pair.delta_file_name(),
                Source::File(&mut delta_file),
                delta_len as i64,
                TransmissionPolicy::File,
                artifact_params(pair, ArtifactKind::Delta),
                false,
            )
            .unwrap();
    }
    chunk_sender.close_session(&mut send_chan).unwrap();

    std::fs::create_dir_all(dir.path().join("dest")).unwrap();
    let manager = Arc::new(DiskManager { dest_dir: dir.path().join("dest") });
    let (restorer, mut completions) = PartitionRestorer::new(manager.clone());

    let mut recv_chan = send_chan.peer();
    let staging = dir.path().join("staging");
    let mut receiver = partition_snapshot_core::receiver::PartitionReceiver::new(
        staging,
        "peer-1".into(),
        restorer.clone(),
        Box::new(|_, _, _| Ok(())),
        Box::new(|_| Ok(())),
        Box::new(|_| Ok(())),
    );
    let stop = crate::support::never_stop();
    receive_loop(&mut recv_chan, &stop, 48, &mut receiver).unwrap();

    let ctx = CheckpointContext { reason: "peer-transfer".into() };
    restorer.on_mark_checkpoint_begin(&ctx);

    let completion = completions.recv().await.unwrap();
    assert_eq!(completion.pair, pair);
    assert_eq!(completion.hwm, 100);

    let installed_bytes = std::fs::read(manager.destination_path(pair)).unwrap();
    assert_eq!(&installed_bytes[..tail_bytes.len()], tail_bytes.as_slice());

    let installed = FilePageStore::open(&manager.destination_path(pair), 32, 0).unwrap();
    let mut buf = vec![0u8; 32];
    installed.read(PageId::new(0, 2), &mut buf).unwrap();
    assert_eq!(buf, vec![0xEE; 32], "delta replay should overwrite page 2 with its post-barrier contents");
    installed.read(PageId::new(0, 0), &mut buf).unwrap();
    assert_eq!(buf, vec![0u8; 32], "page 0 untouched by the delta should keep its tail-copy contents");
}
