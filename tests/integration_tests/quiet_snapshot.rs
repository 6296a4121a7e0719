//! E1 — quiet snapshot, two partitions (§8). No writes land during the
//! snapshot window, so both delta files stay header-only and every part
//! file's CRC matches the live store's.

use std::collections::HashMap;
use std::sync::Arc;

use crc32fast::Hasher as Crc32;
use partition_snapshot_core::config::SnapshotCoreConfig;
use partition_snapshot_core::pagestore::{FilePageStore, PageId, PageStore};
use partition_snapshot_core::sender::LocalSender;
use partition_snapshot_core::snapshot_task::{SnapshotState, SnapshotTask};
use partition_snapshot_core::types::GroupPartitionId;

fn crc_of(bytes: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(bytes);
    hasher.finalize()
}

#[tokio::test]
async fn quiet_snapshot_reconstructs_byte_identical_parts() {
    let dir = tempfile::tempdir().unwrap();
    let mut partitions: HashMap<GroupPartitionId, Arc<dyn PageStore>> = HashMap::new();
    let mut expected_crc = HashMap::new();

    for p in 0..2i32 {
        let store = Arc::new(FilePageStore::open(&dir.path().join(format!("p{p}.bin")), 128, 0).unwrap());
        for page in 0..8u32 {
            store.write(PageId::new(p, page), &[(p * 10 + page as i32) as u8; 128]).unwrap();
        }
        let pair = GroupPartitionId::new(10, p);
        let snapshot_bytes = std::fs::read(dir.path().join(format!("p{p}.bin"))).unwrap();
        expected_crc.insert(pair, crc_of(&snapshot_bytes));
        partitions.insert(pair, store as Arc<dyn PageStore>);
    }

    let config = SnapshotCoreConfig::builder().temp_dir(dir.path().join("tmp")).build();
    let out_root = dir.path().join("out");
    let sender = Arc::new(LocalSender::new(
        out_root.clone(),
        "snap-e1".into(),
        "node-a".into(),
        "node-a".into(),
    ));
    let checkpoint = crate::support::FakeCheckpointSubsystem::new();

    let (task, rx) = SnapshotTask::spawn(
        &config,
        checkpoint.clone(),
        sender,
        "snap-e1".into(),
        "node-a".into(),
        partitions,
        None,
        Vec::new(),
        None,
        None,
    )
    .unwrap();

    checkpoint.drive("e1");
    let result = rx.await.unwrap();
    assert!(result.is_ok(), "{result:?}");
    assert_eq!(task.state(), SnapshotState::DoneOk);

    for (pair, crc) in expected_crc {
        let group_dir = out_root.join("snap-e1").join("node-a").join(pair.cache_group_dir_name());
        let part_bytes = std::fs::read(group_dir.join(pair.part_file_name())).unwrap();
        assert_eq!(crc_of(&part_bytes), crc, "partition {pair} did not reconstruct byte-identically");

        let delta_bytes = std::fs::read(group_dir.join(pair.delta_file_name())).unwrap();
        assert!(delta_bytes.is_empty(), "quiet snapshot should produce an empty delta for {pair}");
    }
}
