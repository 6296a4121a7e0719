//! Exercises the open-question resolution the design calls out: the
//! post-barrier capture path reads the page's *current* contents from the
//! store rather than trusting the buffer the write call happened to pass in.

use std::fs::File;
use std::sync::Arc;

use bincode::config::standard;
use partition_snapshot_core::delta::DeltaWriter;
use partition_snapshot_core::pagestore::{PageFrame, PageId, PageStore, WriteListener};

fn always(value: bool) -> Arc<dyn Fn() -> bool + Send + Sync> {
    Arc::new(move || value)
}

#[test]
fn post_barrier_capture_reads_current_store_contents_not_the_callback_buffer() {
    let store: Arc<dyn PageStore> = Arc::new(crate::support::FakePageStore::new(16));
    let dir = tempfile::tempdir().unwrap();
    let delta_file = File::create(dir.path().join("p.bin.delta")).unwrap();
    let writer = DeltaWriter::new(store.clone(), delta_file, always(true), always(false));
    writer.init(4);

    let id = PageId::new(0, 0);
    store.write(id, &[0xAA; 16]).unwrap();

    writer.on_page_write(id, &[0xFF; 16]);
    writer.close().unwrap();

    let mut f = File::open(dir.path().join("p.bin.delta")).unwrap();
    let (frame, _) = bincode::serde::decode_from_std_read::<PageFrame, _, _>(&mut f, standard()).unwrap();
    assert_eq!(frame.data, vec![0xAA; 16], "delta should capture the store's page, not the stale write-callback buffer");
}
