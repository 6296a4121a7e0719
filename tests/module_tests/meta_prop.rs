//! Property tests for §8 property 5 ("Framing round-trip") and property 6
//! ("Chunk invariants").

use std::collections::HashMap;
use std::io::Write as _;

use bincode::config::standard;
use partition_snapshot_core::transmission::{
    ChunkSender, Source, TransmissionMeta, TransmissionPolicy, receive_loop,
};
use proptest::prelude::*;

fn arb_params() -> impl Strategy<Value = HashMap<String, Vec<u8>>> {
    prop::collection::hash_map(
        "[a-zA-Z]{1,8}",
        prop::collection::vec(any::<u8>(), 0..8),
        0..4,
    )
}

proptest! {
    /// Serializing any `TransmissionMeta` (including a null error and an
    /// empty params map) and deserializing yields an equal object.
    #[test]
    fn transmission_meta_round_trips(
        name in "[a-zA-Z0-9._-]{0,24}",
        offset in any::<i64>(),
        count in any::<i64>(),
        initial in any::<bool>(),
        close_session in any::<bool>(),
        params in arb_params(),
        is_file in any::<bool>(),
        has_error in any::<bool>(),
    ) {
        let mut meta = TransmissionMeta::new(
            name,
            offset,
            count,
            initial,
            if is_file { TransmissionPolicy::File } else { TransmissionPolicy::Chunk },
        );
        meta.close_session = close_session;
        meta.params = params;
        if has_error {
            meta.error = Some(partition_snapshot_core::transmission::ErrorDescription {
                kind: "IOError".into(),
                message: "synthetic".into(),
            });
        }

        let bytes = bincode::serde::encode_to_vec(&meta, standard()).unwrap();
        let (decoded, _) =
            bincode::serde::decode_from_slice::<TransmissionMeta, _>(&bytes, standard()).unwrap();
        prop_assert_eq!(decoded, meta);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]
    /// For any payload length and chunk size, a chunk-policy transfer keeps
    /// `transferred <= total` at every boundary and ends with
    /// `transferred == total`; the receiver reassembles the exact bytes.
    #[test]
    fn chunk_transfer_keeps_transferred_within_total(
        payload in prop::collection::vec(any::<u8>(), 0..2000),
        chunk_size in 1usize..257,
    ) {
        let mut send_chan = crate::support::LoopChannel::new();
        let sender = ChunkSender::new(chunk_size, crate::support::never_stop());
        sender
            .send(
                &mut send_chan,
                "blob",
                Source::Bytes(&payload),
                payload.len() as i64,
                TransmissionPolicy::Chunk,
                HashMap::new(),
                false,
            )
            .unwrap();
        sender.close_session(&mut send_chan).unwrap();

        struct BoundsCheckingSink<'a> {
            total: i64,
            transferred: i64,
            out: &'a mut Vec<u8>,
        }
        impl<'a> partition_snapshot_core::transmission::ArtifactSink for BoundsCheckingSink<'a> {
            fn open_file_dest(
                &mut self,
                _meta: &TransmissionMeta,
            ) -> partition_snapshot_core::errors::Result<std::fs::File> {
                unreachable!("chunk policy only")
            }
            fn on_chunk(
                &mut self,
                meta: &TransmissionMeta,
                buf: &[u8],
            ) -> partition_snapshot_core::errors::Result<()> {
                self.total = meta.count;
                self.transferred += buf.len() as i64;
                assert!(self.transferred <= self.total);
                self.out.write_all(buf).unwrap();
                Ok(())
            }
            fn on_artifact_complete(
                &mut self,
                _meta: &TransmissionMeta,
            ) -> partition_snapshot_core::errors::Result<()> {
                assert_eq!(self.transferred, self.total);
                Ok(())
            }
        }

        let mut recv_chan = send_chan.peer();
        let mut received = Vec::new();
        let mut sink = BoundsCheckingSink { total: 0, transferred: 0, out: &mut received };
        let stop = crate::support::never_stop();
        receive_loop(&mut recv_chan, &stop, chunk_size, &mut sink).unwrap();

        prop_assert_eq!(received, payload);
    }
}
