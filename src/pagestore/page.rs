//! On-disk page frame used by delta files: `[pageId | pageSize-byte payload | crc32]`.
//!
//! Every page handed to the delta writer, and every page copied by the
//! snapshot task, is wrapped in this frame before it leaves the process, so
//! a receiver or replay path can detect a corrupt or partial write (B.2).

use bincode::config::standard;
use bincode::serde::encode_to_vec;
use crc32fast::Hasher as Crc32Hasher;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageFrameHeader {
    pub page_id: u64,
    pub data_len: u32,
    pub crc32: u32,
}

/// One page-sized frame: a page id, its payload, and a checksum over both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageFrame {
    pub header: PageFrameHeader,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

impl PageFrame {
    #[must_use]
    pub fn new(page_id: u64, data: Vec<u8>) -> Self {
        let mut header = PageFrameHeader { page_id, data_len: data.len() as u32, crc32: 0 };
        header.crc32 = checksum(&header, &data);
        Self { header, data }
    }

    /// Verifies the embedded checksum against the current payload.
    #[must_use]
    pub fn verify_checksum(&self) -> bool {
        checksum(&self.header, &self.data) == self.header.crc32
    }
}

fn checksum(header: &PageFrameHeader, data: &[u8]) -> u32 {
    let mut zeroed = *header;
    zeroed.crc32 = 0;
    let mut hasher = Crc32Hasher::new();
    if let Ok(bytes) = encode_to_vec(zeroed, standard()) {
        hasher.update(&bytes);
    }
    hasher.update(data);
    hasher.finalize()
}
