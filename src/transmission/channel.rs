//! Blocking duplex channel contract backing one transmission session.
//!
//! Opening the channel itself is the discovery/channel collaborator's job
//! (`openChannel(peerId, topic, initMsg) -> Channel`, out of scope per the
//! crate's non-goals); this crate only consumes whatever duplex byte stream
//! it is handed, one transmission thread per active session as the design
//! lays out in its concurrency model.

use std::io::{Read, Write};

/// A blocking, bidirectional byte stream serving both the send and receive
/// loops of a single topic with a single peer.
pub trait Channel: Read + Write + Send {}

impl<T: Read + Write + Send + ?Sized> Channel for T {}
