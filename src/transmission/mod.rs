//! Chunked transmission (C5): framed, resumable chunked send/receive of
//! files or byte streams over a blocking channel.

pub mod channel;
pub mod meta;
pub mod session;

pub use channel::Channel;
pub use meta::{ErrorDescription, TransmissionMeta, TransmissionPolicy, PARAM_GROUP_ID, PARAM_KIND, PARAM_PARTITION_ID};
pub use session::{ArtifactSink, ChunkSender, Source, StopCheckFn, receive_loop};
