//! Wire framing record for one artifact transmission.
//!
//! Every artifact begins with one serialized `TransmissionMeta` followed by
//! exactly `count` payload bytes; the session itself is terminated by a
//! sentinel meta with `offset = -1, count = -1, closeSession = true`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{ArtifactKind, GroupPartitionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransmissionPolicy {
    File,
    Chunk,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescription {
    pub kind: String,
    pub message: String,
}

impl ErrorDescription {
    #[must_use]
    pub fn from_core_error(err: &crate::errors::CoreError) -> Self {
        let kind = match err {
            crate::errors::CoreError::Io(_) => "IOError",
            crate::errors::CoreError::Decode(_) | crate::errors::CoreError::Encode(_) => "ProtocolError",
            crate::errors::CoreError::Protocol(_) => "ProtocolError",
            crate::errors::CoreError::Integrity(_) => "IntegrityError",
            crate::errors::CoreError::Cancelled(_) => "CancelledError",
            crate::errors::CoreError::State(_) => "StateError",
            crate::errors::CoreError::TopologyChanged(_) => "TopologyChanged",
            crate::errors::CoreError::NoSuchPartition { .. } => "StateError",
        };
        Self { kind: kind.to_string(), message: err.to_string() }
    }
}

/// Externally serialized framing record preceding each artifact's payload
/// bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransmissionMeta {
    pub name: String,
    pub offset: i64,
    pub count: i64,
    pub initial: bool,
    pub close_session: bool,
    pub params: HashMap<String, Vec<u8>>,
    pub policy: TransmissionPolicy,
    pub error: Option<ErrorDescription>,
}

pub const PARAM_KIND: &str = "kind";
pub const PARAM_GROUP_ID: &str = "groupId";
pub const PARAM_PARTITION_ID: &str = "partitionId";

impl TransmissionMeta {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        offset: i64,
        count: i64,
        initial: bool,
        policy: TransmissionPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            offset,
            count,
            initial,
            close_session: false,
            params: HashMap::new(),
            policy,
            error: None,
        }
    }

    /// The sentinel meta that terminates a transmission session.
    #[must_use]
    pub fn closed() -> Self {
        Self {
            name: String::new(),
            offset: -1,
            count: -1,
            initial: false,
            close_session: true,
            params: HashMap::new(),
            policy: TransmissionPolicy::Chunk,
            error: None,
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.close_session && self.offset == -1 && self.count == -1
    }

    #[must_use]
    pub fn with_kind(mut self, kind: ArtifactKind) -> Self {
        self.params.insert(PARAM_KIND.to_string(), kind.as_str().as_bytes().to_vec());
        self
    }

    #[must_use]
    pub fn with_partition(mut self, id: GroupPartitionId) -> Self {
        self.params.insert(PARAM_GROUP_ID.to_string(), id.group_id.to_le_bytes().to_vec());
        self.params.insert(PARAM_PARTITION_ID.to_string(), id.partition_id.to_le_bytes().to_vec());
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: ErrorDescription) -> Self {
        self.error = Some(error);
        self
    }

    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        self.params.get(PARAM_KIND).and_then(|b| std::str::from_utf8(b).ok())
    }

    #[must_use]
    pub fn partition(&self) -> Option<GroupPartitionId> {
        let group_id = self.params.get(PARAM_GROUP_ID)?;
        let partition_id = self.params.get(PARAM_PARTITION_ID)?;
        let group_id = i32::from_le_bytes(group_id.as_slice().try_into().ok()?);
        let partition_id = i32::from_le_bytes(partition_id.as_slice().try_into().ok()?);
        Some(GroupPartitionId::new(group_id, partition_id))
    }
}
