//! Shared identifiers and small value types used across the snapshot and
//! rebalance components.

use serde::{Deserialize, Serialize};

/// Identifies a partition within a cache group.
///
/// The encoding `(group_id << 32) | (partition_id as u32 as i64)` is the
/// canonical unique key and is order-preserving within a group: for a fixed
/// `group_id`, encoded keys sort the same way `partition_id` does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupPartitionId {
    pub group_id: i32,
    pub partition_id: i32,
}

/// Reserved partition id denoting the per-group index partition.
pub const INDEX_PARTITION_ID: i32 = -1;

impl GroupPartitionId {
    #[must_use]
    pub const fn new(group_id: i32, partition_id: i32) -> Self {
        Self { group_id, partition_id }
    }

    #[must_use]
    pub const fn is_index_partition(self) -> bool {
        self.partition_id == INDEX_PARTITION_ID
    }

    /// Canonical encoded key: order-preserving within a group.
    #[must_use]
    pub const fn encode(self) -> i64 {
        ((self.group_id as i64) << 32) | (self.partition_id as u32 as i64)
    }

    #[must_use]
    pub const fn decode(key: i64) -> Self {
        let group_id = (key >> 32) as i32;
        let partition_id = (key & 0xFFFF_FFFF) as u32 as i32;
        Self { group_id, partition_id }
    }

    /// Stable directory name for this partition within a cache-group folder.
    #[must_use]
    pub fn part_file_name(self) -> String {
        format!("part-{}.bin", self.partition_id)
    }

    #[must_use]
    pub fn delta_file_name(self) -> String {
        format!("part-{}.bin.delta", self.partition_id)
    }

    #[must_use]
    pub fn cache_group_dir_name(self) -> String {
        format!("cache-group-{}", self.group_id)
    }
}

impl std::fmt::Display for GroupPartitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.group_id, self.partition_id)
    }
}

/// Kind of artifact carried by one transmission / one local-sender write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactKind {
    Part,
    Delta,
    CacheCfg,
    BinaryMeta,
    MarshallerMeta,
}

impl ArtifactKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Part => "part",
            Self::Delta => "delta",
            Self::CacheCfg => "cacheCfg",
            Self::BinaryMeta => "binaryMeta",
            Self::MarshallerMeta => "marshallerMeta",
        }
    }
}

/// A wrapper for `chrono::DateTime<Utc>` with an explicit, stable wire
/// format (RFC 3339) rather than relying on serde's default chrono
/// representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerializableInstant(pub chrono::DateTime<chrono::Utc>);

impl SerializableInstant {
    #[must_use]
    pub fn now() -> Self {
        Self(chrono::Utc::now())
    }
}

impl Serialize for SerializableInstant {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_rfc3339())
    }
}

impl<'de> Deserialize<'de> for SerializableInstant {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let dt = chrono::DateTime::parse_from_rfc3339(&s)
            .map_err(serde::de::Error::custom)?
            .with_timezone(&chrono::Utc);
        Ok(Self(dt))
    }
}
