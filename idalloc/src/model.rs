//! Data types shared across the id allocation subsystem.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Sentinel returned by an exhausted [`IdRangeIterator`](crate::range::IdRangeIterator).
pub const VALUE_REPRESENTING_NULL: u64 = u64::MAX;

/// Identity of a cluster member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberId(Uuid);

impl MemberId {
    pub fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MemberId{{{}}}", &self.0.simple().to_string()[..8])
    }
}

/// Who the consensus layer currently believes is leader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaderInfo {
    /// `None` while no leader is known (e.g. during an election).
    pub member_id: Option<MemberId>,
    pub term: u64,
}

impl LeaderInfo {
    pub fn new(member_id: Option<MemberId>, term: u64) -> Self {
        Self { member_id, term }
    }
}

/// Class of identifiers allocated independently of one another.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum IdType {
    Node = 0x01,
    Relationship = 0x02,
    Property = 0x03,
    StringBlock = 0x04,
    ArrayBlock = 0x05,
    PropertyKeyToken = 0x06,
    PropertyKeyTokenName = 0x07,
    RelationshipTypeToken = 0x08,
    RelationshipTypeTokenName = 0x09,
    LabelToken = 0x0A,
    LabelTokenName = 0x0B,
    NeoStore = 0x0C,
    RelationshipGroup = 0x0D,
    Schema = 0x0E,
    NodeLabels = 0x0F,
}

impl IdType {
    /// Every id type, in wire-id order.
    pub const ALL: [IdType; 15] = [
        IdType::Node,
        IdType::Relationship,
        IdType::Property,
        IdType::StringBlock,
        IdType::ArrayBlock,
        IdType::PropertyKeyToken,
        IdType::PropertyKeyTokenName,
        IdType::RelationshipTypeToken,
        IdType::RelationshipTypeTokenName,
        IdType::LabelToken,
        IdType::LabelTokenName,
        IdType::NeoStore,
        IdType::RelationshipGroup,
        IdType::Schema,
        IdType::NodeLabels,
    ];

    /// Returns the wire id of this type.
    pub fn id(&self) -> u8 {
        *self as u8
    }

    /// Converts a wire id back to an IdType.
    pub fn from_id(id: u8) -> Result<Self> {
        IdType::ALL
            .iter()
            .copied()
            .find(|t| t.id() == id)
            .ok_or_else(|| Error::Encoding(format!("invalid id type: 0x{:02x}", id)))
    }

    /// Highest id that may ever be handed out for this type.
    pub fn max_id(&self) -> u64 {
        match self {
            IdType::Node
            | IdType::Relationship
            | IdType::Property
            | IdType::StringBlock
            | IdType::ArrayBlock
            | IdType::RelationshipGroup
            | IdType::NodeLabels => (1 << 35) - 1,
            IdType::PropertyKeyToken => (1 << 24) - 1,
            IdType::RelationshipTypeToken => (1 << 16) - 1,
            IdType::PropertyKeyTokenName
            | IdType::RelationshipTypeTokenName
            | IdType::LabelToken
            | IdType::LabelTokenName
            | IdType::NeoStore
            | IdType::Schema => u32::MAX as u64,
        }
    }
}

impl std::fmt::Display for IdType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Ids available to a generator: freed ids to reuse first, then a contiguous
/// run `[range_start, range_start + range_length)`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IdRange {
    defrag_ids: Vec<u64>,
    range_start: u64,
    range_length: u64,
}

impl IdRange {
    pub fn new(defrag_ids: Vec<u64>, range_start: u64, range_length: u64) -> Self {
        Self {
            defrag_ids,
            range_start,
            range_length,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn defrag_ids(&self) -> &[u64] {
        &self.defrag_ids
    }

    pub fn range_start(&self) -> u64 {
        self.range_start
    }

    pub fn range_length(&self) -> u64 {
        self.range_length
    }

    /// One past the last id of the contiguous part, saturating at the end
    /// of the id space.
    pub fn range_end(&self) -> u64 {
        self.range_start.saturating_add(self.range_length)
    }

    /// Total number of ids this range can yield.
    pub fn total_size(&self) -> u64 {
        (self.defrag_ids.len() as u64).saturating_add(self.range_length)
    }

    pub fn iter(&self) -> crate::range::IdRangeIterator {
        crate::range::IdRangeIterator::new(self.clone())
    }
}

impl std::fmt::Display for IdRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "IdRange[{}-{}, defrag {:?}]",
            self.range_start,
            self.range_end().saturating_sub(1),
            self.defrag_ids
        )
    }
}

/// A range granted by the cluster, as seen by the requesting member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdAllocation {
    pub range: IdRange,
    /// Highest id any member could have consumed before this range, or -1.
    pub highest_id_in_use: i64,
    /// Command index at which the grant was applied.
    pub log_index: i64,
}

impl IdAllocation {
    pub fn new(range: IdRange, highest_id_in_use: i64, log_index: i64) -> Self {
        Self {
            range,
            highest_id_in_use,
            log_index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_round_trip_every_id_type_through_wire_id() {
        for id_type in IdType::ALL {
            assert_eq!(IdType::from_id(id_type.id()).unwrap(), id_type);
        }
    }

    #[test]
    fn should_reject_unknown_wire_id() {
        // when
        let result = IdType::from_id(0x42);

        // then
        assert!(matches!(result, Err(Error::Encoding(_))));
    }

    #[test]
    fn should_report_range_bounds() {
        // given
        let range = IdRange::new(vec![3, 4], 1024, 10);

        // then
        assert_eq!(range.range_end(), 1034);
        assert_eq!(range.total_size(), 12);
        assert_eq!(range.to_string(), "IdRange[1024-1033, defrag [3, 4]]");
    }
}
