//! Encoding of replicated commands and of the persisted allocation state.
//!
//! Replicated content:
//!
//! ```text
//! | content tag (u8) | body |
//!
//! IdAllocation (0x01):     | owner uuid (16) | id type (u8) | range start (u64) | range length (u64) |
//! Transaction (0x02):      | length (u32) | payload (length bytes) |
//! NewLeaderBarrier (0x03): (empty)
//! ```
//!
//! Allocation state journal payload:
//!
//! ```text
//! | count (u16) | (id type (u8), first unallocated (u64)) * count | last applied index (i64) |
//! ```
//!
//! All integers are big-endian.

use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};
use common::serde::encoding::{
    decode_array, decode_array_count, decode_i64, decode_u8, decode_u32, decode_u64,
    encode_array_count, expect_exhausted,
};
use common::{DeserializeError, StateMarshal};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{IdType, MemberId};
use crate::state::IdAllocationState;

/// One-byte tag identifying the kind of replicated content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContentType {
    IdAllocation = 0x01,
    Transaction = 0x02,
    NewLeaderBarrier = 0x03,
}

impl ContentType {
    pub fn id(&self) -> u8 {
        *self as u8
    }

    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            0x01 => Ok(ContentType::IdAllocation),
            0x02 => Ok(ContentType::Transaction),
            0x03 => Ok(ContentType::NewLeaderBarrier),
            other => Err(Error::Encoding(format!(
                "invalid content type: 0x{:02x}",
                other
            ))),
        }
    }
}

/// Request by `owner` for the ids `[range_start, range_start + range_length)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicatedIdAllocationRequest {
    pub owner: MemberId,
    pub id_type: IdType,
    pub range_start: u64,
    pub range_length: u64,
}

impl ReplicatedIdAllocationRequest {
    pub fn new(owner: MemberId, id_type: IdType, range_start: u64, range_length: u64) -> Self {
        Self {
            owner,
            id_type,
            range_start,
            range_length,
        }
    }
}

/// A command carried by the replicated log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicatedContent {
    IdAllocation(ReplicatedIdAllocationRequest),
    /// Opaque store transaction, applied outside this crate.
    Transaction(Bytes),
    /// Appended by a new leader; carries no payload.
    NewLeaderBarrier,
}

impl ReplicatedContent {
    pub fn content_type(&self) -> ContentType {
        match self {
            ReplicatedContent::IdAllocation(_) => ContentType::IdAllocation,
            ReplicatedContent::Transaction(_) => ContentType::Transaction,
            ReplicatedContent::NewLeaderBarrier => ContentType::NewLeaderBarrier,
        }
    }

    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(self.content_type().id());
        match self {
            ReplicatedContent::IdAllocation(request) => {
                buf.put_slice(request.owner.uuid().as_bytes());
                buf.put_u8(request.id_type.id());
                buf.put_u64(request.range_start);
                buf.put_u64(request.range_length);
            }
            ReplicatedContent::Transaction(payload) => {
                let length = u32::try_from(payload.len()).unwrap_or_else(|_| {
                    panic!("transaction payload too large: {} bytes", payload.len());
                });
                buf.put_u32(length);
                buf.put_slice(payload);
            }
            ReplicatedContent::NewLeaderBarrier => {}
        }
        buf.freeze()
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let mut buf = data;
        let content_type = ContentType::from_id(decode_u8(&mut buf)?)?;
        let content = match content_type {
            ContentType::IdAllocation => {
                let owner = MemberId::new(Uuid::from_bytes(decode_array::<16>(&mut buf)?));
                let id_type = decode_id_type(&mut buf)?;
                let range_start = decode_u64(&mut buf)?;
                let range_length = decode_u64(&mut buf)?;
                ReplicatedContent::IdAllocation(ReplicatedIdAllocationRequest::new(
                    owner,
                    id_type,
                    range_start,
                    range_length,
                ))
            }
            ContentType::Transaction => {
                let length = decode_u32(&mut buf)? as usize;
                if buf.len() < length {
                    return Err(Error::Encoding(format!(
                        "transaction payload truncated: need {} bytes, have {}",
                        length,
                        buf.len()
                    )));
                }
                let (payload, rest) = buf.split_at(length);
                buf = rest;
                ReplicatedContent::Transaction(Bytes::copy_from_slice(payload))
            }
            ContentType::NewLeaderBarrier => ReplicatedContent::NewLeaderBarrier,
        };
        expect_exhausted(buf, "replicated content")?;
        Ok(content)
    }
}

fn decode_id_type(buf: &mut &[u8]) -> std::result::Result<IdType, DeserializeError> {
    let id = decode_u8(buf)?;
    IdType::from_id(id).map_err(|e| DeserializeError::new(e.to_string()))
}

/// Journal format of [`IdAllocationState`].
///
/// The ordinal of a state is its last applied command index, so recovery
/// resumes from whichever slot saw the most commands.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdAllocationStateMarshal;

impl StateMarshal<IdAllocationState> for IdAllocationStateMarshal {
    fn start_state(&self) -> IdAllocationState {
        IdAllocationState::new()
    }

    fn ordinal(&self, state: &IdAllocationState) -> i64 {
        state.last_applied_command_index()
    }

    fn marshal(&self, state: &IdAllocationState, buf: &mut BytesMut) {
        let entries: Vec<(IdType, u64)> = state.entries().collect();
        encode_array_count(entries.len(), buf);
        for (id_type, first_unallocated) in entries {
            buf.put_u8(id_type.id());
            buf.put_u64(first_unallocated);
        }
        buf.put_i64(state.last_applied_command_index());
    }

    fn unmarshal(
        &self,
        buf: &mut &[u8],
    ) -> std::result::Result<IdAllocationState, DeserializeError> {
        let count = decode_array_count(buf)?;
        let mut first_unallocated = BTreeMap::new();
        for _ in 0..count {
            let id_type = decode_id_type(buf)?;
            let value = decode_u64(buf)?;
            if first_unallocated.insert(id_type, value).is_some() {
                return Err(DeserializeError::new(format!(
                    "duplicate counter for {}",
                    id_type
                )));
            }
        }
        let last_applied = decode_i64(buf)?;
        Ok(IdAllocationState::from_parts(first_unallocated, last_applied))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn request() -> ReplicatedIdAllocationRequest {
        ReplicatedIdAllocationRequest::new(MemberId::random(), IdType::Relationship, 2048, 1024)
    }

    #[rstest]
    #[case(ReplicatedContent::IdAllocation(request()))]
    #[case(ReplicatedContent::Transaction(Bytes::from_static(b"tx-payload")))]
    #[case(ReplicatedContent::Transaction(Bytes::new()))]
    #[case(ReplicatedContent::NewLeaderBarrier)]
    fn should_serialize_and_deserialize_content(#[case] content: ReplicatedContent) {
        // when
        let bytes = content.serialize();
        let decoded = ReplicatedContent::deserialize(&bytes).unwrap();

        // then
        assert_eq!(bytes[0], content.content_type().id());
        assert_eq!(decoded, content);
    }

    #[test]
    fn should_encode_allocation_request_layout() {
        // given
        let owner = MemberId::new(Uuid::from_u128(0x0102_0304_0506_0708_090a_0b0c_0d0e_0f10));
        let content = ReplicatedContent::IdAllocation(ReplicatedIdAllocationRequest::new(
            owner,
            IdType::Node,
            5,
            7,
        ));

        // when
        let bytes = content.serialize();

        // then
        assert_eq!(bytes.len(), 1 + 16 + 1 + 8 + 8);
        assert_eq!(bytes[0], 0x01);
        assert_eq!(&bytes[1..17], owner.uuid().as_bytes());
        assert_eq!(bytes[17], IdType::Node.id());
        assert_eq!(&bytes[18..26], &5u64.to_be_bytes());
        assert_eq!(&bytes[26..34], &7u64.to_be_bytes());
    }

    #[test]
    fn should_reject_unknown_content_tag() {
        let result = ReplicatedContent::deserialize(&[0x7F]);

        assert!(matches!(result, Err(Error::Encoding(_))));
    }

    #[test]
    fn should_reject_truncated_allocation_request() {
        // given
        let bytes = ReplicatedContent::IdAllocation(request()).serialize();

        // when
        let result = ReplicatedContent::deserialize(&bytes[..bytes.len() - 1]);

        // then
        assert!(matches!(result, Err(Error::Encoding(_))));
    }

    #[test]
    fn should_marshal_state_with_every_id_type() {
        // given
        let mut state = IdAllocationState::new();
        for (i, id_type) in IdType::ALL.iter().enumerate() {
            state.advance(*id_type, 1024 * (i as u64 + 1), i as i64);
        }
        state.advance(IdType::Node, 1, 99);
        let marshal = IdAllocationStateMarshal;

        // when
        let mut buf = BytesMut::new();
        marshal.marshal(&state, &mut buf);
        let mut slice = buf.as_ref();
        let decoded = marshal.unmarshal(&mut slice).unwrap();

        // then
        assert!(slice.is_empty());
        assert_eq!(decoded, state);
        assert_eq!(marshal.ordinal(&decoded), 99);
    }

    #[test]
    fn should_fail_to_unmarshal_truncated_state() {
        // given
        let mut state = IdAllocationState::new();
        state.advance(IdType::Property, 64, 4);
        let mut buf = BytesMut::new();
        IdAllocationStateMarshal.marshal(&state, &mut buf);

        // when
        let mut slice = &buf[..buf.len() - 2];
        let result = IdAllocationStateMarshal.unmarshal(&mut slice);

        // then
        assert!(result.is_err());
    }

    #[test]
    fn should_use_last_applied_index_as_start_ordinal() {
        let marshal = IdAllocationStateMarshal;

        assert_eq!(marshal.ordinal(&marshal.start_state()), -1);
    }
}
