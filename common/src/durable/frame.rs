//! Entry framing (magic + length + crc32c).
//!
//! ```text
//! | magic (u32 BE) | length (u32 BE) | crc32c (u32 BE) | payload (length bytes) |
//! ```
//!
//! The reader distinguishes three ways a scan can stop:
//!
//! - a clean end of stream on an entry boundary,
//! - a torn tail: a short header or body, unframed trailing garbage, or a
//!   checksum failure on the very last entry of the file,
//! - corruption: a checksum or decode failure on an entry that is followed by
//!   more data, which can only be explained by damage to already-synced bytes.

use bytes::{BufMut, BytesMut};
use crc32c::crc32c;

use super::{DurableError, DurableResult, StateMarshal};
use crate::serde::encoding::expect_exhausted;

const ENTRY_MAGIC: u32 = 0x4944_4131; // "IDA1"
const ENTRY_HEADER_LEN: usize = 12;

/// Appends one framed entry holding `state` to `buf`.
pub fn encode_entry<S, M: StateMarshal<S> + ?Sized>(marshal: &M, state: &S, buf: &mut BytesMut) {
    let mut payload = BytesMut::new();
    marshal.marshal(state, &mut payload);
    let length = u32::try_from(payload.len()).unwrap_or_else(|_| {
        panic!("journal entry too large: {} bytes", payload.len());
    });

    buf.reserve(ENTRY_HEADER_LEN + payload.len());
    buf.put_u32(ENTRY_MAGIC);
    buf.put_u32(length);
    buf.put_u32(crc32c(&payload));
    buf.extend_from_slice(&payload);
}

/// Result of reading one entry.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome<S> {
    Entry(S),
    /// The journal ended exactly on an entry boundary.
    EndOfStream,
    /// The remaining bytes are an incomplete or garbled final write.
    TornTail { offset: usize, reason: String },
}

/// Sequential reader over the bytes of one journal file.
pub struct EntryReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> EntryReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Byte offset just past the last entry returned.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn read_next<S, M: StateMarshal<S> + ?Sized>(
        &mut self,
        marshal: &M,
    ) -> DurableResult<ReadOutcome<S>> {
        let rest = &self.data[self.offset..];
        if rest.is_empty() {
            return Ok(ReadOutcome::EndOfStream);
        }
        if rest.len() < ENTRY_HEADER_LEN {
            return Ok(self.torn("short entry header"));
        }

        let magic = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]);
        if magic != ENTRY_MAGIC {
            // Garbage followed by a well-framed entry means an earlier entry
            // was overwritten, not that the last write was cut short.
            let magic_bytes = ENTRY_MAGIC.to_be_bytes();
            if rest[1..].windows(4).any(|w| w == magic_bytes) {
                return Err(DurableError::Corrupt(format!(
                    "bad entry magic 0x{:08x} at offset {} followed by further entries",
                    magic, self.offset
                )));
            }
            return Ok(self.torn("unframed trailing bytes"));
        }

        let length = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        let expected_crc = u32::from_be_bytes([rest[8], rest[9], rest[10], rest[11]]);
        let end = ENTRY_HEADER_LEN + length;
        if rest.len() < end {
            return Ok(self.torn("short entry body"));
        }

        let payload = &rest[ENTRY_HEADER_LEN..end];
        let actual_crc = crc32c(payload);
        if actual_crc != expected_crc {
            if rest.len() == end {
                return Ok(self.torn("checksum mismatch in final entry"));
            }
            return Err(DurableError::Corrupt(format!(
                "checksum mismatch at offset {}: expected 0x{:08x}, got 0x{:08x}",
                self.offset, expected_crc, actual_crc
            )));
        }

        let mut slice = payload;
        let state = marshal
            .unmarshal(&mut slice)
            .and_then(|state| expect_exhausted(slice, "journal entry").map(|_| state))
            .map_err(|e| {
                DurableError::Corrupt(format!("undecodable entry at offset {}: {}", self.offset, e))
            })?;

        self.offset += end;
        Ok(ReadOutcome::Entry(state))
    }

    fn torn<S>(&self, reason: &str) -> ReadOutcome<S> {
        ReadOutcome::TornTail {
            offset: self.offset,
            reason: reason.to_string(),
        }
    }
}
