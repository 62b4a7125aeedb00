//! Bounded big-endian codec helpers.
//!
//! Every decoder takes `&mut &[u8]`, checks that enough bytes remain, and
//! advances the slice past what it consumed. A short buffer is reported as a
//! [`DeserializeError`] rather than a panic so that callers reading from a
//! journal can tell a torn record apart from a logic error.
//!
//! All multi-byte integers are big-endian, matching the fixed-width layouts
//! used for persisted blocks.

use bytes::{BufMut, BytesMut};

use super::DeserializeError;

fn take<'a>(buf: &mut &'a [u8], len: usize, what: &str) -> Result<&'a [u8], DeserializeError> {
    if buf.len() < len {
        return Err(DeserializeError {
            message: format!(
                "buffer too short for {}: need {} bytes, have {}",
                what,
                len,
                buf.len()
            ),
        });
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

/// Decode a single byte.
pub fn decode_u8(buf: &mut &[u8]) -> Result<u8, DeserializeError> {
    Ok(take(buf, 1, "u8")?[0])
}

/// Decode a big-endian `u32`.
pub fn decode_u32(buf: &mut &[u8]) -> Result<u32, DeserializeError> {
    let bytes = take(buf, 4, "u32")?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Decode a big-endian `u64`.
pub fn decode_u64(buf: &mut &[u8]) -> Result<u64, DeserializeError> {
    let bytes = take(buf, 8, "u64")?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Ok(u64::from_be_bytes(raw))
}

/// Decode a big-endian `i64`.
pub fn decode_i64(buf: &mut &[u8]) -> Result<i64, DeserializeError> {
    let bytes = take(buf, 8, "i64")?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Ok(i64::from_be_bytes(raw))
}

/// Decode a fixed-length byte array.
pub fn decode_array<const N: usize>(buf: &mut &[u8]) -> Result<[u8; N], DeserializeError> {
    let bytes = take(buf, N, "fixed array")?;
    let mut raw = [0u8; N];
    raw.copy_from_slice(bytes);
    Ok(raw)
}

/// Encode the count prefix of an array.
///
/// Format: `count: u16` (big-endian). Panics if the count exceeds `u16::MAX`.
pub fn encode_array_count(count: usize, buf: &mut BytesMut) {
    if count > u16::MAX as usize {
        panic!("Array too long: {} items", count);
    }
    buf.put_u16(count as u16);
}

/// Decode the count prefix of an array.
///
/// Returns the count as a usize and advances the buffer past the count bytes.
pub fn decode_array_count(buf: &mut &[u8]) -> Result<usize, DeserializeError> {
    let bytes = take(buf, 2, "array count")?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]) as usize)
}

/// Fail if any bytes remain after a complete decode.
pub fn expect_exhausted(buf: &[u8], what: &str) -> Result<(), DeserializeError> {
    if !buf.is_empty() {
        return Err(DeserializeError {
            message: format!("{} trailing bytes after {}", buf.len(), what),
        });
    }
    Ok(())
}
