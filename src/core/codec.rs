//! # Byte Codec
//!
//! Big-endian encode/decode primitives for the wire format.
//!
//! Every field on the wire is big-endian: 32-bit signed integers occupy
//! 4 bytes, booleans 1 byte (0/1), 16-bit unsigned integers 2 bytes, and
//! strings a 2-byte byte-length prefix followed by UTF-8 bytes. The
//! length prefix counts *bytes*, not characters.
//!
//! Decoders take a buffer and an offset and return the value together
//! with the number of bytes consumed; reads past the end of the buffer
//! are [`ProtocolError::OutOfBounds`], never a panic.

use crate::error::{ProtocolError, Result};

/// Encoded size of a 32-bit integer.
pub const INT_SIZE: usize = 4;
/// Encoded size of a 16-bit unsigned integer.
pub const SHORT_SIZE: usize = 2;
/// Encoded size of a boolean.
pub const BOOL_SIZE: usize = 1;

/// Encoded size of a string: 2-byte length prefix plus its UTF-8 bytes.
pub fn string_size(value: &str) -> usize {
    SHORT_SIZE + value.len()
}

pub fn encode_i32(value: i32) -> [u8; 4] {
    value.to_be_bytes()
}

pub fn encode_u16(value: u16) -> [u8; 2] {
    value.to_be_bytes()
}

pub fn encode_bool(value: bool) -> [u8; 1] {
    [u8::from(value)]
}

pub fn encode_string(value: &str) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(string_size(value));
    buffer.extend_from_slice(&encode_u16(value.len() as u16));
    buffer.extend_from_slice(value.as_bytes());
    buffer
}

fn check_bounds(data: &[u8], offset: usize, wanted: usize) -> Result<()> {
    if offset + wanted > data.len() {
        return Err(ProtocolError::OutOfBounds {
            offset,
            wanted,
            len: data.len(),
        });
    }
    Ok(())
}

pub fn decode_i32(data: &[u8], offset: usize) -> Result<(i32, usize)> {
    check_bounds(data, offset, INT_SIZE)?;
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&data[offset..offset + INT_SIZE]);
    Ok((i32::from_be_bytes(raw), INT_SIZE))
}

pub fn decode_u16(data: &[u8], offset: usize) -> Result<(u16, usize)> {
    check_bounds(data, offset, SHORT_SIZE)?;
    let mut raw = [0u8; 2];
    raw.copy_from_slice(&data[offset..offset + SHORT_SIZE]);
    Ok((u16::from_be_bytes(raw), SHORT_SIZE))
}

pub fn decode_bool(data: &[u8], offset: usize) -> Result<(bool, usize)> {
    check_bounds(data, offset, BOOL_SIZE)?;
    Ok((data[offset] == 1, BOOL_SIZE))
}

/// Decodes a length-prefixed UTF-8 string, consuming `2 + byteLength` bytes.
pub fn decode_string(data: &[u8], offset: usize) -> Result<(String, usize)> {
    let (length, _) = decode_u16(data, offset)?;
    let length = length as usize;
    check_bounds(data, offset + SHORT_SIZE, length)?;

    let raw = &data[offset + SHORT_SIZE..offset + SHORT_SIZE + length];
    let value = std::str::from_utf8(raw)
        .map_err(|e| ProtocolError::DecodeError(format!("invalid UTF-8 in string field: {e}")))?
        .to_owned();

    Ok((value, SHORT_SIZE + length))
}

/// Copies `length` raw bytes with no prefix.
pub fn decode_bytes(data: &[u8], offset: usize, length: usize) -> Result<(Vec<u8>, usize)> {
    check_bounds(data, offset, length)?;
    Ok((data[offset..offset + length].to_vec(), length))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_roundtrip() {
        for value in [0, 1, -1, i32::MAX, i32::MIN, 1505] {
            let encoded = encode_i32(value);
            let (decoded, consumed) = decode_i32(&encoded, 0).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(consumed, 4);
        }
    }

    #[test]
    fn int_is_big_endian() {
        assert_eq!(encode_i32(1), [0, 0, 0, 1]);
        assert_eq!(encode_u16(0x0102), [1, 2]);
    }

    #[test]
    fn short_roundtrip() {
        for value in [0u16, 1, 257, u16::MAX] {
            let encoded = encode_u16(value);
            let (decoded, consumed) = decode_u16(&encoded, 0).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(consumed, 2);
        }
    }

    #[test]
    fn bool_roundtrip() {
        assert_eq!(decode_bool(&encode_bool(true), 0).unwrap(), (true, 1));
        assert_eq!(decode_bool(&encode_bool(false), 0).unwrap(), (false, 1));
        // Anything other than 1 decodes as false.
        assert_eq!(decode_bool(&[7], 0).unwrap(), (false, 1));
    }

    #[test]
    fn string_roundtrip_consumes_prefix_plus_bytes() {
        let value = "héllo wörld";
        let encoded = encode_string(value);
        let (decoded, consumed) = decode_string(&encoded, 0).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(consumed, 2 + value.len());
    }

    #[test]
    fn string_length_is_byte_count_not_chars() {
        let value = "ü"; // 1 char, 2 bytes
        let encoded = encode_string(value);
        assert_eq!(encoded[..2], [0, 2]);
        assert_eq!(encoded.len(), 4);
    }

    #[test]
    fn maximum_length_string_roundtrip() {
        let value = "x".repeat(u16::MAX as usize);
        let encoded = encode_string(&value);
        assert_eq!(encoded.len(), 2 + u16::MAX as usize);
        let (decoded, consumed) = decode_string(&encoded, 0).unwrap();
        assert_eq!(decoded.len(), u16::MAX as usize);
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded, value);
    }

    #[test]
    fn empty_string_roundtrip() {
        let encoded = encode_string("");
        assert_eq!(encoded, vec![0, 0]);
        assert_eq!(decode_string(&encoded, 0).unwrap(), (String::new(), 2));
    }

    #[test]
    fn reads_past_end_are_bounds_errors() {
        let data = [0u8, 1, 2];
        assert!(matches!(
            decode_i32(&data, 0),
            Err(ProtocolError::OutOfBounds { .. })
        ));
        assert!(matches!(
            decode_u16(&data, 2),
            Err(ProtocolError::OutOfBounds { .. })
        ));
        // Declared string length exceeds the remaining buffer.
        let truncated = [0u8, 5, b'a', b'b'];
        assert!(matches!(
            decode_string(&truncated, 0),
            Err(ProtocolError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn decode_at_offset() {
        let mut data = vec![0xFF, 0xFF];
        data.extend_from_slice(&encode_i32(42));
        let (value, consumed) = decode_i32(&data, 2).unwrap();
        assert_eq!((value, consumed), (42, 4));
    }
}
