//! # Packet
//!
//! One protocol message: a 16-bit message-type id plus a body of
//! codec-encoded values, framed on the wire as
//! `[u32 length][u16 id][body]` where `length = 2 + body length`.
//!
//! A packet is a mutable, positionable buffer. Sequential reads advance
//! a cursor; write/remove/replace operations edit the body in place and
//! invalidate any cached serialized form. Raw buffers that violate the
//! framing invariant are marked corrupted and kept verbatim so they can
//! still be passed through or logged.
//!
//! Packets can also be built from a textual template, e.g.
//! `"{l}{u:4000}{s:token}{i:0}"`, where `{l}` requests an automatic
//! length prefix and each placeholder carries a type tag (`i` int,
//! `u` short, `s` string, `b` byte-or-bool). Control bytes 0–13 render
//! as `[<n>]` in diagnostic strings and unescape back losslessly.

use crate::core::codec;
use crate::error::{ProtocolError, Result};

/// Bytes occupied by the length prefix on the wire.
pub const LENGTH_PREFIX_SIZE: usize = 4;
/// Bytes occupied by the message-type id.
pub const ID_SIZE: usize = 2;
/// Smallest valid frame: length prefix plus id, empty body.
pub const MIN_FRAME_SIZE: usize = LENGTH_PREFIX_SIZE + ID_SIZE;

/// A typed field value used when constructing outgoing packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Int(i32),
    Short(u16),
    Bool(bool),
    Byte(u8),
    Str(String),
    Bytes(Vec<u8>),
}

impl Field {
    fn encode_into(&self, buffer: &mut Vec<u8>) {
        match self {
            Field::Int(v) => buffer.extend_from_slice(&codec::encode_i32(*v)),
            Field::Short(v) => buffer.extend_from_slice(&codec::encode_u16(*v)),
            Field::Bool(v) => buffer.extend_from_slice(&codec::encode_bool(*v)),
            Field::Byte(v) => buffer.push(*v),
            Field::Str(v) => buffer.extend_from_slice(&codec::encode_string(v)),
            Field::Bytes(v) => buffer.extend_from_slice(v),
        }
    }
}

impl From<i32> for Field {
    fn from(v: i32) -> Self {
        Field::Int(v)
    }
}
impl From<u16> for Field {
    fn from(v: u16) -> Self {
        Field::Short(v)
    }
}
impl From<bool> for Field {
    fn from(v: bool) -> Self {
        Field::Bool(v)
    }
}
impl From<&str> for Field {
    fn from(v: &str) -> Self {
        Field::Str(v.to_owned())
    }
}
impl From<String> for Field {
    fn from(v: String) -> Self {
        Field::Str(v)
    }
}
impl From<Vec<u8>> for Field {
    fn from(v: Vec<u8>) -> Self {
        Field::Bytes(v)
    }
}

/// One protocol message. See the module docs for the wire layout.
#[derive(Debug, Clone)]
pub struct Packet {
    id: u16,
    body: Vec<u8>,
    position: usize,
    corrupted: bool,
    /// Raw payload kept verbatim for corrupted frames.
    raw: Vec<u8>,
    bytes_cache: Option<Vec<u8>>,
    string_cache: Option<String>,
}

impl Packet {
    /// Builds an outgoing packet from an id and typed field values.
    pub fn new(id: u16, fields: &[Field]) -> Self {
        Self {
            id,
            body: encode_fields(fields),
            position: 0,
            corrupted: false,
            raw: Vec::new(),
            bytes_cache: None,
            string_cache: None,
        }
    }

    /// Parses a raw framed buffer. A buffer shorter than the minimum
    /// frame, or whose length prefix does not equal `total - 4`, yields
    /// a corrupted packet preserving the input bytes unchanged.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let corrupted = data.len() < MIN_FRAME_SIZE
            || codec::decode_i32(&data, 0)
                .map(|(declared, _)| declared as i64 != (data.len() - LENGTH_PREFIX_SIZE) as i64)
                .unwrap_or(true);

        if corrupted {
            return Self {
                id: 0,
                body: data.clone(),
                position: 0,
                corrupted: true,
                raw: data,
                bytes_cache: None,
                string_cache: None,
            };
        }

        let id = u16::from_be_bytes([data[4], data[5]]);
        Self {
            id,
            body: data[MIN_FRAME_SIZE..].to_vec(),
            position: 0,
            corrupted: false,
            raw: Vec::new(),
            bytes_cache: None,
            string_cache: None,
        }
    }

    /// Builds a packet from a textual template, substituting typed
    /// placeholders and honoring a leading `{l}` length marker.
    pub fn from_template(template: &str) -> Result<Self> {
        Ok(Self::from_bytes(template_to_bytes(template)?))
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    /// Replaces the message-type id. No-op on corrupted packets.
    pub fn set_id(&mut self, id: u16) {
        if !self.corrupted && self.id != id {
            self.id = id;
            self.reset_cache();
        }
    }

    pub fn is_corrupted(&self) -> bool {
        self.corrupted
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn set_position(&mut self, position: usize) {
        self.position = position;
    }

    /// Bytes remaining after the cursor.
    pub fn readable(&self) -> usize {
        self.body.len().saturating_sub(self.position)
    }

    pub fn readable_at(&self, position: usize) -> usize {
        self.body.len().saturating_sub(position)
    }

    /// Total length as reported on the wire: body plus the id field.
    /// Corrupted packets report their raw payload length.
    pub fn length(&self) -> usize {
        self.body.len() + if self.corrupted { 0 } else { ID_SIZE }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Whether a complete string field starts at the cursor.
    pub fn can_read_string(&self) -> bool {
        self.can_read_string_at(self.position)
    }

    pub fn can_read_string_at(&self, position: usize) -> bool {
        let readable = self.readable_at(position);
        if readable < codec::SHORT_SIZE {
            return false;
        }
        match codec::decode_u16(&self.body, position) {
            Ok((length, _)) => readable >= length as usize + codec::SHORT_SIZE,
            Err(_) => false,
        }
    }

    fn reset_cache(&mut self) {
        self.bytes_cache = None;
        self.string_cache = None;
    }

    /// Serializes the packet into its framed wire form. Corrupted
    /// packets return their preserved raw payload unchanged.
    pub fn to_bytes(&mut self) -> Vec<u8> {
        if self.corrupted {
            return self.raw.clone();
        }
        if self.bytes_cache.is_none() {
            self.bytes_cache = Some(construct(self.id, &self.body));
        }
        self.bytes_cache.clone().unwrap_or_default()
    }

    /// Diagnostic rendering with control bytes escaped; round-trip safe
    /// via [`unescape`].
    pub fn to_diagnostic_string(&mut self) -> String {
        if self.string_cache.is_none() {
            let bytes = self.to_bytes();
            self.string_cache = Some(escape(&bytes));
        }
        self.string_cache.clone().unwrap_or_default()
    }

    // ---- read ----

    pub fn read_i32(&mut self) -> Result<i32> {
        let (value, consumed) = codec::decode_i32(&self.body, self.position)?;
        self.position += consumed;
        Ok(value)
    }

    pub fn read_i32_at(&self, position: usize) -> Result<i32> {
        codec::decode_i32(&self.body, position).map(|(value, _)| value)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let (value, consumed) = codec::decode_u16(&self.body, self.position)?;
        self.position += consumed;
        Ok(value)
    }

    pub fn read_u16_at(&self, position: usize) -> Result<u16> {
        codec::decode_u16(&self.body, position).map(|(value, _)| value)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        let (value, consumed) = codec::decode_bool(&self.body, self.position)?;
        self.position += consumed;
        Ok(value)
    }

    pub fn read_string(&mut self) -> Result<String> {
        let (value, consumed) = codec::decode_string(&self.body, self.position)?;
        self.position += consumed;
        Ok(value)
    }

    pub fn read_string_at(&self, position: usize) -> Result<String> {
        codec::decode_string(&self.body, position).map(|(value, _)| value)
    }

    pub fn read_bytes(&mut self, length: usize) -> Result<Vec<u8>> {
        let (value, consumed) = codec::decode_bytes(&self.body, self.position, length)?;
        self.position += consumed;
        Ok(value)
    }

    // ---- write ----

    /// Appends a field at the end of the body.
    pub fn write(&mut self, field: Field) {
        let at = self.body.len();
        self.write_at(field, at);
    }

    /// Inserts a field's encoded bytes at an explicit offset.
    pub fn write_at(&mut self, field: Field, position: usize) {
        let mut encoded = Vec::new();
        field.encode_into(&mut encoded);
        self.body.splice(position..position, encoded);
        self.reset_cache();
    }

    // ---- remove ----

    pub fn remove_i32(&mut self, position: usize) -> Result<()> {
        self.remove_bytes(codec::INT_SIZE, position)
    }

    pub fn remove_u16(&mut self, position: usize) -> Result<()> {
        self.remove_bytes(codec::SHORT_SIZE, position)
    }

    pub fn remove_bool(&mut self, position: usize) -> Result<()> {
        self.remove_bytes(codec::BOOL_SIZE, position)
    }

    pub fn remove_string(&mut self, position: usize) -> Result<()> {
        let (length, _) = codec::decode_u16(&self.body, position)?;
        self.remove_bytes(codec::SHORT_SIZE + length as usize, position)
    }

    pub fn remove_bytes(&mut self, length: usize, position: usize) -> Result<()> {
        if position + length > self.body.len() {
            return Err(ProtocolError::OutOfBounds {
                offset: position,
                wanted: length,
                len: self.body.len(),
            });
        }
        self.body.drain(position..position + length);
        self.reset_cache();
        Ok(())
    }

    // ---- replace ----

    pub fn replace_i32(&mut self, value: i32, position: usize) -> Result<()> {
        self.remove_i32(position)?;
        self.write_at(Field::Int(value), position);
        Ok(())
    }

    pub fn replace_u16(&mut self, value: u16, position: usize) -> Result<()> {
        self.remove_u16(position)?;
        self.write_at(Field::Short(value), position);
        Ok(())
    }

    pub fn replace_bool(&mut self, value: bool, position: usize) -> Result<()> {
        self.remove_bool(position)?;
        self.write_at(Field::Bool(value), position);
        Ok(())
    }

    /// Replaces a string field in place. When the edit sits before the
    /// live cursor the cursor shifts by the signed length delta, keeping
    /// subsequent sequential reads aligned.
    pub fn replace_string(&mut self, value: &str, position: usize) -> Result<()> {
        let old_length = self.length();

        self.remove_string(position)?;
        self.write_at(Field::Str(value.to_owned()), position);

        if position < self.position {
            let delta = self.length() as isize - old_length as isize;
            self.position = (self.position as isize + delta) as usize;
        }
        Ok(())
    }
}

fn encode_fields(fields: &[Field]) -> Vec<u8> {
    let mut buffer = Vec::new();
    for field in fields {
        field.encode_into(&mut buffer);
    }
    buffer
}

/// Assembles the framed wire form for an id and body.
pub fn construct(id: u16, body: &[u8]) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(MIN_FRAME_SIZE + body.len());
    buffer.extend_from_slice(&codec::encode_i32((ID_SIZE + body.len()) as i32));
    buffer.extend_from_slice(&codec::encode_u16(id));
    buffer.extend_from_slice(body);
    buffer
}

/// Escapes control bytes 0–13 as `[<n>]` for diagnostic rendering.
/// All other bytes pass through as latin-1 characters.
pub fn escape(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len());
    for &byte in data {
        if byte <= 13 {
            out.push('[');
            out.push_str(&byte.to_string());
            out.push(']');
        } else {
            out.push(byte as char);
        }
    }
    out
}

/// Reverses [`escape`], restoring `[<n>]` sequences to raw bytes.
pub fn unescape(text: &str) -> Vec<u8> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = Vec::with_capacity(chars.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '[' {
            if let Some(close) = find_close(&chars, i) {
                let digits: String = chars[i + 1..close].iter().collect();
                if let Ok(value) = digits.parse::<u8>() {
                    if value <= 13 {
                        out.push(value);
                        i = close + 1;
                        continue;
                    }
                }
            }
        }
        out.push(chars[i] as u8);
        i += 1;
    }
    out
}

fn find_close(chars: &[char], open: usize) -> Option<usize> {
    // At most two digits between the brackets.
    for end in open + 2..=(open + 3).min(chars.len().saturating_sub(1)) {
        if chars.get(end) == Some(&']') {
            return Some(end);
        }
        if !chars.get(end).map(|c| c.is_ascii_digit()).unwrap_or(false) {
            return None;
        }
    }
    None
}

/// Length of the `{l}` marker in template input.
const LENGTH_MARKER: &[u8] = b"{l}";

/// Expands a packet template into raw frame bytes.
///
/// Escaped control bytes are restored first, then each `{t:value}`
/// placeholder is substituted with its encoded form. A leading `{l}`
/// prepends a 4-byte big-endian length covering everything after the
/// marker.
pub fn template_to_bytes(template: &str) -> Result<Vec<u8>> {
    let mut data = unescape(template);
    data = substitute_placeholders(&data)?;

    if data.starts_with(LENGTH_MARKER) && data.len() >= LENGTH_MARKER.len() + 2 {
        let remainder = &data[LENGTH_MARKER.len()..];
        let mut framed = Vec::with_capacity(LENGTH_PREFIX_SIZE + remainder.len());
        framed.extend_from_slice(&codec::encode_i32(remainder.len() as i32));
        framed.extend_from_slice(remainder);
        return Ok(framed);
    }

    Ok(data)
}

fn substitute_placeholders(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;

    while i < data.len() {
        match parse_placeholder(data, i)? {
            Some((encoded, next)) => {
                out.extend_from_slice(&encoded);
                i = next;
            }
            None => {
                out.push(data[i]);
                i += 1;
            }
        }
    }
    Ok(out)
}

/// Recognizes `{t:value}` at `start` where `t` is one of `i u s b`.
/// Returns the encoded substitution and the index just past `}`.
fn parse_placeholder(data: &[u8], start: usize) -> Result<Option<(Vec<u8>, usize)>> {
    if data.get(start) != Some(&b'{') || start + 2 >= data.len() {
        return Ok(None);
    }
    let tag = data[start + 1].to_ascii_lowercase();
    if !matches!(tag, b'i' | b'u' | b's' | b'b') || data[start + 2] != b':' {
        return Ok(None);
    }

    let value_start = start + 3;
    let close = match data[value_start..].iter().position(|&b| b == b'}') {
        Some(offset) => value_start + offset,
        None => return Ok(None),
    };
    let value = &data[value_start..close];
    let text = String::from_utf8_lossy(value);

    let encoded = match tag {
        b'i' => codec::encode_i32(text.trim().parse().unwrap_or(0)).to_vec(),
        b'u' => codec::encode_u16(text.trim().parse().unwrap_or(0)).to_vec(),
        b's' => codec::encode_string(&text),
        b'b' => match text.trim().parse::<u8>() {
            Ok(byte) => vec![byte],
            Err(_) => codec::encode_bool(text.trim().eq_ignore_ascii_case("true")).to_vec(),
        },
        _ => unreachable!(),
    };

    Ok(Some((encoded, close + 1)))
}
