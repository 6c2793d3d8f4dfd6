//! Field-tree codec for the charger's tag-prefixed binary payloads.
//!
//! Payload format (a constrained protobuf encoding):
//! ```text
//! field := tag value
//! tag   := varint(field_number << 3 | wire_type)
//! value := varint                    wire type 0
//!        | 8 bytes little-endian     wire type 1
//!        | varint(len) bytes[len]    wire type 2
//!        | 4 bytes little-endian     wire type 5
//! ```
//! Frames on the TCP stream are `[payload_len:4][payload:N]`, length big-endian.
//!
//! Decoding keeps every field, known or not, in wire order, so a decoded tree
//! re-encodes to the same bytes.

use std::borrow::Cow;

use thiserror::Error;

/// Size of the big-endian length prefix in front of every TCP frame.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Largest payload a frame may declare. Anything bigger is treated as garbage.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// A u64 never needs more than ten 7-bit groups.
pub const MAX_VARINT_LEN: usize = 10;

/// Highest field number the tag layout can carry.
pub const MAX_FIELD_NUMBER: u32 = (1 << 29) - 1;

const MAX_NESTING_DEPTH: usize = 32;

/// Errors raised while encoding, decoding or interpreting charger messages.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The bytes do not form a valid field tree or frame.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// A setting value is outside the range the charger can safely accept.
    #[error("invalid {name}: {value} is outside {min}..={max}")]
    InvalidParameter {
        name: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    /// The response decoded fine but the telemetry it should carry is absent.
    #[error("incomplete telemetry: {0}")]
    IncompleteTelemetry(String),

    /// A connection-state code outside the documented 0–6 range.
    #[error("unknown connection state code: {0}")]
    UnknownState(u64),
}

fn malformed(msg: impl Into<String>) -> ProtocolError {
    ProtocolError::MalformedMessage(msg.into())
}

// ── Field tree ────────────────────────────────────────────────────────────────

/// Encoding discriminator carried in the low three bits of every tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WireType {
    Varint = 0,
    Fixed64 = 1,
    LengthDelimited = 2,
    Fixed32 = 5,
}

impl TryFrom<u8> for WireType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::Fixed64),
            2 => Ok(WireType::LengthDelimited),
            5 => Ok(WireType::Fixed32),
            _ => Err(()),
        }
    }
}

/// The value half of a decoded field.
///
/// `Bytes` and `Message` share wire type 2: a length-delimited value becomes a
/// `Message` when its contents are themselves a complete field tree that
/// re-encodes byte-for-byte, and stays opaque `Bytes` otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Varint(u64),
    /// Raw little-endian bits; see [`FieldNode::as_f64`] for the float view.
    Fixed64(u64),
    /// Raw little-endian bits; the charger sends its measurements as `f32`.
    Fixed32(u32),
    Bytes(Vec<u8>),
    Message(Vec<FieldNode>),
}

impl FieldValue {
    pub fn wire_type(&self) -> WireType {
        match self {
            FieldValue::Varint(_) => WireType::Varint,
            FieldValue::Fixed64(_) => WireType::Fixed64,
            FieldValue::Fixed32(_) => WireType::Fixed32,
            FieldValue::Bytes(_) | FieldValue::Message(_) => WireType::LengthDelimited,
        }
    }
}

/// One decoded wire element: a field number plus its typed value.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldNode {
    pub field_number: u32,
    pub value: FieldValue,
}

impl FieldNode {
    pub fn new(field_number: u32, value: FieldValue) -> Self {
        Self {
            field_number,
            value,
        }
    }

    pub fn varint(field_number: u32, value: u64) -> Self {
        Self::new(field_number, FieldValue::Varint(value))
    }

    pub fn float(field_number: u32, value: f32) -> Self {
        Self::new(field_number, FieldValue::Fixed32(value.to_bits()))
    }

    pub fn double(field_number: u32, value: f64) -> Self {
        Self::new(field_number, FieldValue::Fixed64(value.to_bits()))
    }

    pub fn bytes(field_number: u32, value: impl Into<Vec<u8>>) -> Self {
        Self::new(field_number, FieldValue::Bytes(value.into()))
    }

    pub fn string(field_number: u32, value: &str) -> Self {
        Self::bytes(field_number, value.as_bytes())
    }

    pub fn message(field_number: u32, fields: Vec<FieldNode>) -> Self {
        Self::new(field_number, FieldValue::Message(fields))
    }

    pub fn wire_type(&self) -> WireType {
        self.value.wire_type()
    }

    /// The integer value of a varint field.
    pub fn as_u64(&self) -> Option<u64> {
        match self.value {
            FieldValue::Varint(v) => Some(v),
            _ => None,
        }
    }

    /// Numeric view over any scalar wire type.
    ///
    /// Fixed32 is read as `f32` and Fixed64 as `f64`; varints are widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self.value {
            FieldValue::Varint(v) => Some(v as f64),
            FieldValue::Fixed32(bits) => Some(f64::from(f32::from_bits(bits))),
            FieldValue::Fixed64(bits) => Some(f64::from_bits(bits)),
            FieldValue::Bytes(_) | FieldValue::Message(_) => None,
        }
    }

    /// Raw contents of a length-delimited field.
    pub fn as_bytes(&self) -> Option<Cow<'_, [u8]>> {
        match &self.value {
            FieldValue::Bytes(b) => Some(Cow::Borrowed(b.as_slice())),
            FieldValue::Message(fields) => Some(Cow::Owned(encode_message(fields))),
            _ => None,
        }
    }

    /// Contents of a length-delimited field as UTF-8 text.
    ///
    /// Works for both `Bytes` and `Message` values: short ASCII strings can
    /// happen to parse as a field tree, and re-encoding recovers the exact
    /// original bytes.
    pub fn as_string(&self) -> Option<String> {
        self.as_bytes()
            .and_then(|b| std::str::from_utf8(&b).ok().map(str::to_owned))
    }

    /// Children of a sub-message field.
    pub fn as_message(&self) -> Option<&[FieldNode]> {
        match &self.value {
            FieldValue::Message(fields) => Some(fields),
            _ => None,
        }
    }
}

/// Returns the first field with `field_number`, if any.
pub fn find_field(fields: &[FieldNode], field_number: u32) -> Option<&FieldNode> {
    fields.iter().find(|f| f.field_number == field_number)
}

// ── Varints and tags ──────────────────────────────────────────────────────────

/// Encodes `value` as a little-endian base-128 varint.
///
/// # Examples
///
/// ```rust
/// use duosida_core::protocol::codec::{decode_varint, encode_varint};
///
/// let bytes = encode_varint(300);
/// assert_eq!(bytes, vec![0xAC, 0x02]);
/// assert_eq!(decode_varint(&bytes, 0).unwrap(), (300, 2));
/// ```
pub fn encode_varint(value: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MAX_VARINT_LEN);
    write_varint(&mut buf, value);
    buf
}

/// Decodes one varint starting at `offset`.
///
/// Returns the value and the offset of the first byte after it.
///
/// # Errors
///
/// [`ProtocolError::MalformedMessage`] if the buffer ends before the
/// continuation bit clears, or the varint runs past ten bytes / 64 bits.
pub fn decode_varint(buf: &[u8], offset: usize) -> Result<(u64, usize), ProtocolError> {
    let mut value: u64 = 0;
    for i in 0..MAX_VARINT_LEN {
        let pos = offset + i;
        let byte = *buf
            .get(pos)
            .ok_or_else(|| malformed(format!("truncated varint at offset {offset}")))?;
        if i == MAX_VARINT_LEN - 1 && byte > 0x01 {
            return Err(malformed(format!(
                "varint at offset {offset} overflows 64 bits"
            )));
        }
        value |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, pos + 1));
        }
    }
    // Unreachable in practice: the tenth byte either terminates or fails above.
    Err(malformed(format!(
        "varint at offset {offset} exceeds {MAX_VARINT_LEN} bytes"
    )))
}

/// Packs `field_number << 3 | wire_type` as a varint.
pub fn encode_tag(field_number: u32, wire_type: WireType) -> Vec<u8> {
    encode_varint(tag_key(field_number, wire_type))
}

fn tag_key(field_number: u32, wire_type: WireType) -> u64 {
    (u64::from(field_number) << 3) | wire_type as u64
}

fn decode_tag(buf: &[u8], offset: usize) -> Result<(u32, WireType, usize), ProtocolError> {
    let (key, next) = decode_varint(buf, offset)?;
    let raw_wire_type = (key & 0x07) as u8;
    let wire_type = WireType::try_from(raw_wire_type).map_err(|_| {
        malformed(format!(
            "unsupported wire type {raw_wire_type} at offset {offset}"
        ))
    })?;
    let field_number = key >> 3;
    if field_number == 0 || field_number > u64::from(MAX_FIELD_NUMBER) {
        return Err(malformed(format!(
            "invalid field number {field_number} at offset {offset}"
        )));
    }
    Ok((field_number as u32, wire_type, next))
}

// ── Messages ──────────────────────────────────────────────────────────────────

/// Encodes a field tree in the given order.
///
/// Field order is preserved exactly; the charger is sensitive to it for some
/// write commands.
///
/// # Examples
///
/// ```rust
/// use duosida_core::protocol::codec::{decode_message, encode_message, FieldNode};
///
/// let fields = vec![
///     FieldNode::varint(1, 150),
///     FieldNode::message(16, vec![FieldNode::string(2, "DataVendorStatusReq")]),
/// ];
/// let bytes = encode_message(&fields);
/// assert_eq!(decode_message(&bytes).unwrap(), fields);
/// ```
pub fn encode_message(fields: &[FieldNode]) -> Vec<u8> {
    let mut buf = Vec::new();
    for field in fields {
        write_field(&mut buf, field);
    }
    buf
}

/// Decodes a whole payload into a field tree.
///
/// # Errors
///
/// [`ProtocolError::MalformedMessage`] for a truncated tag or value, an
/// unsupported wire type, a zero field number, or a length that overruns the
/// buffer. There is no partial result.
pub fn decode_message(buf: &[u8]) -> Result<Vec<FieldNode>, ProtocolError> {
    decode_fields(buf, 0)
}

fn decode_fields(buf: &[u8], depth: usize) -> Result<Vec<FieldNode>, ProtocolError> {
    let mut fields = Vec::new();
    let mut offset = 0;
    while offset < buf.len() {
        let (field_number, wire_type, next) = decode_tag(buf, offset)?;
        let (value, next) = decode_value(buf, next, wire_type, depth)?;
        fields.push(FieldNode {
            field_number,
            value,
        });
        offset = next;
    }
    Ok(fields)
}

fn decode_value(
    buf: &[u8],
    offset: usize,
    wire_type: WireType,
    depth: usize,
) -> Result<(FieldValue, usize), ProtocolError> {
    match wire_type {
        WireType::Varint => {
            let (v, next) = decode_varint(buf, offset)?;
            Ok((FieldValue::Varint(v), next))
        }
        WireType::Fixed64 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(take(buf, offset, 8)?);
            Ok((FieldValue::Fixed64(u64::from_le_bytes(raw)), offset + 8))
        }
        WireType::Fixed32 => {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(take(buf, offset, 4)?);
            Ok((FieldValue::Fixed32(u32::from_le_bytes(raw)), offset + 4))
        }
        WireType::LengthDelimited => {
            let (len, start) = decode_varint(buf, offset)?;
            let len = usize::try_from(len)
                .map_err(|_| malformed(format!("length {len} at offset {offset} too large")))?;
            let payload = take(buf, start, len)?;
            Ok((classify_length_delimited(payload, depth), start + len))
        }
    }
}

/// Decides whether a length-delimited payload is a sub-message or opaque bytes.
fn classify_length_delimited(payload: &[u8], depth: usize) -> FieldValue {
    if !payload.is_empty() && depth < MAX_NESTING_DEPTH {
        if let Ok(children) = decode_fields(payload, depth + 1) {
            if encode_message(&children) == payload {
                return FieldValue::Message(children);
            }
        }
    }
    FieldValue::Bytes(payload.to_vec())
}

fn take(buf: &[u8], offset: usize, len: usize) -> Result<&[u8], ProtocolError> {
    offset
        .checked_add(len)
        .filter(|&end| end <= buf.len())
        .map(|end| &buf[offset..end])
        .ok_or_else(|| {
            malformed(format!(
                "need {len} bytes at offset {offset}, only {} available",
                buf.len().saturating_sub(offset)
            ))
        })
}

fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    while value > 0x7F {
        buf.push((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

fn write_field(buf: &mut Vec<u8>, field: &FieldNode) {
    write_varint(buf, tag_key(field.field_number, field.wire_type()));
    match &field.value {
        FieldValue::Varint(v) => write_varint(buf, *v),
        FieldValue::Fixed64(bits) => buf.extend_from_slice(&bits.to_le_bytes()),
        FieldValue::Fixed32(bits) => buf.extend_from_slice(&bits.to_le_bytes()),
        FieldValue::Bytes(b) => {
            write_varint(buf, b.len() as u64);
            buf.extend_from_slice(b);
        }
        FieldValue::Message(children) => {
            let nested = encode_message(children);
            write_varint(buf, nested.len() as u64);
            buf.extend_from_slice(&nested);
        }
    }
}

// ── Framing ───────────────────────────────────────────────────────────────────

/// Prefixes `payload` with its big-endian `u32` length.
///
/// # Errors
///
/// [`ProtocolError::MalformedMessage`] if the payload exceeds [`MAX_FRAME_LEN`].
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(malformed(format!(
            "frame payload of {} bytes exceeds {MAX_FRAME_LEN}",
            payload.len()
        )));
    }
    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Reads the payload length declared by a frame header.
///
/// # Errors
///
/// [`ProtocolError::MalformedMessage`] if the declared length exceeds
/// [`MAX_FRAME_LEN`].
pub fn decode_frame_header(header: [u8; FRAME_HEADER_SIZE]) -> Result<usize, ProtocolError> {
    let declared = u32::from_be_bytes(header) as usize;
    if declared > MAX_FRAME_LEN {
        return Err(malformed(format!(
            "frame declares {declared} bytes, limit is {MAX_FRAME_LEN}"
        )));
    }
    Ok(declared)
}

/// Total size (header + payload) of the frame at the start of `buf`, once all
/// of it has arrived.
///
/// Returns `Ok(None)` while more bytes are needed.
pub fn complete_frame_len(buf: &[u8]) -> Result<Option<usize>, ProtocolError> {
    if buf.len() < FRAME_HEADER_SIZE {
        return Ok(None);
    }
    let header = [buf[0], buf[1], buf[2], buf[3]];
    let total = FRAME_HEADER_SIZE + decode_frame_header(header)?;
    Ok((buf.len() >= total).then_some(total))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
