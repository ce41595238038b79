//! Binary framing for [`Message`] values.
//!
//! A frame is a 4-byte big-endian body length followed by the body. The body
//! starts with the [`FRAME_MARKER`] byte and then lists each field as a
//! 2-byte big-endian name length, the UTF-8 name, a 4-byte big-endian value
//! length, and the value bytes. Lengths are always treated as unsigned.

mod accumulator;

use thiserror::Error;
use tracing::trace;

use crate::message::{Field, Message};

pub(crate) use accumulator::{FrameAccumulator, FrameEvent};

/// Tracing target for codec events.
pub(crate) const CODEC_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::codec");

/// First byte of every frame body.
pub const FRAME_MARKER: u8 = 0x01;

/// Width of the body length prefix.
pub const LENGTH_PREFIX_LEN: usize = 4;

const NAME_LENGTH_LEN: usize = 2;
const VALUE_LENGTH_LEN: usize = 4;

/// Errors raised while encoding or decoding frames.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// A field name does not fit the 2-byte length slot.
    #[error("field name of {length} bytes exceeds the 65535 byte limit")]
    NameTooLong {
        /// Name length in bytes.
        length: usize,
    },
    /// A field value does not fit the 4-byte length slot.
    #[error("value of field '{name}' is {length} bytes, above the 4 GiB limit")]
    ValueTooLong {
        /// Field name.
        name: String,
        /// Value length in bytes.
        length: usize,
    },
    /// The encoded body does not fit the 4-byte length prefix.
    #[error("frame body of {length} bytes exceeds the 4 GiB limit")]
    FrameTooLarge {
        /// Body length in bytes.
        length: usize,
    },
    /// The body did not start with [`FRAME_MARKER`].
    #[error("frame marker 0x{found:02x} is not 0x01")]
    BadMarker {
        /// Byte found in the marker position.
        found: u8,
    },
    /// The frame was empty.
    #[error("frame body is empty")]
    EmptyBody,
    /// The frame ended in the middle of a field.
    #[error("frame truncated while reading {context}: needed {needed} bytes, {available} left")]
    Truncated {
        /// What was being read.
        context: &'static str,
        /// Bytes required.
        needed: usize,
        /// Bytes remaining.
        available: usize,
    },
    /// The length prefix disagrees with the bytes supplied.
    #[error("length prefix announces {declared} bytes but the body holds {actual}")]
    LengthMismatch {
        /// Length announced by the prefix.
        declared: usize,
        /// Bytes actually present after the prefix.
        actual: usize,
    },
    /// A field name was not valid UTF-8.
    #[error("field name is not valid UTF-8")]
    InvalidName,
}

/// Encodes `message` into a complete frame, length prefix included.
///
/// # Errors
///
/// Returns [`CodecError`] when a name, a value or the whole body overflows
/// its length slot.
pub fn encode(message: &Message) -> Result<Vec<u8>, CodecError> {
    let mut body = Vec::with_capacity(64);
    body.push(FRAME_MARKER);
    for field in message.fields() {
        let name = field.name().as_bytes();
        let name_len = u16::try_from(name.len())
            .map_err(|_| CodecError::NameTooLong { length: name.len() })?;
        let value = field.value();
        let value_len = u32::try_from(value.len()).map_err(|_| CodecError::ValueTooLong {
            name: field.name().to_owned(),
            length: value.len(),
        })?;
        body.extend_from_slice(&name_len.to_be_bytes());
        body.extend_from_slice(name);
        body.extend_from_slice(&value_len.to_be_bytes());
        body.extend_from_slice(value);
    }

    let body_len = u32::try_from(body.len())
        .map_err(|_| CodecError::FrameTooLarge { length: body.len() })?;
    let mut frame = Vec::with_capacity(LENGTH_PREFIX_LEN + body.len());
    frame.extend_from_slice(&body_len.to_be_bytes());
    frame.extend_from_slice(&body);
    trace!(target: CODEC_TARGET, fields = message.len(), bytes = frame.len(), "encoded frame");
    Ok(frame)
}

/// Decodes a complete frame, length prefix included.
///
/// # Errors
///
/// Returns [`CodecError`] when the prefix disagrees with the body length or
/// the body is malformed.
pub fn decode(frame: &[u8]) -> Result<Message, CodecError> {
    let mut cursor = Cursor::new(frame);
    let declared = cursor.read_u32("length prefix")? as usize;
    let body = cursor.rest();
    if declared != body.len() {
        return Err(CodecError::LengthMismatch {
            declared,
            actual: body.len(),
        });
    }
    decode_body(body)
}

/// Decodes a frame body that has already been separated from its prefix.
///
/// # Errors
///
/// Returns [`CodecError`] when the marker is wrong or a field is truncated.
pub fn decode_body(body: &[u8]) -> Result<Message, CodecError> {
    let (&marker, fields) = body.split_first().ok_or(CodecError::EmptyBody)?;
    if marker != FRAME_MARKER {
        return Err(CodecError::BadMarker { found: marker });
    }

    let mut cursor = Cursor::new(fields);
    let mut decoded = Vec::new();
    while !cursor.is_empty() {
        let name_len = usize::from(cursor.read_u16("field name length")?);
        let name = cursor.take(name_len, "field name")?;
        let name = std::str::from_utf8(name).map_err(|_| CodecError::InvalidName)?;
        let value_len = cursor.read_u32("field value length")? as usize;
        let value = cursor.take(value_len, "field value")?;
        decoded.push(Field::new(name, value));
    }
    Ok(Message::from_fields(decoded))
}

/// Reads the body length announced by a 4-byte prefix.
pub(crate) const fn body_length(prefix: [u8; LENGTH_PREFIX_LEN]) -> usize {
    u32::from_be_bytes(prefix) as usize
}

struct Cursor<'a> {
    remaining: &'a [u8],
}

impl<'a> Cursor<'a> {
    const fn new(bytes: &'a [u8]) -> Self {
        Self { remaining: bytes }
    }

    const fn is_empty(&self) -> bool {
        self.remaining.is_empty()
    }

    const fn rest(&self) -> &'a [u8] {
        self.remaining
    }

    fn take(&mut self, len: usize, context: &'static str) -> Result<&'a [u8], CodecError> {
        let available = self.remaining.len();
        let Some((head, tail)) = self.remaining.split_at_checked(len) else {
            return Err(CodecError::Truncated {
                context,
                needed: len,
                available,
            });
        };
        self.remaining = tail;
        Ok(head)
    }

    fn read_u16(&mut self, context: &'static str) -> Result<u16, CodecError> {
        let bytes = self.take(NAME_LENGTH_LEN, context)?;
        let array: [u8; NAME_LENGTH_LEN] = bytes.try_into().map_err(|_| CodecError::Truncated {
            context,
            needed: NAME_LENGTH_LEN,
            available: bytes.len(),
        })?;
        Ok(u16::from_be_bytes(array))
    }

    fn read_u32(&mut self, context: &'static str) -> Result<u32, CodecError> {
        let bytes = self.take(VALUE_LENGTH_LEN, context)?;
        let array: [u8; VALUE_LENGTH_LEN] = bytes.try_into().map_err(|_| CodecError::Truncated {
            context,
            needed: VALUE_LENGTH_LEN,
            available: bytes.len(),
        })?;
        Ok(u32::from_be_bytes(array))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::message::MessageKind;

    #[rstest]
    fn encodes_the_documented_layout() {
        let message = Message::default().with_field("id", "eoc");
        let frame = encode(&message).expect("encode");
        let mut expected = vec![0, 0, 0, 12]; // body length
        expected.push(0x01); // marker
        expected.extend_from_slice(&[0, 2, b'i', b'd']); // name
        expected.extend_from_slice(&[0, 0, 0, 3, b'e', b'o', b'c']); // value
        assert_eq!(frame, expected);
    }

    #[rstest]
    fn preserves_order_and_binary_values() {
        let message = Message::new(MessageKind::Notify)
            .with_field("zeta", vec![0_u8, 255, 10])
            .with_field("alpha", "")
            .with_field("zeta2", "text");
        let decoded = decode(&encode(&message).expect("encode")).expect("decode");
        assert_eq!(decoded, message);
    }

    #[rstest]
    fn empty_message_is_marker_only() {
        let frame = encode(&Message::default()).expect("encode");
        assert_eq!(frame, vec![0, 0, 0, 1, FRAME_MARKER]);
        assert!(decode(&frame).expect("decode").is_empty());
    }

    #[rstest]
    fn lengths_with_high_bit_are_read_unsigned() {
        // 0x80 in the name length's low byte must read as 128, not -128.
        let name = "n".repeat(0x80);
        let message = Message::default().with_field(name.clone(), vec![7_u8; 0x81]);
        let decoded = decode(&encode(&message).expect("encode")).expect("decode");
        assert_eq!(decoded.get_bytes(&name).map(<[u8]>::len), Some(0x81));
        assert_eq!(body_length([0x00, 0x00, 0x00, 0xff]), 255);
        assert_eq!(body_length([0x80, 0x00, 0x00, 0x00]), 0x8000_0000);
    }

    #[rstest]
    fn rejects_bad_marker() {
        assert_eq!(
            decode_body(&[0x02, 0, 0]),
            Err(CodecError::BadMarker { found: 0x02 })
        );
    }

    #[rstest]
    #[case::name_length(vec![FRAME_MARKER, 0], "field name length")]
    #[case::name(vec![FRAME_MARKER, 0, 4, b'a'], "field name")]
    #[case::value(vec![FRAME_MARKER, 0, 1, b'a', 0, 0, 0, 9, b'x'], "field value")]
    fn reports_truncation(#[case] body: Vec<u8>, #[case] expected: &str) {
        match decode_body(&body) {
            Err(CodecError::Truncated { context, .. }) => assert_eq!(context, expected),
            other => panic!("expected truncation, got {other:?}"),
        }
    }

    #[rstest]
    fn rejects_prefix_mismatch() {
        let mut frame = encode(&Message::new(MessageKind::Display)).expect("encode");
        frame.push(0);
        assert!(matches!(
            decode(&frame),
            Err(CodecError::LengthMismatch { .. })
        ));
    }

    #[rstest]
    fn rejects_oversized_names() {
        let message = Message::default().with_field("n".repeat(70_000), "v");
        assert_eq!(
            encode(&message),
            Err(CodecError::NameTooLong { length: 70_000 })
        );
    }
}
