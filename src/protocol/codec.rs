//! Envelope serialization.
//!
//! The engine does not prescribe a payload format; it only needs the
//! envelope fields in a self-describing layout. [`EnvelopeCodec`] is the
//! pluggable seam; [`BinaryCodec`] is the default implementation.
//!
//! `BinaryCodec` wire layout (all scalars big-endian):
//!
//! ```text
//! +------+----------+------------+----------+-----------+------------+-----------+---------+
//! | kind | route    | request_id | status   | text_len  | error_text | body_len  | payload |
//! | u8   | u32      | i32        | i32      | u32       | text bytes | u32       | bytes   |
//! +------+----------+------------+----------+-----------+------------+-----------+---------+
//! ```

use crate::core::CodecError;
use crate::protocol::envelope::{Envelope, MessageKind, Route};

/// A pluggable envelope serializer.
///
/// Implementations must be self-describing in length: `decode` receives
/// exactly the bytes `encode` produced for one envelope.
pub trait EnvelopeCodec: Send + Sync {
    /// Serialize an envelope.
    fn encode(&self, envelope: &Envelope) -> Vec<u8>;

    /// Deserialize an envelope.
    fn decode(&self, data: &[u8]) -> Result<Envelope, CodecError>;
}

/// Fixed header size of the binary layout (kind + route + request_id +
/// status), before the two length-prefixed fields.
const FIXED_HEADER_SIZE: usize = 1 + 4 + 4 + 4;

/// The default binary envelope codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl BinaryCodec {
    /// Create the default codec.
    pub fn new() -> Self {
        Self
    }
}

impl EnvelopeCodec for BinaryCodec {
    fn encode(&self, envelope: &Envelope) -> Vec<u8> {
        let text = envelope.error_text.as_bytes();
        let mut out =
            Vec::with_capacity(FIXED_HEADER_SIZE + 8 + text.len() + envelope.payload.len());
        out.push(envelope.kind.as_byte());
        out.extend_from_slice(&envelope.route.packed().to_be_bytes());
        out.extend_from_slice(&envelope.request_id.to_be_bytes());
        out.extend_from_slice(&envelope.status.to_be_bytes());
        out.extend_from_slice(&(text.len() as u32).to_be_bytes());
        out.extend_from_slice(text);
        out.extend_from_slice(&(envelope.payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&envelope.payload);
        out
    }

    fn decode(&self, data: &[u8]) -> Result<Envelope, CodecError> {
        let mut cursor = Cursor::new(data);

        let kind_byte = cursor.read_u8()?;
        let kind = MessageKind::from_byte(kind_byte).ok_or(CodecError::UnknownKind(kind_byte))?;
        let route = Route::from_packed(cursor.read_u32()?);
        let request_id = cursor.read_u32()? as i32;
        let status = cursor.read_u32()? as i32;

        let text_len = cursor.read_u32()? as usize;
        let text_bytes = cursor.read_bytes(text_len)?;
        let error_text =
            String::from_utf8(text_bytes.to_vec()).map_err(|_| CodecError::BadErrorText)?;

        let payload_len = cursor.read_u32()? as usize;
        let payload = cursor.read_bytes(payload_len)?.to_vec();

        Ok(Envelope {
            kind,
            route,
            request_id,
            status,
            error_text,
            payload,
        })
    }
}

/// Bounds-checked reader over a byte slice.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn read_u8(&mut self) -> Result<u8, CodecError> {
        if self.remaining() < 1 {
            return Err(CodecError::UnexpectedEof);
        }
        let byte = self.data[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    fn read_u32(&mut self) -> Result<u32, CodecError> {
        if self.remaining() < 4 {
            return Err(CodecError::UnexpectedEof);
        }
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.data[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(u32::from_be_bytes(buf))
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < len {
            return Err(CodecError::FieldOverrun {
                declared: len,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }
}
