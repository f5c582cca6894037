//! Stream framing and reassembly.
//!
//! Stream transports carry envelopes as `[u32 big-endian length][length
//! bytes]`. The [`ReassemblyBuffer`] absorbs arbitrary read boundaries:
//! a single read may contain zero complete frames, many frames, or a
//! frame split at any byte. [`FrameDecoder`] layers the envelope codec
//! on top and yields decoded envelopes.
//!
//! The buffer is single-writer, single-reader: it is owned by the
//! receive path and must never be shared across tasks.

use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};

use crate::core::ProtocolError;
use crate::protocol::codec::EnvelopeCodec;
use crate::protocol::envelope::Envelope;

/// Size of the frame length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Prefix a serialized envelope with its big-endian length.
pub fn encode_frame(envelope_bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(LENGTH_PREFIX_SIZE + envelope_bytes.len());
    out.extend_from_slice(&(envelope_bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(envelope_bytes);
    out
}

/// Accumulates partial stream bytes until complete frames can be
/// extracted.
///
/// Storage grows geometrically under load and shrinks back toward the
/// configured floor once usage drops below the shrink threshold of the
/// observed high-water mark, bounding idle memory.
#[derive(Debug)]
pub struct ReassemblyBuffer {
    buf: BytesMut,
    /// Initial capacity; the buffer never shrinks below this.
    floor: usize,
    /// Shrink when usage falls below this percentage of the high-water
    /// mark.
    shrink_threshold_pct: u32,
    /// Largest buffered byte count seen since the last shrink.
    high_water: usize,
    /// Hard cap on a single frame's declared length.
    max_frame: usize,
}

impl ReassemblyBuffer {
    /// Create a buffer with the given floor capacity, shrink threshold
    /// (percent of high water), and frame cap.
    pub fn new(floor: usize, shrink_threshold_pct: u32, max_frame: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(floor),
            floor,
            shrink_threshold_pct,
            high_water: 0,
            max_frame,
        }
    }

    /// Append freshly received bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
        if self.buf.len() > self.high_water {
            self.high_water = self.buf.len();
        }
    }

    /// Number of buffered (unconsumed) bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Check whether no bytes are buffered.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Current backing capacity.
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Extract every complete frame currently buffered.
    ///
    /// Returns the raw envelope bytes of each frame, in order. A
    /// malformed length field is fatal: the connection carrying this
    /// stream must be torn down.
    pub fn drain_frames(&mut self) -> Result<Vec<Bytes>, ProtocolError> {
        let mut frames = Vec::new();

        loop {
            if self.buf.len() < LENGTH_PREFIX_SIZE {
                break;
            }

            let declared = i32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
            if declared <= 0 {
                return Err(ProtocolError::BadLength { length: declared });
            }
            let length = declared as usize;
            if length > self.max_frame {
                return Err(ProtocolError::FrameTooLarge {
                    length,
                    cap: self.max_frame,
                });
            }

            if self.buf.len() < LENGTH_PREFIX_SIZE + length {
                // Frame not fully buffered yet; wait for more bytes.
                break;
            }

            let mut frame = self.buf.split_to(LENGTH_PREFIX_SIZE + length);
            frame.advance(LENGTH_PREFIX_SIZE);
            frames.push(frame.freeze());
        }

        self.apply_shrink_policy();
        Ok(frames)
    }

    /// Shrink the backing storage toward the floor when usage has
    /// dropped well below the high-water mark.
    fn apply_shrink_policy(&mut self) {
        if self.buf.capacity() <= self.floor {
            return;
        }
        let threshold = self.high_water as u64 * self.shrink_threshold_pct as u64 / 100;
        if (self.buf.len() as u64) < threshold {
            let mut fresh = BytesMut::with_capacity(self.floor.max(self.buf.len()));
            fresh.extend_from_slice(&self.buf);
            self.buf = fresh;
            self.high_water = self.buf.len();
        }
    }
}

/// Turns raw stream bytes into decoded envelopes.
pub struct FrameDecoder {
    buffer: ReassemblyBuffer,
    codec: Arc<dyn EnvelopeCodec>,
}

impl FrameDecoder {
    /// Create a decoder over the given codec.
    pub fn new(buffer: ReassemblyBuffer, codec: Arc<dyn EnvelopeCodec>) -> Self {
        Self { buffer, codec }
    }

    /// Feed received bytes and extract every envelope now complete.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Envelope>, ProtocolError> {
        self.buffer.extend(data);
        let frames = self.buffer.drain_frames()?;
        let mut envelopes = Vec::with_capacity(frames.len());
        for frame in frames {
            envelopes.push(self.codec.decode(&frame)?);
        }
        Ok(envelopes)
    }

    /// Bytes currently waiting for frame completion.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::BinaryCodec;
    use crate::protocol::envelope::Route;

    const TEST_CAP: usize = 1024 * 1024;

    fn buffer() -> ReassemblyBuffer {
        ReassemblyBuffer::new(64, 25, TEST_CAP)
    }

    fn decoder() -> FrameDecoder {
        FrameDecoder::new(buffer(), Arc::new(BinaryCodec::new()))
    }

    fn envelope(n: u8) -> Envelope {
        Envelope::business(Route::new(1, n as u16), n as i32, vec![n; 3])
    }

    fn encoded(n: u8) -> Vec<u8> {
        encode_frame(&BinaryCodec::new().encode(&envelope(n)))
    }

    #[test]
    fn test_zero_frames_per_read() {
        let mut dec = decoder();
        let bytes = encoded(1);
        // Only half the frame: nothing must come out, nothing lost.
        let out = dec.push(&bytes[..bytes.len() / 2]).unwrap();
        assert!(out.is_empty());
        assert_eq!(dec.buffered(), bytes.len() / 2);

        let out = dec.push(&bytes[bytes.len() / 2..]).unwrap();
        assert_eq!(out, vec![envelope(1)]);
        assert_eq!(dec.buffered(), 0);
    }

    #[test]
    fn test_many_frames_per_read() {
        let mut dec = decoder();
        let mut wire = Vec::new();
        for n in 1..=5 {
            wire.extend_from_slice(&encoded(n));
        }
        let out = dec.push(&wire).unwrap();
        assert_eq!(out, (1..=5).map(envelope).collect::<Vec<_>>());
    }

    #[test]
    fn test_split_at_every_boundary() {
        // Two frames back to back, split at every possible offset.
        let mut wire = encoded(1);
        wire.extend_from_slice(&encoded(2));

        for split in 1..wire.len() {
            let mut dec = decoder();
            let mut out = dec.push(&wire[..split]).unwrap();
            out.extend(dec.push(&wire[split..]).unwrap());
            assert_eq!(out, vec![envelope(1), envelope(2)], "split at {split}");
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut wire = encoded(7);
        wire.extend_from_slice(&encoded(8));

        let mut dec = decoder();
        let mut out = Vec::new();
        for byte in &wire {
            out.extend(dec.push(std::slice::from_ref(byte)).unwrap());
        }
        assert_eq!(out, vec![envelope(7), envelope(8)]);
    }

    #[test]
    fn test_zero_length_is_fatal() {
        let mut buf = buffer();
        buf.extend(&0u32.to_be_bytes());
        assert_eq!(
            buf.drain_frames(),
            Err(ProtocolError::BadLength { length: 0 })
        );
    }

    #[test]
    fn test_negative_length_is_fatal() {
        let mut buf = buffer();
        buf.extend(&(-5i32).to_be_bytes());
        assert_eq!(
            buf.drain_frames(),
            Err(ProtocolError::BadLength { length: -5 })
        );
    }

    #[test]
    fn test_oversized_length_is_fatal() {
        let mut buf = buffer();
        buf.extend(&((TEST_CAP as u32 + 1).to_be_bytes()));
        assert_eq!(
            buf.drain_frames(),
            Err(ProtocolError::FrameTooLarge {
                length: TEST_CAP + 1,
                cap: TEST_CAP,
            })
        );
    }

    #[test]
    fn test_shrinks_after_burst() {
        let mut buf = ReassemblyBuffer::new(64, 25, TEST_CAP);

        // One large frame forces growth well past the floor.
        let body = vec![0xab; 32 * 1024];
        let mut wire = (body.len() as u32).to_be_bytes().to_vec();
        wire.extend_from_slice(&body);
        buf.extend(&wire);
        assert!(buf.capacity() >= wire.len());

        let frames = buf.drain_frames().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), body.len());

        // Empty after the burst: storage must fall back toward the floor.
        assert!(
            buf.capacity() < 4096,
            "capacity {} after shrink",
            buf.capacity()
        );
    }
}
