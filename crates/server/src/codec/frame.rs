//! Length-prefixed packet framing.
//!
//! A frame is `varint length | varint packet id | payload`, where `length`
//! counts the id and payload bytes. There is exactly one length prefix.

use super::buffer::PacketBuffer;
use super::error::CodecError;
use super::reader::PacketReader;

/// Largest frame body accepted from a peer (the largest three-byte VarInt).
pub const MAX_FRAME_LEN: usize = 2_097_151;

/// Encoded size of `v` as a VarInt.
pub fn varint_len(v: i32) -> usize {
    match v as u32 {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        0x20_0000..=0xFFF_FFFF => 4,
        _ => 5,
    }
}

/// Build a complete frame for packet `id` with an already-encoded payload.
pub fn encode_frame(id: i32, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    let body_len = varint_len(id) + payload.len();
    let len = i32::try_from(body_len).map_err(|_| CodecError::OversizedField {
        field: "frame",
        len: body_len,
        max: MAX_FRAME_LEN,
    })?;
    let mut frame = PacketBuffer::with_capacity(varint_len(len) + body_len);
    frame.write_varint(len)?;
    frame.write_varint(id)?;
    frame.write_bytes(payload)?;
    Ok(frame.into_inner())
}

/// Split a frame body into its packet id and payload.
pub fn split_packet(body: &[u8]) -> Result<(i32, &[u8]), CodecError> {
    let mut r = PacketReader::new(body);
    let id = r.read_varint()?;
    Ok((id, r.rest()))
}

/// Reassembles frames from a byte stream that may arrive in arbitrary
/// pieces.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    limit: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_limit(MAX_FRAME_LEN)
    }
}

impl FrameDecoder {
    /// A decoder accepting any frame the length prefix can express.
    pub fn new() -> Self {
        Self::default()
    }

    /// A decoder that rejects frame bodies longer than `limit` as soon as
    /// their length prefix arrives, before any of the body is buffered.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit: limit.min(MAX_FRAME_LEN),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes received but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Next complete frame body (id + payload), or `None` if more bytes
    /// are needed. A malformed or oversized length prefix is an error and
    /// the stream cannot be resynchronised after it.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, CodecError> {
        let mut r = PacketReader::new(&self.buf);
        let len = match r.read_varint() {
            Ok(len) => len,
            Err(CodecError::Truncated { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        let len = usize::try_from(len).map_err(|_| CodecError::NegativeLength { field: "frame", len })?;
        if len > self.limit {
            return Err(CodecError::OversizedField {
                field: "frame",
                len,
                max: self.limit,
            });
        }
        let header = r.position();
        if self.buf.len() < header + len {
            return Ok(None);
        }
        let body = self.buf[header..header + len].to_vec();
        self.buf.drain(..header + len);
        Ok(Some(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_length_prefix() {
        let frame = encode_frame(0x26, &[1, 2, 3]).unwrap();
        assert_eq!(frame, vec![4, 0x26, 1, 2, 3]);
    }

    #[test]
    fn varint_len_matches_encoding() {
        for v in [0, 127, 128, 16_384, 2_097_152, i32::MAX, -1] {
            let mut buf = PacketBuffer::new();
            buf.write_varint(v).unwrap();
            assert_eq!(varint_len(v), buf.len());
        }
    }

    #[test]
    fn decoder_handles_split_and_coalesced_frames() {
        let mut stream = encode_frame(0x00, b"hello").unwrap();
        stream.extend(encode_frame(0x01, &[9; 300]).unwrap());

        let mut dec = FrameDecoder::new();
        let mut frames = Vec::new();
        for chunk in stream.chunks(7) {
            dec.extend(chunk);
            while let Some(frame) = dec.next_frame().unwrap() {
                frames.push(frame);
            }
        }
        assert_eq!(frames.len(), 2);
        assert_eq!(split_packet(&frames[0]).unwrap(), (0x00, &b"hello"[..]));
        let (id, payload) = split_packet(&frames[1]).unwrap();
        assert_eq!(id, 0x01);
        assert_eq!(payload.len(), 300);
        assert_eq!(dec.buffered(), 0);
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut buf = PacketBuffer::new();
        buf.write_varint(MAX_FRAME_LEN as i32 + 1).unwrap();
        let mut dec = FrameDecoder::new();
        dec.extend(buf.as_slice());
        assert!(matches!(dec.next_frame(), Err(CodecError::OversizedField { .. })));
    }

    #[test]
    fn limit_applies_before_the_body_arrives() {
        let mut dec = FrameDecoder::with_limit(300);
        let mut buf = PacketBuffer::new();
        buf.write_varint(301).unwrap();
        dec.extend(buf.as_slice());
        dec.extend(&[0; 10]);
        assert!(matches!(
            dec.next_frame(),
            Err(CodecError::OversizedField { len: 301, max: 300, .. })
        ));

        let mut dec = FrameDecoder::with_limit(300);
        dec.extend(&encode_frame(0x03, &[7; 299]).unwrap());
        assert_eq!(dec.next_frame().unwrap().map(|f| f.len()), Some(300));
    }

    #[test]
    fn negative_frame_length_is_rejected() {
        let mut buf = PacketBuffer::new();
        buf.write_varint(-5).unwrap();
        let mut dec = FrameDecoder::new();
        dec.extend(buf.as_slice());
        assert!(matches!(dec.next_frame(), Err(CodecError::NegativeLength { .. })));
    }
}
