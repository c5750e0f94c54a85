//! Length-prefixed framing.
//!
//! Every protocol value after the handshake (a header or a body) travels
//! as one frame:
//!
//! ```text
//! +-------------+------------------+
//! | payload_len | payload          |
//! |   4 bytes   | payload_len bytes|
//! +-------------+------------------+
//! ```
//!
//! The payload length is big-endian. Requests and responses alternate
//! header and body frames; the encoding of the payload itself is the
//! connection's negotiated [`WireFormat`](crate::WireFormat).

use crate::error::ProtocolError;
use crate::MAX_PAYLOAD_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the length prefix in bytes.
pub const LEN_PREFIX_SIZE: usize = 4;

/// Encodes a payload into a frame.
pub fn encode_frame(payload: &[u8]) -> Result<BytesMut, ProtocolError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }

    let mut buf = BytesMut::with_capacity(LEN_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    Ok(buf)
}

/// Decodes the next frame from the buffer.
///
/// Returns `Ok(Some(payload))` if a complete frame was available,
/// `Ok(None)` if more data is needed, or `Err` on protocol errors.
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<Bytes>, ProtocolError> {
    if buf.len() < LEN_PREFIX_SIZE {
        return Ok(None);
    }

    // Peek at the length without consuming
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: len,
            max: MAX_PAYLOAD_SIZE,
        });
    }

    if buf.len() < LEN_PREFIX_SIZE + len {
        return Ok(None);
    }

    buf.advance(LEN_PREFIX_SIZE);
    Ok(Some(buf.split_to(len).freeze()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let payload = b"hello frame";
        let mut buf = encode_frame(payload).unwrap();
        let decoded = decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(&decoded[..], payload);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_empty_payload() {
        let mut buf = encode_frame(b"").unwrap();
        let decoded = decode_frame(&mut buf).unwrap().unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_incomplete_prefix() {
        let mut buf = BytesMut::from(&b"\x00\x00"[..]);
        assert!(decode_frame(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_incomplete_payload() {
        let full = encode_frame(b"partial payload").unwrap();
        let mut buf = BytesMut::from(&full[..full.len() - 3]);
        assert!(decode_frame(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_frame_too_large_on_decode() {
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_PAYLOAD_SIZE + 1) as u32);
        let result = decode_frame(&mut buf);
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_multiple_frames_in_buffer() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_frame(b"one").unwrap());
        buf.extend_from_slice(&encode_frame(b"two").unwrap());

        assert_eq!(&decode_frame(&mut buf).unwrap().unwrap()[..], b"one");
        assert_eq!(&decode_frame(&mut buf).unwrap().unwrap()[..], b"two");
        assert!(decode_frame(&mut buf).unwrap().is_none());
    }
}
