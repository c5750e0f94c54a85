//! Value encoding and incremental decoding.
//!
//! Two layers live here. [`WireFormat`] encodes and decodes individual
//! values (headers and bodies) under the tag negotiated in the handshake.
//! [`Decoder`] buffers raw socket bytes and yields complete frames, plus
//! the one-shot JSON-line handshake that precedes framed traffic.

use crate::error::ProtocolError;
use crate::frame;
use crate::message::ConnectOptions;
use crate::MAX_HANDSHAKE_SIZE;
use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Body encoding negotiated in the handshake.
///
/// MessagePack is the canonical self-describing binary format; structs are
/// encoded as maps (`to_vec_named`) so both ends can evolve field order
/// independently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WireFormat {
    #[default]
    Msgpack,
    Json,
}

impl WireFormat {
    /// Resolves a handshake tag to a format. Unknown tags are a handshake
    /// rejection, not an error variant, so this returns `Option`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "application/msgpack" => Some(WireFormat::Msgpack),
            "application/json" => Some(WireFormat::Json),
            _ => None,
        }
    }

    /// The handshake tag for this format.
    pub fn tag(&self) -> &'static str {
        match self {
            WireFormat::Msgpack => "application/msgpack",
            WireFormat::Json => "application/json",
        }
    }

    /// Encodes a value under this format.
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        match self {
            WireFormat::Msgpack => Ok(rmp_serde::to_vec_named(value)?),
            WireFormat::Json => Ok(serde_json::to_vec(value)?),
        }
    }

    /// Decodes a value under this format.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, ProtocolError> {
        match self {
            WireFormat::Msgpack => Ok(rmp_serde::from_slice(bytes)?),
            WireFormat::Json => Ok(serde_json::from_slice(bytes)?),
        }
    }
}

/// Encodes the handshake as a single JSON line.
pub fn encode_options(opts: &ConnectOptions) -> Result<Vec<u8>, ProtocolError> {
    let mut bytes = serde_json::to_vec(opts)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Buffering decoder for one side of a connection.
///
/// Socket reads are appended with [`extend`](Decoder::extend); complete
/// values are pulled with [`decode_options`](Decoder::decode_options)
/// (handshake phase) and [`decode_frame`](Decoder::decode_frame) (framed
/// phase). Bytes read past the handshake newline stay buffered for the
/// framed phase, so an eager peer cannot lose its first request.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next frame payload from the buffer.
    pub fn decode_frame(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        frame::decode_frame(&mut self.buffer)
    }

    /// Attempts to decode the handshake line from the buffer.
    pub fn decode_options(&mut self) -> Result<Option<ConnectOptions>, ProtocolError> {
        match self.buffer.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                let line = self.buffer.split_to(pos + 1);
                let opts = serde_json::from_slice(&line[..line.len() - 1])?;
                Ok(Some(opts))
            }
            None if self.buffer.len() > MAX_HANDSHAKE_SIZE => Err(ProtocolError::HandshakeTooLong {
                size: self.buffer.len(),
                max: MAX_HANDSHAKE_SIZE,
            }),
            None => Ok(None),
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Header;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Args {
        num1: i32,
        num2: i32,
    }

    #[test]
    fn test_msgpack_roundtrip() {
        let args = Args { num1: 3, num2: 4 };
        let bytes = WireFormat::Msgpack.encode(&args).unwrap();
        // to_vec_named produces map format (0x8X), not positional arrays
        assert_eq!(bytes[0] & 0xF0, 0x80);
        let decoded: Args = WireFormat::Msgpack.decode(&bytes).unwrap();
        assert_eq!(decoded, args);
    }

    #[test]
    fn test_json_roundtrip() {
        let header = Header::request("Foo.Sum", 9);
        let bytes = WireFormat::Json.encode(&header).unwrap();
        let decoded: Header = WireFormat::Json.decode(&bytes).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_tag_resolution() {
        assert_eq!(
            WireFormat::from_tag("application/msgpack"),
            Some(WireFormat::Msgpack)
        );
        assert_eq!(
            WireFormat::from_tag("application/json"),
            Some(WireFormat::Json)
        );
        assert_eq!(WireFormat::from_tag("application/gob"), None);
        assert_eq!(WireFormat::from_tag(""), None);
    }

    #[test]
    fn test_decode_error_on_wrong_shape() {
        let bytes = WireFormat::Msgpack.encode(&"just a string").unwrap();
        let result: Result<Args, _> = WireFormat::Msgpack.decode(&bytes);
        assert!(result.is_err());
    }

    #[test]
    fn test_handshake_roundtrip() {
        let opts = ConnectOptions::default();
        let encoded = encode_options(&opts).unwrap();
        assert_eq!(*encoded.last().unwrap(), b'\n');

        let mut decoder = Decoder::new();
        decoder.extend(&encoded);
        let decoded = decoder.decode_options().unwrap().unwrap();
        assert_eq!(decoded, opts);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_handshake_partial_then_complete() {
        let encoded = encode_options(&ConnectOptions::default()).unwrap();
        let mut decoder = Decoder::new();

        decoder.extend(&encoded[..10]);
        assert!(decoder.decode_options().unwrap().is_none());

        decoder.extend(&encoded[10..]);
        assert!(decoder.decode_options().unwrap().is_some());
    }

    #[test]
    fn test_handshake_preserves_trailing_frames() {
        // A client may write the handshake and the first request in one
        // burst; bytes after the newline must survive for the framed phase.
        let mut stream = encode_options(&ConnectOptions::default()).unwrap();
        let header_bytes = WireFormat::Msgpack
            .encode(&Header::request("Foo.Sum", 1))
            .unwrap();
        stream.extend_from_slice(&frame::encode_frame(&header_bytes).unwrap());

        let mut decoder = Decoder::new();
        decoder.extend(&stream);
        decoder.decode_options().unwrap().unwrap();

        let frame = decoder.decode_frame().unwrap().unwrap();
        let header: Header = WireFormat::Msgpack.decode(&frame).unwrap();
        assert_eq!(header.seq, 1);
    }

    #[test]
    fn test_handshake_line_cap() {
        let mut decoder = Decoder::new();
        decoder.extend(&vec![b'x'; MAX_HANDSHAKE_SIZE + 1]);
        let result = decoder.decode_options();
        assert!(matches!(
            result,
            Err(ProtocolError::HandshakeTooLong { .. })
        ));
    }

    #[test]
    fn test_garbage_handshake_line() {
        let mut decoder = Decoder::new();
        decoder.extend(b"not json\n");
        assert!(decoder.decode_options().is_err());
    }
}
