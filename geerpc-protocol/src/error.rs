//! Protocol error types.

use thiserror::Error;

/// Errors raised while framing or encoding protocol values.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("handshake line too long: {size} bytes (max {max})")]
    HandshakeTooLong { size: usize, max: usize },

    #[error("unknown wire format: {0:?}")]
    UnknownWireFormat(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MessagePack encode error: {0}")]
    MsgpackEncode(#[from] rmp_serde::encode::Error),

    #[error("MessagePack decode error: {0}")]
    MsgpackDecode(#[from] rmp_serde::decode::Error),
}
