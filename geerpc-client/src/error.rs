//! Client error types.

use std::time::Duration;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] geerpc_protocol::ProtocolError),

    /// The client was closed, or shut down after a transport failure.
    #[error("connection is shut down")]
    Shutdown,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("rpc client: connect timeout: expect within {0:?}")]
    ConnectTimeout(Duration),

    /// A call that ended locally: cancellation, deadline, or an early
    /// send failure surfaced through the call handle.
    #[error("rpc client: call failed: {0}")]
    CallFailed(String),

    /// Error string reported by the server in a response header.
    #[error("{0}")]
    ServerError(String),

    #[error("rpc client: wrong address format {0:?}, expect protocol@addr")]
    InvalidAddress(String),

    #[error("unexpected HTTP response: {0}")]
    UnexpectedHttpResponse(String),

    #[error("rpc discovery: no available servers")]
    NoAvailableServers,

    #[error("rpc discovery: registry error: {0}")]
    Registry(String),

    /// Fan-out error delivered to every call pending when the transport
    /// died.
    #[error("rpc client: connection lost: {0}")]
    ConnectionLost(String),
}
