//! Server error types.

use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] geerpc_protocol::ProtocolError),

    #[error("rpc server: {0:?} is not a valid service name")]
    InvalidServiceName(String),

    #[error("rpc: service already defined: {0}")]
    ServiceAlreadyDefined(String),

    #[error("connection closed mid-frame")]
    UnexpectedEof,
}
