//! # geerpc-protocol
//!
//! Wire protocol for geerpc.
//!
//! This crate provides:
//! - The per-call `Header` envelope and the `ConnectOptions` handshake record
//! - Length-prefixed framing for header/body values
//! - Pluggable value encoding (`WireFormat`: MessagePack or JSON)
//! - A buffering `Decoder` for incremental reads off a socket

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;

pub use codec::{encode_options, Decoder, WireFormat};
pub use error::ProtocolError;
pub use frame::{decode_frame, encode_frame, LEN_PREFIX_SIZE};
pub use message::{ConnectOptions, Header};

/// Magic number identifying a geerpc connection, sent in the handshake.
pub const MAGIC_NUMBER: i32 = 0x3b3f5c;

/// Maximum frame payload size (16 MiB). A sanity cap, not a protocol limit.
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Maximum handshake line length before the connection is rejected.
pub const MAX_HANDSHAKE_SIZE: usize = 4096;

/// Path an HTTP client CONNECTs to before the RPC handshake.
pub const DEFAULT_RPC_PATH: &str = "/_geerpc_/rpc";

/// Status line body sent after a successful CONNECT upgrade.
pub const CONNECTED_STATUS: &str = "200 Connected to Gee RPC";

/// Registry HTTP path.
pub const DEFAULT_REGISTRY_PATH: &str = "/_geerpc_/registry";

/// Response header carrying the registry's alive set.
pub const SERVERS_HEADER: &str = "X-Geerpc-Servers";

/// Request header carrying a heartbeating server's address.
pub const SERVER_HEADER: &str = "X-Geerpc-Server";
