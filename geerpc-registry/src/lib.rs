//! # geerpc-registry
//!
//! Side-car registry for geerpc servers: heartbeat-TTL tracking of live
//! servers, an HTTP surface publishing the alive set, and the heartbeat
//! helper each server runs.

pub mod error;
pub mod heartbeat;
pub mod http;
pub mod registry;

pub use error::RegistryError;
pub use heartbeat::heartbeat;
pub use http::serve;
pub use registry::{Registry, DEFAULT_TIMEOUT};
