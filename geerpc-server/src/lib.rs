//! # geerpc-server
//!
//! RPC server for geerpc: service registration with typed method
//! handlers, a connection-per-task serve loop with per-request handler
//! tasks, bounded handling latency, and an optional HTTP CONNECT upgrade
//! path.

pub mod error;
pub mod http;
pub mod server;
pub mod service;

pub use error::ServerError;
pub use server::Server;
pub use service::{Method, Service, ServiceBuilder};
