//! # geerpc-client
//!
//! RPC client for geerpc.
//!
//! This crate provides:
//! - [`Client`]: one multiplexed connection with sync/async/cancellable
//!   calls
//! - [`Discovery`] implementations over explicit lists and the registry
//! - [`XClient`]: discovery-backed load balancing and broadcast

pub mod client;
pub mod discovery;
pub mod error;
pub mod xclient;

pub use client::{Call, Client};
pub use discovery::{Discovery, MultiServerDiscovery, RegistryDiscovery, SelectMode};
pub use error::ClientError;
pub use xclient::XClient;
