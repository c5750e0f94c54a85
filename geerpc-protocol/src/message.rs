//! Envelope types: the per-call header and the connection handshake.

use crate::codec::WireFormat;
use crate::MAGIC_NUMBER;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-call envelope, sent as its own frame immediately before the body.
///
/// A request carries an empty `error`; the server echoes `service_method`
/// and `seq` unchanged in the response, filling `error` when the call
/// failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Qualified method name, `"Service.Method"`.
    pub service_method: String,
    /// Client-assigned call identifier, strictly monotonic per connection.
    pub seq: u64,
    /// Empty on requests and successful responses.
    #[serde(default)]
    pub error: String,
}

impl Header {
    /// Creates a request header.
    pub fn request(service_method: impl Into<String>, seq: u64) -> Self {
        Self {
            service_method: service_method.into(),
            seq,
            error: String::new(),
        }
    }

    /// Returns whether this header reports an error.
    pub fn has_error(&self) -> bool {
        !self.error.is_empty()
    }
}

/// Handshake record, negotiated once per connection before any framed
/// traffic.
///
/// Always encoded as a single JSON line, independent of `wire_format`, so
/// the server can read it before it knows the body encoding. Durations
/// cross the wire as integer milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectOptions {
    /// Must equal [`MAGIC_NUMBER`]; anything else is rejected.
    pub magic_number: i32,
    /// Body format tag, e.g. `"application/msgpack"`.
    pub wire_format: String,
    /// Dial + handshake deadline in milliseconds. Zero waits unboundedly.
    #[serde(default)]
    pub connect_timeout_ms: u64,
    /// Per-request handling deadline in milliseconds. Zero means no limit.
    #[serde(default)]
    pub handle_timeout_ms: u64,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            magic_number: MAGIC_NUMBER,
            wire_format: WireFormat::Msgpack.tag().to_string(),
            connect_timeout_ms: 10_000,
            handle_timeout_ms: 0,
        }
    }
}

impl ConnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_wire_format(mut self, format: WireFormat) -> Self {
        self.wire_format = format.tag().to_string();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_handle_timeout(mut self, timeout: Duration) -> Self {
        self.handle_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn handle_timeout(&self) -> Duration {
        Duration::from_millis(self.handle_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_header() {
        let h = Header::request("Foo.Sum", 7);
        assert_eq!(h.service_method, "Foo.Sum");
        assert_eq!(h.seq, 7);
        assert!(!h.has_error());
    }

    #[test]
    fn test_header_error_flag() {
        let mut h = Header::request("Foo.Sum", 1);
        h.error = "boom".to_string();
        assert!(h.has_error());
    }

    #[test]
    fn test_default_options() {
        let opts = ConnectOptions::default();
        assert_eq!(opts.magic_number, MAGIC_NUMBER);
        assert_eq!(opts.wire_format, WireFormat::Msgpack.tag());
        assert_eq!(opts.connect_timeout(), Duration::from_secs(10));
        assert_eq!(opts.handle_timeout(), Duration::ZERO);
    }

    #[test]
    fn test_options_builders() {
        let opts = ConnectOptions::new()
            .with_wire_format(WireFormat::Json)
            .with_handle_timeout(Duration::from_secs(1));
        assert_eq!(opts.wire_format, WireFormat::Json.tag());
        assert_eq!(opts.handle_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_options_json_roundtrip() {
        let opts = ConnectOptions::new().with_connect_timeout(Duration::from_millis(250));
        let json = serde_json::to_string(&opts).unwrap();
        let parsed: ConnectOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, opts);
    }
}
