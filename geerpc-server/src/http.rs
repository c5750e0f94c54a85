//! HTTP CONNECT upgrade.
//!
//! A client may reach the RPC endpoint through an HTTP proxy path: it
//! sends `CONNECT /_geerpc_/rpc HTTP/1.0`, the server answers with the
//! upgrade sentinel on the same connection, and both sides fall through to
//! the normal handshake. Only the request head is parsed here; the stream
//! must be reclaimed for raw framing immediately after the upgrade, which
//! is why this does not go through a full HTTP stack.

use crate::error::ServerError;
use crate::server::{serve_stream, Server, ServiceMap};
use geerpc_protocol::{Decoder, CONNECTED_STATUS, DEFAULT_RPC_PATH};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Upper bound on a request head before the connection is dropped.
const MAX_HEAD_SIZE: usize = 8192;

impl Server {
    /// Accepts connections expecting the HTTP CONNECT preamble.
    pub async fn accept_http(&self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    tracing::debug!("rpc server: http connection from {}", addr);
                    stream.set_nodelay(true).ok();
                    let services = self.services();
                    tokio::spawn(async move {
                        if let Err(e) = serve_upgrade(services, stream).await {
                            tracing::debug!("rpc server: http connection {} error: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("rpc server: accept error: {}", e);
                    return;
                }
            }
        }
    }

    /// Serves one connection that starts with an HTTP request head.
    pub async fn serve_http_conn(&self, stream: TcpStream) {
        if let Err(e) = serve_upgrade(self.services(), stream).await {
            tracing::debug!("rpc server: http connection error: {}", e);
        }
    }
}

async fn serve_upgrade(services: ServiceMap, mut stream: TcpStream) -> Result<(), ServerError> {
    let (head, leftover) = read_head(&mut stream).await?;

    let request_line = head.lines().next().unwrap_or("");
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("");

    if method != "CONNECT" {
        stream
            .write_all(b"HTTP/1.0 405 Method Not Allowed\r\n\r\n")
            .await?;
        return Ok(());
    }
    if path != DEFAULT_RPC_PATH {
        stream.write_all(b"HTTP/1.0 404 Not Found\r\n\r\n").await?;
        return Ok(());
    }

    stream
        .write_all(format!("HTTP/1.0 {CONNECTED_STATUS}\r\n\r\n").as_bytes())
        .await?;

    // Bytes the client sent past the request head belong to the RPC
    // handshake; seed the decoder with them.
    let mut decoder = Decoder::new();
    decoder.extend(&leftover);
    serve_stream(services, stream, decoder).await
}

/// Reads up to and including the blank line terminating a request head.
/// Returns the head text and any over-read bytes.
async fn read_head(stream: &mut TcpStream) -> Result<(String, Vec<u8>), ServerError> {
    let mut buf: Vec<u8> = Vec::with_capacity(256);
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(end) = find_head_end(&buf) {
            let head = String::from_utf8_lossy(&buf[..end]).into_owned();
            let leftover = buf[end..].to_vec();
            return Ok((head, leftover));
        }
        if buf.len() > MAX_HEAD_SIZE {
            return Err(ServerError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "http request head too large",
            )));
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(ServerError::UnexpectedEof);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Index just past the `\r\n\r\n` terminator, if present.
fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_head_end() {
        assert_eq!(find_head_end(b"CONNECT / HTTP/1.0\r\n\r\n"), Some(22));
        assert_eq!(find_head_end(b"CONNECT / HTTP/1.0\r\n"), None);
        assert_eq!(
            find_head_end(b"CONNECT / HTTP/1.0\r\n\r\nextra"),
            Some(22)
        );
    }
}
