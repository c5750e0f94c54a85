//! Multiplexing RPC client.
//!
//! One [`Client`] owns one connection. Calls are correlated by a
//! strictly-monotonic sequence number: the sender registers a pending
//! entry and writes `(header, body)` frames under the send mutex, and a
//! dedicated receive-loop task completes pending entries as response
//! headers arrive. Cancellation is local: dropping a [`Call`] removes its
//! pending entry, and the late response (if any) is discarded by the
//! receive loop.

use crate::error::ClientError;
use bytes::Bytes;
use geerpc_protocol::{
    encode_frame, encode_options, ConnectOptions, Decoder, Header, WireFormat, CONNECTED_STATUS,
    DEFAULT_RPC_PATH, MAGIC_NUMBER,
};
use parking_lot::Mutex as StateMutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};

/// Read buffer size for socket reads.
const READ_BUFFER_SIZE: usize = 8192;

/// Raw completion delivered to a pending call: response body bytes, or
/// the error that ended the call.
type CallResult = Result<Bytes, ClientError>;

struct PendingCall {
    tx: oneshot::Sender<CallResult>,
}

/// State guarded by the state mutex: never held across await points.
struct State {
    /// Next sequence number to assign. Starts at 1.
    seq: u64,
    pending: HashMap<u64, PendingCall>,
    /// Set by `close`.
    closing: bool,
    /// Set by `terminate_calls` after a transport failure.
    shutdown: bool,
}

/// Shared between the client handle, its calls, and the receive loop.
///
/// Lock order: the send mutex (`writer`) is acquired before the state
/// mutex in `terminate_calls`; every other site takes only one of the
/// two.
struct Shared {
    format: WireFormat,
    writer: Mutex<OwnedWriteHalf>,
    state: StateMutex<State>,
}

impl Shared {
    /// Removes a pending call. Single lock acquisition: lock, remove,
    /// return.
    fn remove_call(&self, seq: u64) -> Option<PendingCall> {
        self.state.lock().pending.remove(&seq)
    }
}

/// An in-flight call returned by [`Client::go`].
///
/// Await it with [`recv`](Call::recv). Dropping it before completion
/// cancels the call locally: the pending entry is removed and the
/// server's eventual reply is discarded.
pub struct Call<R> {
    seq: u64,
    service_method: String,
    shared: Arc<Shared>,
    rx: Option<oneshot::Receiver<CallResult>>,
    _reply: PhantomData<fn() -> R>,
}

impl<R: DeserializeOwned> Call<R> {
    /// Sequence number assigned to this call (0 if registration failed).
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn service_method(&self) -> &str {
        &self.service_method
    }

    /// Waits for the completion signal and decodes the reply.
    ///
    /// Exactly one completion is delivered per call: success, server
    /// error, transport error, or local cancellation.
    pub async fn recv(mut self) -> Result<R, ClientError> {
        // The sender can only disappear without sending if the client was
        // torn down wholesale; surface that as a shutdown.
        let result = match self.rx.take() {
            Some(rx) => rx.await.unwrap_or(Err(ClientError::Shutdown)),
            None => Err(ClientError::Shutdown),
        };
        let body = result?;
        self.shared.format.decode(&body).map_err(ClientError::from)
    }
}

impl<R> Drop for Call<R> {
    fn drop(&mut self) {
        // No-op after completion: the receive loop (or the failing
        // sender) already removed the entry, and seqs are never reused.
        self.shared.remove_call(self.seq);
    }
}

/// RPC client over one connection.
pub struct Client {
    shared: Arc<Shared>,
    opts: ConnectOptions,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

impl Client {
    /// Performs the handshake on a connected stream and starts the
    /// receive loop. `leftover` carries bytes over-read during an HTTP
    /// upgrade.
    async fn handshake(
        mut stream: TcpStream,
        opts: ConnectOptions,
        leftover: Vec<u8>,
    ) -> Result<Self, ClientError> {
        let format = WireFormat::from_tag(&opts.wire_format).ok_or_else(|| {
            geerpc_protocol::ProtocolError::UnknownWireFormat(opts.wire_format.clone())
        })?;

        let handshake = encode_options(&opts)?;
        stream.write_all(&handshake).await?;

        let (read_half, write_half) = stream.into_split();
        let shared = Arc::new(Shared {
            format,
            writer: Mutex::new(write_half),
            state: StateMutex::new(State {
                seq: 1,
                pending: HashMap::new(),
                closing: false,
                shutdown: false,
            }),
        });

        let mut decoder = Decoder::new();
        decoder.extend(&leftover);
        tokio::spawn(receive(shared.clone(), read_half, decoder));

        Ok(Self { shared, opts })
    }

    /// Connects over TCP and performs the handshake.
    ///
    /// Zero or one caller option is accepted; the caller's magic number
    /// is always overwritten with the protocol constant and an empty
    /// format tag falls back to the default. A non-zero connect timeout
    /// bounds the dial and the handshake together.
    pub async fn dial(addr: &str, opts: Option<ConnectOptions>) -> Result<Self, ClientError> {
        let opts = parse_options(opts)?;
        let connect_timeout = opts.connect_timeout();

        let connect = async {
            let stream = TcpStream::connect(addr).await?;
            stream.set_nodelay(true).ok();
            Self::handshake(stream, opts, Vec::new()).await
        };
        bounded(connect, connect_timeout).await
    }

    /// As [`dial`](Client::dial), preceded by an HTTP CONNECT upgrade.
    pub async fn dial_http(addr: &str, opts: Option<ConnectOptions>) -> Result<Self, ClientError> {
        let opts = parse_options(opts)?;
        let connect_timeout = opts.connect_timeout();

        let connect = async {
            let mut stream = TcpStream::connect(addr).await?;
            stream.set_nodelay(true).ok();
            stream
                .write_all(format!("CONNECT {DEFAULT_RPC_PATH} HTTP/1.0\r\n\r\n").as_bytes())
                .await?;

            let (status_line, leftover) = read_http_response(&mut stream).await?;
            if !status_line.ends_with(CONNECTED_STATUS) {
                return Err(ClientError::UnexpectedHttpResponse(status_line));
            }
            Self::handshake(stream, opts, leftover).await
        };
        bounded(connect, connect_timeout).await
    }

    /// Dials a `"protocol@address"` endpoint: `http` goes through the
    /// CONNECT upgrade, anything else is a plain stream dial.
    pub async fn xdial(rpc_addr: &str, opts: Option<ConnectOptions>) -> Result<Self, ClientError> {
        let (protocol, addr) = rpc_addr
            .split_once('@')
            .ok_or_else(|| ClientError::InvalidAddress(rpc_addr.to_string()))?;
        match protocol {
            "http" => Self::dial_http(addr, opts).await,
            _ => Self::dial(addr, opts).await,
        }
    }

    /// The options negotiated for this connection.
    pub fn options(&self) -> &ConnectOptions {
        &self.opts
    }

    /// True iff the client is neither closing nor shut down.
    pub fn is_available(&self) -> bool {
        let st = self.shared.state.lock();
        !st.closing && !st.shutdown
    }

    /// Marks the client closing and shuts the connection down. Further
    /// calls fail with [`ClientError::Shutdown`]; pending calls complete
    /// with an error once the receive loop observes the close.
    pub async fn close(&self) -> Result<(), ClientError> {
        {
            let mut st = self.shared.state.lock();
            if st.closing {
                return Err(ClientError::Shutdown);
            }
            st.closing = true;
        }
        let mut writer = self.shared.writer.lock().await;
        let _ = writer.shutdown().await;
        Ok(())
    }

    /// Registers and sends a call asynchronously, returning its handle.
    ///
    /// Registration or send failures are delivered through the handle,
    /// never lost: every call completes exactly once.
    pub async fn go<A, R>(&self, service_method: &str, args: &A) -> Call<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let (tx, rx) = oneshot::channel();
        let mut call = Call {
            seq: 0,
            service_method: service_method.to_string(),
            shared: self.shared.clone(),
            rx: Some(rx),
            _reply: PhantomData,
        };

        let body = match self.shared.format.encode(args) {
            Ok(body) => body,
            Err(e) => {
                let _ = tx.send(Err(e.into()));
                return call;
            }
        };

        // Send path: the send mutex is held across register + write so
        // frames from concurrent calls never interleave.
        let mut writer = self.shared.writer.lock().await;

        let seq = {
            let mut st = self.shared.state.lock();
            if st.closing || st.shutdown {
                drop(st);
                let _ = tx.send(Err(ClientError::Shutdown));
                return call;
            }
            let seq = st.seq;
            st.seq += 1;
            st.pending.insert(seq, PendingCall { tx });
            seq
        };
        call.seq = seq;

        let header = Header::request(service_method, seq);
        let result = write_request(&mut writer, self.shared.format, &header, &body).await;
        drop(writer);

        if let Err(e) = result {
            // The receive loop will shut the client down on its side;
            // this call completes with the write error now.
            if let Some(pending) = self.shared.remove_call(seq) {
                let _ = pending.tx.send(Err(e));
            }
        }
        call
    }

    /// Synchronous call: send, then await the completion.
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<R, ClientError>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        self.go(service_method, args).await.recv().await
    }

    /// As [`call`](Client::call), racing the completion against a
    /// deadline. On expiry the pending entry is removed and the server's
    /// eventual reply is discarded.
    pub async fn call_with_timeout<A, R>(
        &self,
        service_method: &str,
        args: &A,
        timeout: Duration,
    ) -> Result<R, ClientError>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let call = self.go(service_method, args).await;
        match tokio::time::timeout(timeout, call.recv()).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::CallFailed(format!(
                "timed out after {timeout:?}"
            ))),
        }
    }

    /// Number of calls awaiting a response, for tests and diagnostics.
    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().pending.len()
    }
}

/// Applies the option-parsing rules: default on none, magic overwritten,
/// empty format tag replaced, unknown tags rejected before dialing.
fn parse_options(opts: Option<ConnectOptions>) -> Result<ConnectOptions, ClientError> {
    let mut opts = opts.unwrap_or_default();
    opts.magic_number = MAGIC_NUMBER;
    if opts.wire_format.is_empty() {
        opts.wire_format = WireFormat::default().tag().to_string();
    }
    if WireFormat::from_tag(&opts.wire_format).is_none() {
        return Err(geerpc_protocol::ProtocolError::UnknownWireFormat(opts.wire_format).into());
    }
    Ok(opts)
}

/// Runs a connect future under the configured deadline; zero disables it.
async fn bounded<F>(connect: F, timeout: Duration) -> Result<Client, ClientError>
where
    F: std::future::Future<Output = Result<Client, ClientError>>,
{
    if timeout.is_zero() {
        connect.await
    } else {
        match tokio::time::timeout(timeout, connect).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::ConnectTimeout(timeout)),
        }
    }
}

/// Writes one request (header frame, then body frame) and flushes.
async fn write_request(
    writer: &mut OwnedWriteHalf,
    format: WireFormat,
    header: &Header,
    body: &[u8],
) -> Result<(), ClientError> {
    let header_bytes = format.encode(header)?;
    let header_frame = encode_frame(&header_bytes)?;
    let body_frame = encode_frame(body)?;
    writer.write_all(&header_frame).await?;
    writer.write_all(&body_frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads an HTTP response head, returning the status line and any bytes
/// read past the terminating blank line.
async fn read_http_response(stream: &mut TcpStream) -> Result<(String, Vec<u8>), ClientError> {
    let mut buf: Vec<u8> = Vec::with_capacity(128);
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).into_owned();
            let status_line = head.lines().next().unwrap_or("").to_string();
            return Ok((status_line, buf[end + 4..].to_vec()));
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Reads the next frame payload, pulling from the socket as needed.
async fn next_frame(
    read_half: &mut OwnedReadHalf,
    decoder: &mut Decoder,
) -> Result<Option<Bytes>, ClientError> {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        if let Some(frame) = decoder.decode_frame()? {
            return Ok(Some(frame));
        }
        let n = read_half.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        decoder.extend(&buf[..n]);
    }
}

/// Receive loop: correlates response frames with pending calls until the
/// transport fails, then terminates every pending call.
async fn receive(shared: Arc<Shared>, mut read_half: OwnedReadHalf, mut decoder: Decoder) {
    let exit = loop {
        let header_frame = match next_frame(&mut read_half, &mut decoder).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break ClientError::ConnectionClosed,
            Err(e) => break e,
        };
        let header: Header = match shared.format.decode(&header_frame) {
            Ok(h) => h,
            Err(e) => break e.into(),
        };
        let body = match next_frame(&mut read_half, &mut decoder).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break ClientError::ConnectionClosed,
            Err(e) => break e,
        };

        match shared.remove_call(header.seq) {
            // Cancelled or failed at send time; the body is discarded.
            None => {
                tracing::debug!("rpc client: discarding reply for seq {}", header.seq);
            }
            Some(pending) => {
                let result = if header.has_error() {
                    Err(ClientError::ServerError(header.error))
                } else {
                    Ok(body)
                };
                let _ = pending.tx.send(result);
            }
        }
    };

    tracing::debug!("rpc client: receive loop exiting: {}", exit);
    terminate_calls(&shared, exit).await;
}

/// Fails every pending call and marks the client shut down.
///
/// Takes the send mutex first, then the state mutex, so no new call can
/// slip in between the shutdown flag and the drain.
async fn terminate_calls(shared: &Shared, err: ClientError) {
    let _writer = shared.writer.lock().await;
    let mut st = shared.state.lock();
    st.shutdown = true;
    let msg = err.to_string();
    for (_, pending) in st.pending.drain() {
        let _ = pending.tx.send(Err(ClientError::ConnectionLost(msg.clone())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_options_defaults() {
        let opts = parse_options(None).unwrap();
        assert_eq!(opts.magic_number, MAGIC_NUMBER);
        assert_eq!(opts.wire_format, WireFormat::Msgpack.tag());
    }

    #[test]
    fn test_parse_options_overwrites_magic() {
        let user = ConnectOptions {
            magic_number: 0xDEAD,
            ..ConnectOptions::default()
        };
        let opts = parse_options(Some(user)).unwrap();
        assert_eq!(opts.magic_number, MAGIC_NUMBER);
    }

    #[test]
    fn test_parse_options_fills_empty_format() {
        let user = ConnectOptions {
            wire_format: String::new(),
            ..ConnectOptions::default()
        };
        let opts = parse_options(Some(user)).unwrap();
        assert_eq!(opts.wire_format, WireFormat::Msgpack.tag());
    }

    #[test]
    fn test_parse_options_rejects_unknown_format() {
        let user = ConnectOptions {
            wire_format: "application/gob".to_string(),
            ..ConnectOptions::default()
        };
        assert!(parse_options(Some(user)).is_err());
    }

    #[tokio::test]
    async fn test_xdial_rejects_malformed_address() {
        let err = Client::xdial("no-protocol-separator", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidAddress(_)));
    }
}
