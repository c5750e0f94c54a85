//! TCP server: accept loop, handshake, request demultiplexing.
//!
//! One task serves each connection. After the JSON-line handshake the
//! stream is split: a single read loop decodes `(header, body)` frame
//! pairs and spawns one handler task per request, while all responses are
//! serialized through a mutex-guarded write half. Per-request failures
//! (unknown method, decode errors, handler errors) answer with an error
//! header and never terminate the connection; framing failures do.

use crate::error::ServerError;
use crate::service::Service;
use bytes::Bytes;
use dashmap::DashMap;
use geerpc_protocol::{encode_frame, Decoder, Header, WireFormat, MAGIC_NUMBER};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinSet;

/// Read buffer size for socket reads.
const READ_BUFFER_SIZE: usize = 8192;

/// Write half shared between the read loop and handler tasks. A header
/// frame and its body frame are written under one lock hold, so responses
/// never interleave.
type SharedWriter = Arc<Mutex<OwnedWriteHalf>>;

pub(crate) type ServiceMap = Arc<DashMap<String, Arc<Service>>>;

/// RPC server: a concurrency-safe, insertion-only map of services plus
/// the connection-serving machinery.
#[derive(Clone, Default)]
pub struct Server {
    services: ServiceMap,
}

impl Server {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a service. A registered service is immutable and never
    /// removed; re-registering a name fails.
    pub fn register(&self, service: Service) -> Result<(), ServerError> {
        use dashmap::mapref::entry::Entry;

        let name = service.name().to_string();
        match self.services.entry(name) {
            Entry::Occupied(e) => Err(ServerError::ServiceAlreadyDefined(e.key().clone())),
            Entry::Vacant(e) => {
                tracing::info!("rpc server: register service {}", service.name());
                e.insert(Arc::new(service));
                Ok(())
            }
        }
    }

    /// Looks up a registered service, mainly for tests and diagnostics.
    pub fn service(&self, name: &str) -> Option<Arc<Service>> {
        self.services.get(name).map(|s| s.value().clone())
    }

    /// Accepts connections in a loop, serving each in its own task.
    pub async fn accept(&self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    tracing::debug!("rpc server: connection from {}", addr);
                    stream.set_nodelay(true).ok();
                    let services = self.services.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_stream(services, stream, Decoder::new()).await {
                            tracing::debug!("rpc server: connection {} error: {}", addr, e);
                        }
                        tracing::debug!("rpc server: connection {} closed", addr);
                    });
                }
                Err(e) => {
                    tracing::error!("rpc server: accept error: {}", e);
                    return;
                }
            }
        }
    }

    /// Serves a single already-accepted connection to completion.
    pub async fn serve_conn(&self, stream: TcpStream) {
        if let Err(e) = serve_stream(self.services.clone(), stream, Decoder::new()).await {
            tracing::debug!("rpc server: connection error: {}", e);
        }
    }

    pub(crate) fn services(&self) -> ServiceMap {
        self.services.clone()
    }
}

/// Resolves `"Service.Method"` against the service map.
///
/// Errors here are per-request: they travel back in the response header.
fn lookup(
    services: &ServiceMap,
    service_method: &str,
) -> Result<(Arc<Service>, String), String> {
    let dot = service_method
        .rfind('.')
        .ok_or_else(|| format!("rpc server: service/method request ill-formed: {service_method}"))?;
    let (service_name, method_name) = (&service_method[..dot], &service_method[dot + 1..]);

    let service = services
        .get(service_name)
        .map(|s| s.value().clone())
        .ok_or_else(|| format!("rpc server: can't find service {service_name}"))?;
    if service.method(method_name).is_none() {
        return Err(format!("rpc server: can't find method {method_name}"));
    }
    Ok((service, method_name.to_string()))
}

/// Reads the next frame payload, pulling from the socket as needed.
///
/// `Ok(None)` is a clean EOF between frames; EOF mid-frame is an error.
async fn next_frame(
    read_half: &mut OwnedReadHalf,
    decoder: &mut Decoder,
) -> Result<Option<Bytes>, ServerError> {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        if let Some(frame) = decoder.decode_frame()? {
            return Ok(Some(frame));
        }
        let n = read_half.read(&mut buf).await?;
        if n == 0 {
            return if decoder.buffered() == 0 {
                Ok(None)
            } else {
                Err(ServerError::UnexpectedEof)
            };
        }
        decoder.extend(&buf[..n]);
    }
}

/// Handshake + serve loop for one connection. `decoder` may carry bytes
/// over-read during an HTTP upgrade.
pub(crate) async fn serve_stream(
    services: ServiceMap,
    mut stream: TcpStream,
    mut decoder: Decoder,
) -> Result<(), ServerError> {
    // Handshake: one JSON line, read before the body format is known.
    let opts = {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        loop {
            match decoder.decode_options() {
                Ok(Some(opts)) => break opts,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("rpc server: options error: {}", e);
                    return Ok(());
                }
            }
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            decoder.extend(&buf[..n]);
        }
    };

    if opts.magic_number != MAGIC_NUMBER {
        tracing::warn!("rpc server: invalid magic number {:#x}", opts.magic_number);
        return Ok(());
    }
    let format = match WireFormat::from_tag(&opts.wire_format) {
        Some(f) => f,
        None => {
            tracing::warn!("rpc server: invalid wire format {:?}", opts.wire_format);
            return Ok(());
        }
    };

    serve_codec(services, stream, decoder, format, opts.handle_timeout()).await
}

/// Drives the request loop until EOF or a framing error, then drains
/// in-flight handlers and closes the write half.
async fn serve_codec(
    services: ServiceMap,
    stream: TcpStream,
    mut decoder: Decoder,
    format: WireFormat,
    handle_timeout: Duration,
) -> Result<(), ServerError> {
    let (mut read_half, write_half) = stream.into_split();
    let writer: SharedWriter = Arc::new(Mutex::new(write_half));
    let mut handlers = JoinSet::new();

    let exit = loop {
        let header_frame = match next_frame(&mut read_half, &mut decoder).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        };
        // A malformed header is a protocol error: drop the connection.
        let mut header: Header = match format.decode(&header_frame) {
            Ok(h) => h,
            Err(e) => break Err(e.into()),
        };

        // Every header is followed by exactly one body frame, even when
        // the lookup failed, so the stream stays aligned.
        let body = match next_frame(&mut read_half, &mut decoder).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break Err(ServerError::UnexpectedEof),
            Err(e) => break Err(e),
        };

        match lookup(&services, &header.service_method) {
            Ok((service, method)) => {
                handlers.spawn(handle_request(
                    service,
                    method,
                    header,
                    body,
                    format,
                    writer.clone(),
                    handle_timeout,
                ));
                // Reap finished handlers so the set stays bounded.
                while handlers.try_join_next().is_some() {}
            }
            Err(e) => {
                header.error = e;
                send_response(&writer, format, &header, &invalid_body(format)).await;
            }
        }
    };

    // Wait for in-flight handlers before closing the connection.
    while handlers.join_next().await.is_some() {}
    let _ = writer.lock().await.shutdown().await;
    exit
}

/// Handles one request, bounding the method call by `timeout`.
///
/// The method runs in its own task so a timeout abandons it (the eventual
/// reply is discarded) instead of cancelling it mid-flight. Two events are
/// distinguished: the call returning, and the response write completing;
/// the timer races only the first.
async fn handle_request(
    service: Arc<Service>,
    method: String,
    mut header: Header,
    body: Bytes,
    format: WireFormat,
    writer: SharedWriter,
    timeout: Duration,
) {
    let call = tokio::spawn(async move {
        match service.method(&method) {
            Some(m) => m.call(format, body).await,
            None => Err(format!("rpc server: can't find method {method}")),
        }
    });

    let joined = if timeout.is_zero() {
        call.await
    } else {
        match tokio::time::timeout(timeout, call).await {
            Ok(joined) => joined,
            Err(_) => {
                header.error =
                    format!("rpc server: request handle timeout: expect within {timeout:?}");
                send_response(&writer, format, &header, &invalid_body(format)).await;
                return;
            }
        }
    };

    match joined {
        Ok(Ok(reply)) => send_response(&writer, format, &header, &reply).await,
        Ok(Err(e)) => {
            header.error = e;
            send_response(&writer, format, &header, &invalid_body(format)).await;
        }
        Err(e) => {
            header.error = format!("rpc server: internal error: {e}");
            send_response(&writer, format, &header, &invalid_body(format)).await;
        }
    }
}

/// Placeholder body sent with error responses.
fn invalid_body(format: WireFormat) -> Vec<u8> {
    // Encoding the unit value cannot fail under either format.
    format.encode(&()).unwrap_or_default()
}

/// Writes one response (header frame, then body frame) under the send lock.
///
/// Write errors are logged only; the read loop notices the dead peer on
/// its side.
async fn send_response(writer: &SharedWriter, format: WireFormat, header: &Header, body: &[u8]) {
    let frames = format
        .encode(header)
        .map_err(ServerError::from)
        .and_then(|h| Ok((encode_frame(&h)?, encode_frame(body)?)));
    let (header_frame, body_frame) = match frames {
        Ok(frames) => frames,
        Err(e) => {
            tracing::error!("rpc server: encode response error: {}", e);
            return;
        }
    };

    let mut w = writer.lock().await;
    let result = async {
        w.write_all(&header_frame).await?;
        w.write_all(&body_frame).await?;
        w.flush().await
    }
    .await;
    if let Err(e) = result {
        tracing::debug!("rpc server: write response error: {}", e);
    }
}
