//! HTTP surface for the registry.
//!
//! Served at [`DEFAULT_REGISTRY_PATH`]:
//! - `GET` answers with the sorted alive set in the `X-Geerpc-Servers`
//!   header
//! - `POST` upserts the address carried in `X-Geerpc-Server`
//! - anything else is `405`

use crate::error::RegistryError;
use crate::registry::Registry;
use geerpc_protocol::{DEFAULT_REGISTRY_PATH, SERVERS_HEADER, SERVER_HEADER};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Runs the registry HTTP server until the shutdown signal fires.
pub async fn serve(
    listener: TcpListener,
    registry: Arc<Registry>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), RegistryError> {
    let addr = listener.local_addr()?;
    tracing::info!(
        "registry listening on http://{}{}",
        addr,
        DEFAULT_REGISTRY_PATH
    );

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        let registry = registry.clone();
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let registry = registry.clone();
                                async move { handle_request(req, registry) }
                            });
                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                tracing::debug!("registry connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("registry accept error: {}", e);
                    }
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("registry shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// Handles one registry request.
fn handle_request(
    req: Request<hyper::body::Incoming>,
    registry: Arc<Registry>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    if req.uri().path() != DEFAULT_REGISTRY_PATH {
        return Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::new()))
            .unwrap());
    }

    let response = if *req.method() == Method::GET {
        Response::builder()
            .status(StatusCode::OK)
            .header(SERVERS_HEADER, registry.alive_servers().join(","))
            .body(Full::new(Bytes::new()))
            .unwrap()
    } else if *req.method() == Method::POST {
        let addr = req
            .headers()
            .get(SERVER_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if addr.is_empty() {
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Full::new(Bytes::new()))
                .unwrap()
        } else {
            registry.put_server(addr);
            Response::builder()
                .status(StatusCode::OK)
                .body(Full::new(Bytes::new()))
                .unwrap()
        }
    } else {
        Response::builder()
            .status(StatusCode::METHOD_NOT_ALLOWED)
            .body(Full::new(Bytes::new()))
            .unwrap()
    };

    Ok(response)
}
