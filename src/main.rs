//! geerpc demo: a registry, two heartbeating servers, and a
//! load-balanced client driving calls and a broadcast.

use geerpc_client::{RegistryDiscovery, SelectMode, XClient};
use geerpc_protocol::DEFAULT_REGISTRY_PATH;
use geerpc_registry::Registry;
use geerpc_server::{Server, Service};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Args {
    num1: i32,
    num2: i32,
}

/// Starts one RPC server on an ephemeral port, heartbeating into the
/// registry. Returns its `protocol@address`.
async fn start_server(registry_url: String) -> Result<String, Box<dyn std::error::Error>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let server = Server::new();
    server.register(
        Service::builder("Foo")
            .method("Sum", |args: Args| async move { Ok(args.num1 + args.num2) })
            .method("Sleep", |args: Args| async move {
                tokio::time::sleep(Duration::from_secs(args.num1.max(0) as u64)).await;
                Ok(args.num1 + args.num2)
            })
            .build()?,
    )?;

    let rpc_addr = format!("tcp@{addr}");
    tokio::spawn(geerpc_registry::heartbeat(
        registry_url,
        rpc_addr.clone(),
        Some(Duration::from_secs(30)),
    ));
    tokio::spawn(async move { server.accept(listener).await });
    Ok(rpc_addr)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Registry first, so the servers have somewhere to heartbeat.
    let registry_listener = TcpListener::bind("127.0.0.1:0").await?;
    let registry_url = format!(
        "http://{}{}",
        registry_listener.local_addr()?,
        DEFAULT_REGISTRY_PATH
    );
    let (shutdown_tx, _) = broadcast::channel(1);
    tokio::spawn(geerpc_registry::serve(
        registry_listener,
        Arc::new(Registry::default()),
        shutdown_tx.subscribe(),
    ));

    start_server(registry_url.clone()).await?;
    start_server(registry_url.clone()).await?;

    // Give the initial heartbeats a moment to land.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let discovery = RegistryDiscovery::new(registry_url, None);
    let xc = XClient::new(discovery, SelectMode::RoundRobin, None);

    for i in 0..5 {
        let args = Args { num1: i, num2: i * i };
        match xc.call::<_, i32>("Foo.Sum", &args).await {
            Ok(reply) => {
                tracing::info!("call Foo.Sum success: {} + {} = {}", args.num1, args.num2, reply)
            }
            Err(e) => tracing::error!("call Foo.Sum error: {}", e),
        }
    }

    let args = Args { num1: 3, num2: 9 };
    match xc.broadcast::<_, i32>("Foo.Sum", &args).await {
        Ok(reply) => tracing::info!("broadcast Foo.Sum success: {}", reply),
        Err(e) => tracing::error!("broadcast Foo.Sum error: {}", e),
    }

    xc.close().await;
    let _ = shutdown_tx.send(());
    Ok(())
}
