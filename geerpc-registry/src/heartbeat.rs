//! Heartbeat loop run by each RPC server.

use crate::error::RegistryError;
use crate::registry::DEFAULT_TIMEOUT;
use geerpc_protocol::SERVER_HEADER;
use std::time::Duration;

/// Safety margin subtracted from the registry TTL to pick the default
/// heartbeat period.
const PERIOD_MARGIN: Duration = Duration::from_secs(60);

/// POSTs `addr` to the registry immediately, then on every tick of
/// `period`, until a send fails. No reconnection is attempted; spawn the
/// loop again to resume heartbeating.
///
/// `period` defaults to the registry TTL minus one minute.
pub async fn heartbeat(registry_url: String, addr: String, period: Option<Duration>) {
    let period = period.unwrap_or(DEFAULT_TIMEOUT - PERIOD_MARGIN);
    let http = reqwest::Client::new();

    if let Err(e) = send_heartbeat(&http, &registry_url, &addr).await {
        tracing::error!("rpc server: heartbeat error: {}", e);
        return;
    }

    let mut ticker = tokio::time::interval(period);
    ticker.tick().await; // the first tick completes immediately
    loop {
        ticker.tick().await;
        if let Err(e) = send_heartbeat(&http, &registry_url, &addr).await {
            tracing::error!("rpc server: heartbeat error: {}", e);
            return;
        }
    }
}

async fn send_heartbeat(
    http: &reqwest::Client,
    registry_url: &str,
    addr: &str,
) -> Result<(), RegistryError> {
    tracing::debug!("{} sending heartbeat to {}", addr, registry_url);
    let response = http
        .post(registry_url)
        .header(SERVER_HEADER, addr)
        .send()
        .await
        .map_err(|e| RegistryError::Heartbeat(e.to_string()))?;

    if !response.status().is_success() {
        return Err(RegistryError::Heartbeat(format!(
            "registry answered {}",
            response.status()
        )));
    }
    Ok(())
}
