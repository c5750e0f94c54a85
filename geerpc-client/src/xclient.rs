//! Load-balanced meta-client.
//!
//! An [`XClient`] fans calls out across a [`Discovery`] under a selection
//! policy, caching one [`Client`] per endpoint and redialing endpoints
//! whose cached client went unavailable.

use crate::client::Client;
use crate::discovery::{Discovery, SelectMode};
use crate::error::ClientError;
use geerpc_protocol::ConnectOptions;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinSet;

type ClientCache = Arc<Mutex<HashMap<String, Arc<Client>>>>;

/// Meta-client over a discovery source.
pub struct XClient<D: Discovery> {
    discovery: D,
    mode: SelectMode,
    opts: Option<ConnectOptions>,
    clients: ClientCache,
}

impl<D: Discovery> XClient<D> {
    pub fn new(discovery: D, mode: SelectMode, opts: Option<ConnectOptions>) -> Self {
        Self {
            discovery,
            mode,
            opts,
            clients: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn discovery(&self) -> &D {
        &self.discovery
    }

    /// Calls the method on one endpoint picked by the selection policy.
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<R, ClientError>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let rpc_addr = self.discovery.get(self.mode).await?;
        let client = dial_cached(&self.clients, &self.opts, &rpc_addr).await?;
        client.call(service_method, args).await
    }

    /// Invokes the method concurrently on every discovered endpoint.
    ///
    /// Every endpoint is issued the call. The first successful reply is
    /// retained (later successes are ignored); the first error cancels
    /// the siblings' reply-waits and is returned once every peer has
    /// completed. Sends are never interrupted mid-frame: cancellation
    /// only short-circuits the wait for a response.
    pub async fn broadcast<A, R>(&self, service_method: &str, args: &A) -> Result<R, ClientError>
    where
        A: Serialize + Clone + Send + Sync + 'static,
        R: DeserializeOwned + Send + 'static,
    {
        let servers = self.discovery.get_all().await?;
        if servers.is_empty() {
            return Err(ClientError::NoAvailableServers);
        }

        let (cancel_tx, _) = broadcast::channel::<()>(1);
        let mut tasks = JoinSet::new();

        for rpc_addr in servers {
            let clients = self.clients.clone();
            let opts = self.opts.clone();
            let service_method = service_method.to_string();
            let args = args.clone();
            let mut cancel_rx = cancel_tx.subscribe();

            tasks.spawn(async move {
                let client = dial_cached(&clients, &opts, &rpc_addr).await?;
                let call = client.go::<A, R>(&service_method, &args).await;
                tokio::select! {
                    result = call.recv() => result,
                    _ = cancel_rx.recv() => {
                        Err(ClientError::CallFailed("broadcast cancelled".to_string()))
                    }
                }
            });
        }

        let mut first_reply: Option<R> = None;
        let mut first_error: Option<ClientError> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(reply)) => {
                    if first_reply.is_none() {
                        first_reply = Some(reply);
                    }
                }
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                        let _ = cancel_tx.send(());
                    }
                }
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(ClientError::CallFailed(e.to_string()));
                        let _ = cancel_tx.send(());
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            // Non-empty server list and no error implies a reply arrived.
            None => first_reply.ok_or(ClientError::NoAvailableServers),
        }
    }

    /// Closes every cached client.
    pub async fn close(&self) {
        let mut clients = self.clients.lock().await;
        for (_, client) in clients.drain() {
            let _ = client.close().await;
        }
    }
}

/// Returns the cached client for an endpoint, redialing when the cached
/// one is unavailable.
async fn dial_cached(
    clients: &Mutex<HashMap<String, Arc<Client>>>,
    opts: &Option<ConnectOptions>,
    rpc_addr: &str,
) -> Result<Arc<Client>, ClientError> {
    let mut clients = clients.lock().await;

    if let Some(client) = clients.get(rpc_addr) {
        if client.is_available() {
            return Ok(client.clone());
        }
    }
    // Evict a stale entry, if any, before redialing.
    if let Some(stale) = clients.remove(rpc_addr) {
        let _ = stale.close().await;
    }

    let client = Arc::new(Client::xdial(rpc_addr, opts.clone()).await?);
    clients.insert(rpc_addr.to_string(), client.clone());
    Ok(client)
}
