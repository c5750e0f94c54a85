//! Service discovery and selection policies.
//!
//! [`MultiServerDiscovery`] is the hand-maintained endpoint list;
//! [`RegistryDiscovery`] layers a registry fetch on top, refreshing the
//! list lazily from the registry's alive set.

use crate::error::ClientError;
use geerpc_protocol::SERVERS_HEADER;
use parking_lot::Mutex;
use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};

/// Load-balancing policy applied per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectMode {
    /// Uniformly random endpoint.
    Random,
    /// Endpoints in rotation, starting at a random offset.
    RoundRobin,
}

/// A source of server endpoints (`"protocol@address"` strings).
pub trait Discovery: Send + Sync + 'static {
    /// Re-fetches the endpoint set from its backing source, if any.
    fn refresh(&self) -> impl Future<Output = Result<(), ClientError>> + Send;

    /// Replaces the endpoint set.
    fn update(&self, servers: Vec<String>);

    /// Picks one endpoint under the given policy.
    fn get(&self, mode: SelectMode) -> impl Future<Output = Result<String, ClientError>> + Send;

    /// Returns the full endpoint set.
    fn get_all(&self) -> impl Future<Output = Result<Vec<String>, ClientError>> + Send;
}

struct Rotation {
    servers: Vec<String>,
    index: usize,
}

/// In-memory discovery over an explicit endpoint list.
pub struct MultiServerDiscovery {
    inner: Mutex<Rotation>,
}

impl MultiServerDiscovery {
    /// Builds a discovery over the given endpoints. The round-robin index
    /// starts at a random offset so fleets of clients don't herd onto the
    /// same server.
    pub fn new(servers: Vec<String>) -> Self {
        let index = rand::thread_rng().gen_range(0..u32::MAX) as usize;
        Self {
            inner: Mutex::new(Rotation { servers, index }),
        }
    }

    fn select(&self, mode: SelectMode) -> Result<String, ClientError> {
        let mut inner = self.inner.lock();
        let n = inner.servers.len();
        if n == 0 {
            return Err(ClientError::NoAvailableServers);
        }
        match mode {
            SelectMode::Random => {
                let i = rand::thread_rng().gen_range(0..n);
                Ok(inner.servers[i].clone())
            }
            SelectMode::RoundRobin => {
                let server = inner.servers[inner.index % n].clone();
                inner.index = (inner.index + 1) % n;
                Ok(server)
            }
        }
    }

    fn snapshot(&self) -> Vec<String> {
        self.inner.lock().servers.clone()
    }
}

impl Discovery for MultiServerDiscovery {
    async fn refresh(&self) -> Result<(), ClientError> {
        // Nothing to refresh from: the list is maintained by hand.
        Ok(())
    }

    fn update(&self, servers: Vec<String>) {
        self.inner.lock().servers = servers;
    }

    async fn get(&self, mode: SelectMode) -> Result<String, ClientError> {
        self.select(mode)
    }

    async fn get_all(&self) -> Result<Vec<String>, ClientError> {
        Ok(self.snapshot())
    }
}

/// Default interval between registry fetches.
const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(10);

/// Discovery backed by a geerpc registry.
///
/// The endpoint list is refreshed from the registry's `GET` surface when
/// it is older than the update interval; selection itself is delegated to
/// an inner [`MultiServerDiscovery`].
pub struct RegistryDiscovery {
    multi: MultiServerDiscovery,
    registry_url: String,
    update_interval: Duration,
    http: reqwest::Client,
    last_update: Mutex<Option<Instant>>,
}

impl RegistryDiscovery {
    /// `registry_url` is the full URL of the registry endpoint, e.g.
    /// `http://127.0.0.1:9999/_geerpc_/registry`.
    pub fn new(registry_url: impl Into<String>, update_interval: Option<Duration>) -> Self {
        Self {
            multi: MultiServerDiscovery::new(Vec::new()),
            registry_url: registry_url.into(),
            update_interval: update_interval.unwrap_or(DEFAULT_UPDATE_INTERVAL),
            http: reqwest::Client::new(),
            last_update: Mutex::new(None),
        }
    }

    async fn ensure_fresh(&self) -> Result<(), ClientError> {
        let fresh = self
            .last_update
            .lock()
            .is_some_and(|at| at.elapsed() < self.update_interval);
        if fresh {
            return Ok(());
        }
        Discovery::refresh(self).await
    }
}

impl Discovery for RegistryDiscovery {
    async fn refresh(&self) -> Result<(), ClientError> {
        tracing::debug!("rpc discovery: refreshing from {}", self.registry_url);
        let response = self
            .http
            .get(&self.registry_url)
            .send()
            .await
            .map_err(|e| ClientError::Registry(e.to_string()))?;

        let servers = response
            .headers()
            .get(SERVERS_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        self.multi.update(servers);
        *self.last_update.lock() = Some(Instant::now());
        Ok(())
    }

    fn update(&self, servers: Vec<String>) {
        self.multi.update(servers);
        *self.last_update.lock() = Some(Instant::now());
    }

    async fn get(&self, mode: SelectMode) -> Result<String, ClientError> {
        self.ensure_fresh().await?;
        self.multi.select(mode)
    }

    async fn get_all(&self) -> Result<Vec<String>, ClientError> {
        self.ensure_fresh().await?;
        Ok(self.multi.snapshot())
    }
}
