//! Registry state: addresses with heartbeat timestamps.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Default TTL for a registered server.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Tracks live servers by heartbeat.
///
/// An entry is alive iff its last heartbeat is within `timeout`, or
/// `timeout` is zero (no expiry). Dead entries are evicted lazily when
/// the alive set is read.
pub struct Registry {
    timeout: Duration,
    servers: Mutex<HashMap<String, Instant>>,
}

impl Registry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            servers: Mutex::new(HashMap::new()),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Upserts a server, stamping its heartbeat with the current time.
    pub fn put_server(&self, addr: &str) {
        tracing::debug!("registry: heartbeat from {}", addr);
        self.servers
            .lock()
            .insert(addr.to_string(), Instant::now());
    }

    /// Returns the alive addresses, lexicographically sorted, evicting
    /// everything stale.
    pub fn alive_servers(&self) -> Vec<String> {
        let mut servers = self.servers.lock();
        let timeout = self.timeout;
        servers.retain(|addr, heartbeat| {
            let alive = timeout.is_zero() || heartbeat.elapsed() <= timeout;
            if !alive {
                tracing::info!("registry: evicting dead server {}", addr);
            }
            alive
        });

        let mut alive: Vec<String> = servers.keys().cloned().collect();
        alive.sort();
        alive
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}
