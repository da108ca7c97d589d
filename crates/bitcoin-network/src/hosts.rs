//! Host address pool.
//!
//! The pool is the node's persistent memory of peers: loaded at startup,
//! drawn from at random to fill outbound slots, topped up by address
//! gossip, and saved back on shutdown. Persistence is a JSON file written
//! atomically (temp file, then rename).

use crate::{NetworkAddress, NetworkError, NetworkResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use std::io;
use std::path::Path;
use tracing::{debug, info};

/// Maximum entries kept in the pool.
const DEFAULT_CAPACITY: usize = 1000;

/// Contract for the persistent host store.
#[async_trait]
pub trait Hosts: Send + Sync {
    /// Load the pool from disk. A missing file leaves the pool empty.
    async fn load(&self, path: &Path) -> NetworkResult<()>;

    /// Persist the pool to disk.
    async fn save(&self, path: &Path) -> NetworkResult<()>;

    /// Insert an address. Duplicates are ignored.
    async fn store(&self, address: NetworkAddress) -> NetworkResult<()>;

    /// Number of known addresses.
    async fn fetch_count(&self) -> NetworkResult<usize>;

    /// Draw a random address. Fails on an empty pool.
    async fn fetch_address(&self) -> NetworkResult<NetworkAddress>;
}

/// File-backed host pool with bounded capacity.
///
/// Entries are deduplicated by `(ip, port)`. When the pool is full the
/// oldest entry is evicted first.
pub struct HostPool {
    entries: RwLock<Vec<NetworkAddress>>,
    capacity: usize,
}

impl HostPool {
    /// Create an empty pool with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create an empty pool holding at most `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            capacity,
        }
    }

    /// Insert an address, returning whether it was new.
    fn insert(&self, address: NetworkAddress) -> bool {
        let mut entries = self.entries.write();
        if entries.iter().any(|known| *known == address) {
            return false;
        }
        if entries.len() == self.capacity {
            entries.remove(0);
        }
        entries.push(address);
        true
    }
}

impl Default for HostPool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Hosts for HostPool {
    async fn load(&self, path: &Path) -> NetworkResult<()> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = ?path, "No hosts file, starting with an empty pool");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let loaded: Vec<NetworkAddress> = serde_json::from_str(&content)
            .map_err(|e| NetworkError::Serialization(e.to_string()))?;

        self.entries.write().clear();
        for address in loaded {
            self.insert(address);
        }

        info!(count = self.entries.read().len(), "Loaded hosts");
        Ok(())
    }

    async fn save(&self, path: &Path) -> NetworkResult<()> {
        let entries = self.entries.read().clone();
        let json = serde_json::to_string_pretty(&entries)
            .map_err(|e| NetworkError::Serialization(e.to_string()))?;

        // Write to a temp file and rename so a crash mid-write cannot
        // corrupt the hosts file.
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;

        debug!(count = entries.len(), path = ?path, "Saved hosts");
        Ok(())
    }

    async fn store(&self, address: NetworkAddress) -> NetworkResult<()> {
        if self.insert(address.clone()) {
            debug!(address = %address, "Stored host");
        }
        Ok(())
    }

    async fn fetch_count(&self) -> NetworkResult<usize> {
        Ok(self.entries.read().len())
    }

    async fn fetch_address(&self) -> NetworkResult<NetworkAddress> {
        let entries = self.entries.read();
        if entries.is_empty() {
            return Err(NetworkError::HostsEmpty);
        }
        let index = rand::thread_rng().gen_range(0..entries.len());
        Ok(entries[index].clone())
    }
}
