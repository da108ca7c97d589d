//! DNS seeding.
//!
//! When the host pool is empty the node has nobody to dial. The seeder
//! bootstraps it: one connect attempt per well-known seed hostname, all in
//! parallel. Whichever seed first hands over an `addr` payload completes
//! the bootstrap; dead seeds are tolerated as long as one answers.

use crate::{Connector, Hosts, Message, NetworkError, NetworkResult};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Well-known seed hostnames.
pub const DNS_SEEDS: &[&str] = &[
    "bitseed.xf2.org",
    "dnsseed.bluematt.me",
    "seed.bitcoin.sipa.be",
    "dnsseed.bitcoin.dashjr.org",
];

/// Bootstraps the host pool from DNS seeds.
pub struct Seeder {
    hosts: Arc<dyn Hosts>,
    connector: Arc<dyn Connector>,
    seeds: Vec<String>,
    port: u16,
}

impl Seeder {
    /// Create a seeder over the default seed list.
    pub fn new(hosts: Arc<dyn Hosts>, connector: Arc<dyn Connector>) -> Self {
        let seeds = DNS_SEEDS.iter().map(|seed| (*seed).to_string()).collect();
        Self::with_seeds(hosts, connector, seeds, crate::DEFAULT_PORT)
    }

    /// Create a seeder over a custom seed list.
    pub fn with_seeds(
        hosts: Arc<dyn Hosts>,
        connector: Arc<dyn Connector>,
        seeds: Vec<String>,
        port: u16,
    ) -> Self {
        Self {
            hosts,
            connector,
            seeds,
            port,
        }
    }

    /// Query every seed concurrently.
    ///
    /// Returns Ok as soon as one seed delivers addresses; the remaining
    /// attempts keep storing whatever they receive in the background. If
    /// every seed fails, the last failure is returned.
    pub async fn run(&self) -> NetworkResult<()> {
        let (result_tx, mut result_rx) = mpsc::channel(self.seeds.len().max(1));

        for hostname in &self.seeds {
            let hosts = Arc::clone(&self.hosts);
            let connector = Arc::clone(&self.connector);
            let hostname = hostname.clone();
            let port = self.port;
            let result_tx = result_tx.clone();
            tokio::spawn(async move {
                let result = seed_from(&*hosts, &*connector, &hostname, port).await;
                if let Err(ref e) = result {
                    warn!(seed = %hostname, error = %e, "Seed attempt failed");
                }
                let _ = result_tx.send(result).await;
            });
        }
        drop(result_tx);

        let mut last_error = None;
        while let Some(result) = result_rx.recv().await {
            match result {
                Ok(()) => return Ok(()),
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| NetworkError::ConnectionFailed("no seeds configured".to_string())))
    }
}

/// Pull addresses from one seed node into the host pool.
async fn seed_from(
    hosts: &dyn Hosts,
    connector: &dyn Connector,
    hostname: &str,
    port: u16,
) -> NetworkResult<()> {
    let channel = connector.connect(hostname, port).await?;
    channel.send(Message::GetAddress).await?;
    let packet = channel.recv_addresses().await?;

    info!(seed = %hostname, count = packet.addresses.len(), "Storing seeded addresses");
    for address in packet.addresses {
        if let Err(e) = hosts.store(address).await {
            warn!(seed = %hostname, error = %e, "Failed to store seeded address");
        }
    }
    Ok(())
}
