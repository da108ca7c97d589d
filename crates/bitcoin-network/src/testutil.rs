//! Scriptable collaborator mocks shared by the crate's tests.

use crate::{
    Acceptor, AddressPacket, Channel, ChannelDriver, Connector, Hosts, NetworkAddress,
    NetworkError, NetworkResult,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// Shorthand for an IPv4-mapped test address.
pub fn addr(a: u8, b: u8, c: u8, d: u8, port: u16) -> NetworkAddress {
    NetworkAddress::from_v4(Ipv4Addr::new(a, b, c, d), port)
}

/// Poll until `predicate` holds, panicking after a couple of seconds.
pub async fn wait_for<F: FnMut() -> bool>(mut predicate: F) {
    for _ in 0..400 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

/// In-memory host store with scripted draws and failure switches.
pub struct ScriptedHosts {
    count: usize,
    stored: Mutex<Vec<NetworkAddress>>,
    fetch_queue: Mutex<VecDeque<NetworkAddress>>,
    fetch_calls: AtomicUsize,
    load_calls: AtomicUsize,
    save_calls: AtomicUsize,
    saved_paths: Mutex<Vec<PathBuf>>,
    fail_load: AtomicBool,
    fail_save: AtomicBool,
}

impl ScriptedHosts {
    /// A store whose `fetch_count` reports `count` known hosts.
    pub fn new(count: usize) -> Self {
        Self {
            count,
            stored: Mutex::new(Vec::new()),
            fetch_queue: Mutex::new(VecDeque::new()),
            fetch_calls: AtomicUsize::new(0),
            load_calls: AtomicUsize::new(0),
            save_calls: AtomicUsize::new(0),
            saved_paths: Mutex::new(Vec::new()),
            fail_load: AtomicBool::new(false),
            fail_save: AtomicBool::new(false),
        }
    }

    /// Queue addresses for `fetch_address` to hand out in order. Once the
    /// queue is drained, draws fail with `HostsEmpty`.
    pub fn queue_addresses(&self, addresses: impl IntoIterator<Item = NetworkAddress>) {
        self.fetch_queue.lock().extend(addresses);
    }

    /// Addresses handed to `store` so far.
    pub fn stored(&self) -> Vec<NetworkAddress> {
        self.stored.lock().clone()
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }

    pub fn save_calls(&self) -> usize {
        self.save_calls.load(Ordering::SeqCst)
    }

    pub fn saved_paths(&self) -> Vec<PathBuf> {
        self.saved_paths.lock().clone()
    }

    pub fn set_fail_load(&self, fail: bool) {
        self.fail_load.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_save(&self, fail: bool) {
        self.fail_save.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Hosts for ScriptedHosts {
    async fn load(&self, _path: &Path) -> NetworkResult<()> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(NetworkError::Io(io::Error::new(
                io::ErrorKind::Other,
                "scripted load failure",
            )));
        }
        Ok(())
    }

    async fn save(&self, path: &Path) -> NetworkResult<()> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        self.saved_paths.lock().push(path.to_path_buf());
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(NetworkError::Io(io::Error::new(
                io::ErrorKind::Other,
                "scripted save failure",
            )));
        }
        Ok(())
    }

    async fn store(&self, address: NetworkAddress) -> NetworkResult<()> {
        self.stored.lock().push(address);
        Ok(())
    }

    async fn fetch_count(&self) -> NetworkResult<usize> {
        Ok(self.count)
    }

    async fn fetch_address(&self) -> NetworkResult<NetworkAddress> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.fetch_queue
            .lock()
            .pop_front()
            .ok_or(NetworkError::HostsEmpty)
    }
}

/// What a scripted connect attempt should do.
pub enum ConnectScript {
    /// Refuse the connection.
    Fail,
    /// Hand back a channel and keep its driver for the test to script.
    Open,
    /// Hand back a channel that answers the first `getaddr` with addresses.
    ServeAddresses(Vec<NetworkAddress>),
    /// Like `ServeAddresses`, but delay the payload.
    ServeAddressesAfter(Vec<NetworkAddress>, Duration),
}

/// Scriptable connector. Unscripted hosts get a plain open channel.
pub struct ScriptedConnector {
    fail_start: AtomicBool,
    scripts: Mutex<HashMap<String, VecDeque<ConnectScript>>>,
    connects: Mutex<Vec<(String, u16)>>,
    drivers: Mutex<Vec<(String, ChannelDriver)>>,
    listens: Mutex<Vec<u16>>,
    inbound_tx: mpsc::Sender<Channel>,
    accept_rx: Mutex<Option<mpsc::Receiver<Channel>>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        let (inbound_tx, accept_rx) = mpsc::channel(16);
        Self {
            fail_start: AtomicBool::new(false),
            scripts: Mutex::new(HashMap::new()),
            connects: Mutex::new(Vec::new()),
            drivers: Mutex::new(Vec::new()),
            listens: Mutex::new(Vec::new()),
            inbound_tx,
            accept_rx: Mutex::new(Some(accept_rx)),
        }
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    /// Queue a script for the next connect attempt against `host`.
    pub fn script(&self, host: &str, script: ConnectScript) {
        self.scripts
            .lock()
            .entry(host.to_string())
            .or_default()
            .push_back(script);
    }

    /// Every `(host, port)` dialed so far.
    pub fn connects(&self) -> Vec<(String, u16)> {
        self.connects.lock().clone()
    }

    /// Take the retained driver for a channel opened against `host`.
    pub fn take_driver(&self, host: &str) -> Option<ChannelDriver> {
        let mut drivers = self.drivers.lock();
        let index = drivers.iter().position(|(dialed, _)| dialed == host)?;
        Some(drivers.remove(index).1)
    }

    /// Feed for inbound channels handed out by the acceptor.
    pub fn inbound_sender(&self) -> mpsc::Sender<Channel> {
        self.inbound_tx.clone()
    }

    /// Ports passed to `listen` so far.
    pub fn listens(&self) -> Vec<u16> {
        self.listens.lock().clone()
    }
}

impl Default for ScriptedConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn start(&self) -> NetworkResult<()> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(NetworkError::HandshakeFailed(
                "scripted start failure".to_string(),
            ));
        }
        Ok(())
    }

    async fn connect(&self, host: &str, port: u16) -> NetworkResult<Channel> {
        self.connects.lock().push((host.to_string(), port));

        let script = self
            .scripts
            .lock()
            .get_mut(host)
            .and_then(VecDeque::pop_front)
            .unwrap_or(ConnectScript::Open);

        match script {
            ConnectScript::Fail => Err(NetworkError::ConnectionFailed(format!(
                "scripted failure for {host}"
            ))),
            ConnectScript::Open => {
                let (channel, driver) = Channel::open();
                self.drivers.lock().push((host.to_string(), driver));
                Ok(channel)
            }
            ConnectScript::ServeAddresses(addresses) => {
                Ok(serve_addresses(addresses, Duration::ZERO))
            }
            ConnectScript::ServeAddressesAfter(addresses, delay) => {
                Ok(serve_addresses(addresses, delay))
            }
        }
    }

    async fn listen(&self, port: u16) -> NetworkResult<Box<dyn Acceptor>> {
        self.listens.lock().push(port);
        let inbound = self
            .accept_rx
            .lock()
            .take()
            .ok_or_else(|| NetworkError::AcceptFailed("already listening".to_string()))?;
        Ok(Box::new(ScriptedAcceptor {
            inbound: tokio::sync::Mutex::new(inbound),
        }))
    }
}

/// Open a channel whose driver answers the first `getaddr` with `addresses`.
fn serve_addresses(addresses: Vec<NetworkAddress>, delay: Duration) -> Channel {
    let (channel, mut driver) = Channel::open();
    tokio::spawn(async move {
        if driver.outgoing.recv().await.is_some() {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let _ = driver.addresses.send(AddressPacket { addresses }).await;
        }
    });
    channel
}

/// Acceptor handing out channels pushed by the test.
pub struct ScriptedAcceptor {
    inbound: tokio::sync::Mutex<mpsc::Receiver<Channel>>,
}

#[async_trait]
impl Acceptor for ScriptedAcceptor {
    async fn accept(&self) -> NetworkResult<Channel> {
        self.inbound
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| NetworkError::AcceptFailed("listener closed".to_string()))
    }
}
