//! Connection orchestration.
//!
//! The protocol keeps the node's peer population healthy. It loads the
//! host pool at startup (seeding it from DNS when empty), keeps up to
//! `max_outbound` outbound channels live by drawing random addresses,
//! registers inbound channels, gossips `getaddr`/`addr` with every peer,
//! and fans newly established channels out to subscribers.
//!
//! All mutable state lives inside a single event-loop task. Handlers
//! running elsewhere re-enter it by posting events; I/O never runs on the
//! loop itself.

use crate::seeder::{Seeder, DNS_SEEDS};
use crate::subscriber::ChannelSubscribers;
use crate::{
    AddressPacket, Channel, ChannelId, Connector, Hosts, Message, NetworkAddress, NetworkError,
    NetworkResult, DEFAULT_HOSTS_FILENAME, DEFAULT_MAX_OUTBOUND, DEFAULT_PORT,
};
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Buffered events for the protocol loop.
const EVENT_CAPACITY: usize = 100;

/// Protocol configuration.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Path of the persisted host pool.
    pub hosts_filename: PathBuf,
    /// Target number of outbound connections.
    pub max_outbound: usize,
    /// Port to accept inbound connections on.
    pub listen_port: u16,
    /// Seed hostnames for cold start.
    pub seeds: Vec<String>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            hosts_filename: PathBuf::from(DEFAULT_HOSTS_FILENAME),
            max_outbound: DEFAULT_MAX_OUTBOUND,
            listen_port: DEFAULT_PORT,
            seeds: DNS_SEEDS.iter().map(|seed| (*seed).to_string()).collect(),
        }
    }
}

/// Protocol lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    /// Created, not yet started.
    Idle,
    /// Startup paths in flight.
    Starting,
    /// Maintaining connections.
    Running,
    /// Persisting state on the way down.
    Stopping,
    /// Terminal.
    Stopped,
}

/// An outbound connection and the address it was dialed at.
struct ConnectionInfo {
    address: NetworkAddress,
    channel: Channel,
}

/// Events posted into the protocol loop.
enum ProtocolEvent {
    /// Both startup paths succeeded; begin connecting and listening.
    Run,
    /// A host pool draw finished.
    AddressFetched(NetworkResult<NetworkAddress>),
    /// An outbound dial finished.
    Connected {
        address: NetworkAddress,
        result: NetworkResult<Channel>,
    },
    /// An inbound channel arrived.
    Accepted(Channel),
    /// A channel terminated.
    ChannelStopped(ChannelId),
    /// A peer sent addresses.
    AddressesReceived(AddressPacket),
    /// Register a subscriber for the next channel.
    Subscribe(oneshot::Sender<Channel>),
    /// Report the outbound connection count.
    FetchConnectionCount(oneshot::Sender<usize>),
    /// Persist the host pool and quiesce.
    Stop(oneshot::Sender<NetworkResult<()>>),
}

/// Connection orchestrator.
///
/// Must be created from within a Tokio runtime: construction spawns the
/// protocol's event loop.
pub struct Protocol {
    hosts: Arc<dyn Hosts>,
    connector: Arc<dyn Connector>,
    config: ProtocolConfig,
    events: mpsc::Sender<ProtocolEvent>,
    state: Arc<RwLock<ProtocolState>>,
}

impl Protocol {
    /// Create a protocol over the given collaborators.
    pub fn new(config: ProtocolConfig, hosts: Arc<dyn Hosts>, connector: Arc<dyn Connector>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let state = Arc::new(RwLock::new(ProtocolState::Idle));

        let event_loop = EventLoop {
            config: config.clone(),
            hosts: Arc::clone(&hosts),
            connector: Arc::clone(&connector),
            events: events_tx.clone(),
            outbound: Vec::new(),
            inbound: Vec::new(),
            subscribers: ChannelSubscribers::new(),
            shutdown: CancellationToken::new(),
        };
        tokio::spawn(event_loop.run(events_rx));

        Self {
            hosts,
            connector,
            config,
            events: events_tx,
            state,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ProtocolState {
        *self.state.read()
    }

    /// Start the protocol.
    ///
    /// Bootstrap (host pool load, DNS seeding when the pool is empty) and
    /// the handshake-service start run concurrently; this returns once both
    /// succeed. The first failure is returned immediately and connection
    /// maintenance never begins.
    pub async fn start(&self) -> NetworkResult<()> {
        {
            let mut state = self.state.write();
            if *state != ProtocolState::Idle {
                return Err(NetworkError::AlreadyStarted);
            }
            *state = ProtocolState::Starting;
        }

        let (done_tx, done_rx) = oneshot::channel();
        let completion = Arc::new(Mutex::new(Some(done_tx)));
        let finished_paths = Arc::new(AtomicUsize::new(0));

        // Bootstrap path.
        {
            let hosts = Arc::clone(&self.hosts);
            let connector = Arc::clone(&self.connector);
            let config = self.config.clone();
            let events = self.events.clone();
            let completion = Arc::clone(&completion);
            let finished_paths = Arc::clone(&finished_paths);
            tokio::spawn(async move {
                let result = bootstrap(hosts, connector, &config).await;
                if let Err(ref e) = result {
                    error!(error = %e, "Failed to bootstrap");
                }
                settle_start_path(result, &finished_paths, &completion, &events).await;
            });
        }

        // Handshake-service path.
        {
            let connector = Arc::clone(&self.connector);
            let events = self.events.clone();
            let completion = Arc::clone(&completion);
            let finished_paths = Arc::clone(&finished_paths);
            tokio::spawn(async move {
                let result = connector.start().await;
                if let Err(ref e) = result {
                    error!(error = %e, "Failed to start handshake service");
                }
                settle_start_path(result, &finished_paths, &completion, &events).await;
            });
        }

        let result = match done_rx.await {
            Ok(result) => result,
            Err(_) => Err(NetworkError::Stopped),
        };
        *self.state.write() = match result {
            Ok(()) => ProtocolState::Running,
            Err(_) => ProtocolState::Stopped,
        };
        result
    }

    /// Stop the protocol, persisting the host pool.
    ///
    /// A save failure aborts the stop and is returned to the caller; the
    /// protocol keeps running in that case.
    pub async fn stop(&self) -> NetworkResult<()> {
        let previous = {
            let mut state = self.state.write();
            let previous = *state;
            *state = ProtocolState::Stopping;
            previous
        };

        let (done_tx, done_rx) = oneshot::channel();
        let result = match self.events.send(ProtocolEvent::Stop(done_tx)).await {
            Ok(()) => match done_rx.await {
                Ok(result) => result,
                Err(_) => Err(NetworkError::Stopped),
            },
            Err(_) => Err(NetworkError::Stopped),
        };

        *self.state.write() = match &result {
            Ok(()) => ProtocolState::Stopped,
            // The loop is already gone; nothing left to keep running.
            Err(NetworkError::Stopped) => ProtocolState::Stopped,
            Err(_) => previous,
        };
        result
    }

    /// Number of live outbound connections. Inbound channels are not
    /// counted.
    pub async fn connection_count(&self) -> NetworkResult<usize> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.events
            .send(ProtocolEvent::FetchConnectionCount(reply_tx))
            .await
            .map_err(|_| NetworkError::Stopped)?;
        reply_rx.await.map_err(|_| NetworkError::Stopped)
    }

    /// Subscribe to the next channel the protocol sets up.
    ///
    /// One-shot: the returned receiver resolves with the next relayed
    /// channel and never fires again.
    pub async fn subscribe_channel(&self) -> NetworkResult<oneshot::Receiver<Channel>> {
        let (subscriber_tx, subscriber_rx) = oneshot::channel();
        self.events
            .send(ProtocolEvent::Subscribe(subscriber_tx))
            .await
            .map_err(|_| NetworkError::Stopped)?;
        Ok(subscriber_rx)
    }
}

/// Load the host pool and seed it from DNS when empty.
async fn bootstrap(
    hosts: Arc<dyn Hosts>,
    connector: Arc<dyn Connector>,
    config: &ProtocolConfig,
) -> NetworkResult<()> {
    if let Err(e) = hosts.load(&config.hosts_filename).await {
        error!(file = ?config.hosts_filename, error = %e, "Could not load hosts file");
        return Err(e);
    }

    let count = match hosts.fetch_count().await {
        Ok(count) => count,
        Err(e) => {
            error!(error = %e, "Unable to check hosts empty");
            return Err(e);
        }
    };

    if count == 0 {
        info!("Host pool empty, seeding from DNS");
        let seeder = Seeder::with_seeds(hosts, connector, config.seeds.clone(), DEFAULT_PORT);
        seeder.run().await
    } else {
        debug!(count, "Host pool already populated");
        Ok(())
    }
}

/// Settle one of the two startup paths.
///
/// The paths complete on unrelated tasks, so successes are counted with an
/// atomic: the second success fires completion and starts the run loop.
/// The completion slot is taken at most once, which also makes the first
/// failure win over anything that settles later.
async fn settle_start_path(
    result: NetworkResult<()>,
    finished_paths: &AtomicUsize,
    completion: &Mutex<Option<oneshot::Sender<NetworkResult<()>>>>,
    events: &mpsc::Sender<ProtocolEvent>,
) {
    match result {
        Ok(()) => {
            if finished_paths.fetch_add(1, Ordering::SeqCst) + 1 < 2 {
                return;
            }
            let done = completion.lock().take();
            if let Some(done) = done {
                let _ = done.send(Ok(()));
                let _ = events.send(ProtocolEvent::Run).await;
            }
        }
        Err(e) => {
            let done = completion.lock().take();
            if let Some(done) = done {
                let _ = done.send(Err(e));
            }
        }
    }
}

/// Owns all mutable protocol state; everything else posts events in.
struct EventLoop {
    config: ProtocolConfig,
    hosts: Arc<dyn Hosts>,
    connector: Arc<dyn Connector>,
    events: mpsc::Sender<ProtocolEvent>,
    outbound: Vec<ConnectionInfo>,
    inbound: Vec<Channel>,
    subscribers: ChannelSubscribers,
    shutdown: CancellationToken,
}

impl EventLoop {
    async fn run(mut self, mut events: mpsc::Receiver<ProtocolEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                ProtocolEvent::Run => self.handle_run(),
                ProtocolEvent::AddressFetched(result) => self.attempt_connect(result),
                ProtocolEvent::Connected { address, result } => {
                    self.handle_connect(address, result)
                }
                ProtocolEvent::Accepted(channel) => self.handle_accept(channel),
                ProtocolEvent::ChannelStopped(id) => self.channel_stopped(id),
                ProtocolEvent::AddressesReceived(packet) => self.store_addresses(packet),
                ProtocolEvent::Subscribe(subscriber) => self.subscribers.subscribe(subscriber),
                ProtocolEvent::FetchConnectionCount(reply) => {
                    let _ = reply.send(self.outbound.len());
                }
                ProtocolEvent::Stop(reply) => {
                    if self.handle_stop(reply).await {
                        break;
                    }
                }
            }
        }
        // Tear down the listener; peer channels terminate on their own.
        self.shutdown.cancel();
    }

    /// Begin maintaining connections and listening for inbound peers.
    fn handle_run(&mut self) {
        self.try_connect();
        self.spawn_listener();
    }

    /// Issue one host pool draw per vacant outbound slot.
    fn try_connect(&mut self) {
        if self.outbound.len() >= self.config.max_outbound {
            return;
        }
        for _ in self.outbound.len()..self.config.max_outbound {
            let hosts = Arc::clone(&self.hosts);
            let events = self.events.clone();
            tokio::spawn(async move {
                let result = hosts.fetch_address().await;
                let _ = events.send(ProtocolEvent::AddressFetched(result)).await;
            });
        }
    }

    /// Dial a drawn address unless it is already connected.
    fn attempt_connect(&mut self, result: NetworkResult<NetworkAddress>) {
        let address = match result {
            Ok(address) => address,
            Err(e) => {
                warn!(error = %e, "Problem fetching random address");
                return;
            }
        };

        if self
            .outbound
            .iter()
            .any(|connection| connection.address == address)
        {
            info!(address = %address, "Already connected");
            self.try_connect();
            return;
        }

        info!(address = %address, "Trying peer");
        let connector = Arc::clone(&self.connector);
        let events = self.events.clone();
        tokio::spawn(async move {
            let host = address.host();
            let result = connector.connect(&host, address.port).await;
            let _ = events.send(ProtocolEvent::Connected { address, result }).await;
        });
    }

    /// Record the outcome of an outbound dial.
    fn handle_connect(&mut self, address: NetworkAddress, result: NetworkResult<Channel>) {
        let channel = match result {
            Ok(channel) => channel,
            Err(e) => {
                info!(address = %address, error = %e, "Unable to connect");
                self.try_connect();
                return;
            }
        };

        // In-flight dials may race for the last slot or the same peer;
        // re-check both before committing the connection.
        if self.outbound.len() >= self.config.max_outbound {
            debug!(address = %address, "Outbound slots filled while dialing, dropping");
            channel.stop();
            return;
        }
        if self
            .outbound
            .iter()
            .any(|connection| connection.address == address)
        {
            debug!(address = %address, "Connected twice to the same peer, dropping");
            channel.stop();
            self.try_connect();
            return;
        }

        info!(
            address = %address,
            connections = self.outbound.len() + 1,
            "Connected to peer"
        );
        self.outbound.push(ConnectionInfo {
            address,
            channel: channel.clone(),
        });
        self.setup_new_channel(channel);
    }

    /// Bind the acceptor and register inbound channels as they arrive.
    fn spawn_listener(&self) {
        let connector = Arc::clone(&self.connector);
        let events = self.events.clone();
        let shutdown = self.shutdown.clone();
        let port = self.config.listen_port;
        tokio::spawn(async move {
            let acceptor = match connector.listen(port).await {
                Ok(acceptor) => acceptor,
                Err(e) => {
                    error!(port, error = %e, "Error while listening");
                    return;
                }
            };
            info!(port, "Listening for inbound peers");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    result = acceptor.accept() => match result {
                        Ok(channel) => {
                            if events.send(ProtocolEvent::Accepted(channel)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "Problem accepting connection");
                            break;
                        }
                    },
                }
            }
        });
    }

    /// Register an accepted inbound channel.
    fn handle_accept(&mut self, channel: Channel) {
        self.inbound.push(channel.clone());
        info!(connections = self.inbound.len(), "Accepted connection");
        self.setup_new_channel(channel);
    }

    /// Wire a freshly established channel into the core.
    fn setup_new_channel(&mut self, channel: Channel) {
        self.watch_stop(&channel);
        self.subscribe_address(&channel);
        self.send_get_address(&channel);
        self.subscribers.relay(&channel);
    }

    fn watch_stop(&self, channel: &Channel) {
        let channel = channel.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            channel.stopped().await;
            let _ = events.send(ProtocolEvent::ChannelStopped(channel.id())).await;
        });
    }

    /// Ask for the peer's addresses; its first `addr` payload re-enters the
    /// loop for storage.
    fn subscribe_address(&self, channel: &Channel) {
        let channel = channel.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            match channel.recv_addresses().await {
                Ok(packet) => {
                    let _ = events.send(ProtocolEvent::AddressesReceived(packet)).await;
                }
                Err(e) => debug!(channel = %channel.id(), error = %e, "Problem receiving addresses"),
            }
        });
    }

    fn send_get_address(&self, channel: &Channel) {
        let channel = channel.clone();
        tokio::spawn(async move {
            if let Err(e) = channel.send(Message::GetAddress).await {
                warn!(channel = %channel.id(), error = %e, "Sending error");
            }
        });
    }

    /// Store gossiped addresses into the host pool.
    fn store_addresses(&self, packet: AddressPacket) {
        info!(count = packet.addresses.len(), "Storing addresses");
        let hosts = Arc::clone(&self.hosts);
        tokio::spawn(async move {
            for address in packet.addresses {
                if let Err(e) = hosts.store(address).await {
                    warn!(error = %e, "Failed to store address");
                }
            }
        });
    }

    /// Drop a terminated channel from whichever list holds it.
    fn channel_stopped(&mut self, id: ChannelId) {
        if let Some(index) = self
            .outbound
            .iter()
            .position(|connection| connection.channel.id() == id)
        {
            let connection = self.outbound.remove(index);
            info!(
                address = %connection.address,
                connections = self.outbound.len(),
                "Outbound channel stopped"
            );
            self.try_connect();
        }
        if let Some(index) = self.inbound.iter().position(|channel| channel.id() == id) {
            self.inbound.remove(index);
            debug!(connections = self.inbound.len(), "Inbound channel stopped");
        }
    }

    /// Persist the host pool; returns whether the loop should exit.
    async fn handle_stop(&mut self, reply: oneshot::Sender<NetworkResult<()>>) -> bool {
        match self.hosts.save(&self.config.hosts_filename).await {
            Ok(()) => {
                info!("Saved hosts, shutting down");
                let _ = reply.send(Ok(()));
                true
            }
            Err(e) => {
                error!(file = ?self.config.hosts_filename, error = %e, "Failed to save hosts");
                let _ = reply.send(Err(e));
                false
            }
        }
    }
}
