//! Post-handshake peer channels.
//!
//! A [`Channel`] is the handle the connection core holds for one live peer.
//! The transport side drives the matching [`ChannelDriver`]: outgoing
//! messages drain from it, received `addr` payloads are pushed into it, and
//! cancelling the stop token tears the channel down on both sides.

use crate::{AddressPacket, Message, NetworkError, NetworkResult};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Buffered messages per channel direction.
const CHANNEL_CAPACITY: usize = 100;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Unique channel identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to a live, handshaked peer connection.
#[derive(Clone)]
pub struct Channel {
    id: ChannelId,
    outgoing: mpsc::Sender<Message>,
    addresses: Arc<Mutex<mpsc::Receiver<AddressPacket>>>,
    stop: CancellationToken,
}

/// Transport-facing end of a channel.
///
/// A handshake implementation keeps the driver after handing the [`Channel`]
/// to the core: it forwards drained outgoing messages to the socket, feeds
/// decoded `addr` payloads in, and cancels the stop token when the
/// connection dies.
pub struct ChannelDriver {
    /// Messages the core asked to send.
    pub outgoing: mpsc::Receiver<Message>,
    /// Feed for received `addr` payloads.
    pub addresses: mpsc::Sender<AddressPacket>,
    /// Cancelled when either side stops the channel.
    pub stop: CancellationToken,
}

impl Channel {
    /// Open a new channel, returning the core handle and the transport
    /// driver.
    pub fn open() -> (Self, ChannelDriver) {
        let (outgoing_tx, outgoing_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (addresses_tx, addresses_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let stop = CancellationToken::new();

        let channel = Self {
            id: ChannelId(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed)),
            outgoing: outgoing_tx,
            addresses: Arc::new(Mutex::new(addresses_rx)),
            stop: stop.clone(),
        };
        let driver = ChannelDriver {
            outgoing: outgoing_rx,
            addresses: addresses_tx,
            stop,
        };

        (channel, driver)
    }

    /// This channel's identifier.
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Send a message to the peer.
    pub async fn send(&self, message: Message) -> NetworkResult<()> {
        self.outgoing
            .send(message)
            .await
            .map_err(|_| NetworkError::ConnectionClosed)
    }

    /// Wait for the next `addr` payload from the peer.
    ///
    /// Single-shot: each call consumes one payload. Fails once the channel
    /// has stopped.
    pub async fn recv_addresses(&self) -> NetworkResult<AddressPacket> {
        let mut inbox = self.addresses.lock().await;
        tokio::select! {
            _ = self.stop.cancelled() => Err(NetworkError::ConnectionClosed),
            packet = inbox.recv() => packet.ok_or(NetworkError::ConnectionClosed),
        }
    }

    /// Wait until the channel terminates.
    pub async fn stopped(&self) {
        self.stop.cancelled().await;
    }

    /// Tear the channel down.
    pub fn stop(&self) {
        self.stop.cancel();
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Channel({})", self.id)
    }
}
