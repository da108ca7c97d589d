//! # bitcoin-network
//!
//! Peer discovery and connection management for a Bitcoin P2P node.
//!
//! This crate provides:
//! - A persistent host address pool, seeded from DNS on cold start
//! - A connection maintainer keeping a target number of outbound peers
//! - Inbound channel registration and `getaddr`/`addr` gossip
//! - One-shot fan-out of newly established channels to subscribers
//!
//! Transport, framing and the version handshake are supplied by the
//! embedding node through the [`Connector`] and [`Acceptor`] traits; the
//! host store contract is [`Hosts`], with [`HostPool`] as the file-backed
//! implementation.

mod address;
mod channel;
mod error;
mod hosts;
mod message;
mod protocol;
mod seeder;
mod subscriber;
mod transport;

#[cfg(test)]
pub(crate) mod testutil;

pub use address::{AddressPacket, NetworkAddress};
pub use channel::{Channel, ChannelDriver, ChannelId};
pub use error::{NetworkError, NetworkResult};
pub use hosts::{HostPool, Hosts};
pub use message::{Message, MessageType};
pub use protocol::{Protocol, ProtocolConfig, ProtocolState};
pub use seeder::{Seeder, DNS_SEEDS};
pub use subscriber::ChannelSubscribers;
pub use transport::{Acceptor, Connector};

/// Default P2P port.
pub const DEFAULT_PORT: u16 = 8333;

/// Default target for outbound connections.
pub const DEFAULT_MAX_OUTBOUND: usize = 8;

/// Default hosts file name.
pub const DEFAULT_HOSTS_FILENAME: &str = "hosts";
