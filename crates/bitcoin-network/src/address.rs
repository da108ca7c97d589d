//! Peer network addresses.
//!
//! Addresses carry the 16-byte IP field used on the wire. IPv4 addresses
//! use the mapped form with the dotted quad in bytes 12-15. Two addresses
//! are equal when their `(ip, port)` pairs match; services and timestamp
//! are advisory metadata and do not participate in equality.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::Ipv4Addr;

/// A peer address as carried in `addr` messages and the host pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkAddress {
    /// 16-byte IP field (IPv4-mapped form for IPv4 peers).
    pub ip: [u8; 16],
    /// TCP port.
    pub port: u16,
    /// Service bitmask advertised by the peer.
    #[serde(default)]
    pub services: u64,
    /// Last-seen timestamp (seconds since epoch).
    #[serde(default)]
    pub timestamp: u32,
}

impl NetworkAddress {
    /// Create an address from a raw 16-byte IP field and port.
    pub fn new(ip: [u8; 16], port: u16) -> Self {
        Self {
            ip,
            port,
            services: 0,
            timestamp: 0,
        }
    }

    /// Create an IPv4-mapped address.
    pub fn from_v4(ip: Ipv4Addr, port: u16) -> Self {
        let mut bytes = [0u8; 16];
        bytes[10] = 0xFF;
        bytes[11] = 0xFF;
        bytes[12..16].copy_from_slice(&ip.octets());
        Self::new(bytes, port)
    }

    /// The IPv4 part of the address (bytes 12-15 of the mapped form).
    pub fn to_v4(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.ip[12], self.ip[13], self.ip[14], self.ip[15])
    }

    /// Render the IPv4 part as a dotted quad, suitable for dialing.
    pub fn host(&self) -> String {
        self.to_v4().to_string()
    }
}

impl PartialEq for NetworkAddress {
    fn eq(&self, other: &Self) -> bool {
        self.ip == other.ip && self.port == other.port
    }
}

impl Eq for NetworkAddress {}

impl Hash for NetworkAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ip.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host(), self.port)
    }
}

/// Payload of an `addr` message: a batch of peer addresses.
#[derive(Debug, Clone, Default)]
pub struct AddressPacket {
    /// Addresses the peer knows about.
    pub addresses: Vec<NetworkAddress>,
}
