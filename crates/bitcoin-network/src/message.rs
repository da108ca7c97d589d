//! P2P protocol messages touched by the connection core.
//!
//! Only two messages matter at this layer: `getaddr` soliciting peer
//! addresses and `addr` carrying them. Wire encoding and decoding belong
//! to the message codec below this crate.

use crate::address::AddressPacket;

/// Message type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Address solicitation.
    GetAddress,
    /// Address payload.
    Address,
}

impl MessageType {
    /// Wire command string.
    pub fn command(&self) -> &'static str {
        match self {
            MessageType::GetAddress => "getaddr",
            MessageType::Address => "addr",
        }
    }
}

/// A protocol message.
#[derive(Debug, Clone)]
pub enum Message {
    /// Ask a peer for addresses it knows.
    GetAddress,
    /// Addresses volunteered by a peer.
    Address(AddressPacket),
}

impl Message {
    /// Get the message type.
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::GetAddress => MessageType::GetAddress,
            Message::Address(_) => MessageType::Address,
        }
    }
}
