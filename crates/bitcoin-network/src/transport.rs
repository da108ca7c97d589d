//! Transport collaborator contracts.
//!
//! TCP dialing, byte framing and the version handshake live below this
//! crate. The connection core consumes them through these traits and gets
//! back post-handshake [`Channel`]s ready for peer-level I/O.

use crate::{Channel, NetworkResult};
use async_trait::async_trait;

/// Dials peers and produces handshaked channels.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Prepare whatever service state handshakes require.
    async fn start(&self) -> NetworkResult<()>;

    /// Connect to `host:port` and complete the handshake.
    async fn connect(&self, host: &str, port: u16) -> NetworkResult<Channel>;

    /// Bind a listener for inbound connections.
    async fn listen(&self, port: u16) -> NetworkResult<Box<dyn Acceptor>>;
}

/// Accepts handshaked inbound channels.
#[async_trait]
pub trait Acceptor: Send + Sync {
    /// Wait for the next inbound channel.
    async fn accept(&self) -> NetworkResult<Channel>;
}
