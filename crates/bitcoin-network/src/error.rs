//! Network error types.

use thiserror::Error;

/// Network errors.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Handshake failed.
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// Accepting an inbound connection failed.
    #[error("Accept failed: {0}")]
    AcceptFailed(String),

    /// The host pool has no addresses to draw from.
    #[error("Host pool is empty")]
    HostsEmpty,

    /// The protocol was started more than once.
    #[error("Protocol already started")]
    AlreadyStarted,

    /// Operation against a stopped protocol.
    #[error("Protocol stopped")]
    Stopped,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for network operations.
pub type NetworkResult<T> = Result<T, NetworkError>;
