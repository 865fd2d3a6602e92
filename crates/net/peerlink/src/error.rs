//! PeerLink error types.

use crate::endpoint::Endpoint;

/// Errors returned by [`PeerLinkHandle`](crate::PeerLinkHandle) operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PeerLinkError {
    /// Service has stopped.
    #[error("peerlink service stopped")]
    ServiceStopped,

    /// Binding the listen address failed.
    #[error("failed to listen: {0}")]
    Listen(String),
}

/// Registry mutation errors.
///
/// Only reachable through a coordinator bug: every insert is preceded by an eviction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("endpoint {0} is already registered")]
    DuplicateKey(Endpoint),
}

/// Transport-level channel failures, surfaced upward as error events.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// I/O error on the underlying connection.
    #[error("I/O error: {0}")]
    Io(String),

    /// Connection attempt did not complete in time.
    #[error("connect timed out")]
    ConnectTimeout,

    /// Channel is no longer accepting writes.
    #[error("channel closed")]
    Closed,

    /// Outbound payload could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),

    /// Inbound payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<std::io::Error> for ChannelError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
