//! TCP transport for peerlink.
//!
//! Each connection runs in its own tokio task. Frames are a u32 length prefix
//! followed by the postcard encoding of the caller's message taxonomy.
//!
//! A disconnect request flushes pending writes and half-closes the socket; the
//! channel reports `Disconnected` once the peer closes its side. Releasing a
//! channel after a disconnect request does not cut the connection: its task
//! finishes the flush and lingers for the peer's close, bounded by
//! [`TcpConfig::linger`]. Releasing without a request aborts the task.

pub mod codec;
pub mod config;
mod connection;
mod transport;

pub use codec::WireCodec;
pub use config::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_LINGER, DEFAULT_MAX_FRAME_SIZE, TcpConfig};
pub use connection::{TcpChannel, WireMessage};
pub use transport::{TcpAcceptor, TcpTransport};
