//! Contracts the coordinator requires from the transport layer.

use std::io;
use std::net::SocketAddr;

use futures::Stream;

use crate::channel::RawChannel;
use crate::endpoint::Endpoint;

/// Stream of inbound channels from a listening socket.
pub trait Acceptor<M>: Stream<Item = RawChannel<M>> + Unpin + Send + 'static {
    fn local_addr(&self) -> SocketAddr;

    /// Stop accepting. Channels already yielded are unaffected.
    fn stop(&mut self);
}

/// Accepts and dials raw channels.
#[async_trait::async_trait]
pub trait Transport<M>: Send + 'static {
    type Acceptor: Acceptor<M>;

    async fn listen(&mut self, addr: SocketAddr) -> io::Result<Self::Acceptor>;

    /// Start connecting. The channel reports `Connected` or `Error` through its events.
    fn dial(&mut self, endpoint: Endpoint) -> RawChannel<M>;
}
