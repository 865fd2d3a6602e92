//! Listener and dialer over tokio TCP.

use std::io;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use peerlink_net::{Acceptor, Endpoint, RawChannel, Transport};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, trace, warn};

use crate::config::TcpConfig;
use crate::connection::{self, WireMessage};

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// [`Transport`] over TCP with length-delimited postcard frames.
pub struct TcpTransport<M> {
    config: TcpConfig,
    _marker: PhantomData<fn() -> M>,
}

impl<M> TcpTransport<M> {
    pub fn new(config: TcpConfig) -> Self {
        Self {
            config,
            _marker: PhantomData,
        }
    }
}

impl<M> Default for TcpTransport<M> {
    fn default() -> Self {
        Self::new(TcpConfig::default())
    }
}

#[async_trait::async_trait]
impl<M: WireMessage> Transport<M> for TcpTransport<M> {
    type Acceptor = TcpAcceptor<M>;

    async fn listen(&mut self, addr: SocketAddr) -> io::Result<TcpAcceptor<M>> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(accept_loop(listener, self.config.clone(), tx));

        Ok(TcpAcceptor {
            local_addr,
            inbound: UnboundedReceiverStream::new(rx),
            task,
        })
    }

    fn dial(&mut self, endpoint: Endpoint) -> RawChannel<M> {
        trace!(%endpoint, "dialing over TCP");
        connection::dial(endpoint, self.config.clone())
    }
}

async fn accept_loop<M: WireMessage>(
    listener: TcpListener,
    config: TcpConfig,
    tx: mpsc::UnboundedSender<RawChannel<M>>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(%peer, "accepted TCP connection");
                let raw = connection::accepted(stream, peer, config.clone());
                if tx.send(raw).is_err() {
                    trace!("acceptor dropped, ending accept loop");
                    return;
                }
            }
            // Per-connection failures (e.g. reset before accept) do not stop the listener.
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
            }
        }
    }
}

/// Stream of accepted TCP channels.
pub struct TcpAcceptor<M> {
    local_addr: SocketAddr,
    inbound: UnboundedReceiverStream<RawChannel<M>>,
    task: JoinHandle<()>,
}

impl<M> Stream for TcpAcceptor<M> {
    type Item = RawChannel<M>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inbound).poll_next(cx)
    }
}

impl<M: WireMessage> Acceptor<M> for TcpAcceptor<M> {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn stop(&mut self) {
        self.task.abort();
        self.inbound.close();
    }
}

impl<M> Drop for TcpAcceptor<M> {
    fn drop(&mut self) {
        self.task.abort();
    }
}
