//! Per-connection task and the channel that drives it.

use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use peerlink_net::{Channel, ChannelError, Endpoint, EventSink, LinkMessage, RawChannel};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, trace, warn};

use crate::codec::WireCodec;
use crate::config::TcpConfig;

/// Payloads a TCP channel can carry.
pub trait WireMessage: LinkMessage + Serialize + DeserializeOwned {}

impl<T> WireMessage for T where T: LinkMessage + Serialize + DeserializeOwned {}

enum ConnCommand<M> {
    Write(M),
    /// Flush, half-close the write side and wait for the peer to close.
    Disconnect,
}

/// Coordinator side of one TCP connection.
pub struct TcpChannel<M> {
    endpoint: Endpoint,
    command_tx: mpsc::UnboundedSender<ConnCommand<M>>,
    task: AbortHandle,
    disconnecting: bool,
}

impl<M: WireMessage> Channel<M> for TcpChannel<M> {
    fn peer_endpoint(&self) -> Endpoint {
        self.endpoint
    }

    fn write(&mut self, message: M) -> Result<(), ChannelError> {
        self.command_tx
            .send(ConnCommand::Write(message))
            .map_err(|_| ChannelError::Closed)
    }

    fn request_disconnect(&mut self) {
        self.disconnecting = true;
        let _ = self.command_tx.send(ConnCommand::Disconnect);
    }

    /// Aborts the connection unless a disconnect is in flight. A draining
    /// connection is detached instead and ends on its own once the peer closes
    /// or the linger period passes.
    fn force_close(&mut self) {
        if !self.disconnecting {
            self.task.abort();
        }
    }
}

/// How the connection task obtains its stream.
enum Origin {
    Dial,
    Accepted(TcpStream),
}

/// Start dialing `endpoint`. Writes issued before the connection completes are queued.
pub(crate) fn dial<M: WireMessage>(endpoint: Endpoint, config: TcpConfig) -> RawChannel<M> {
    spawn_channel(endpoint, Origin::Dial, config)
}

/// Wrap an accepted stream. The channel is connected from the start.
pub(crate) fn accepted<M: WireMessage>(
    stream: TcpStream,
    peer: SocketAddr,
    config: TcpConfig,
) -> RawChannel<M> {
    spawn_channel(Endpoint::from(peer), Origin::Accepted(stream), config)
}

fn spawn_channel<M: WireMessage>(
    endpoint: Endpoint,
    origin: Origin,
    config: TcpConfig,
) -> RawChannel<M> {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    // The sink only exists once the channel is wrapped, after the task is spawned.
    let (sink_tx, sink_rx) = oneshot::channel::<EventSink<M>>();

    let task = tokio::spawn(async move {
        let Ok(sink) = sink_rx.await else {
            return;
        };
        let stream = match origin {
            Origin::Accepted(stream) => stream,
            Origin::Dial => match connect(endpoint, &config).await {
                Ok(stream) => {
                    sink.connected();
                    stream
                }
                Err(e) => {
                    debug!(%endpoint, error = %e, "dial failed");
                    sink.error(e);
                    return;
                }
            },
        };
        run_connection(endpoint, stream, &config, command_rx, sink).await;
    });

    let channel = TcpChannel {
        endpoint,
        command_tx,
        task: task.abort_handle(),
        disconnecting: false,
    };
    let (raw, sink) = RawChannel::new(channel);
    let _ = sink_tx.send(sink);
    raw
}

async fn connect(endpoint: Endpoint, config: &TcpConfig) -> Result<TcpStream, ChannelError> {
    tokio::time::timeout(config.connect_timeout, TcpStream::connect(endpoint.socket_addr()))
        .await
        .map_err(|_| ChannelError::ConnectTimeout)?
        .map_err(ChannelError::from)
}

async fn run_connection<M: WireMessage>(
    endpoint: Endpoint,
    stream: TcpStream,
    config: &TcpConfig,
    mut command_rx: mpsc::UnboundedReceiver<ConnCommand<M>>,
    sink: EventSink<M>,
) {
    if let Err(e) = stream.set_nodelay(config.nodelay) {
        warn!(%endpoint, error = %e, "failed to set TCP_NODELAY");
    }

    let (read, write) = stream.into_split();
    let mut reader = FramedRead::new(read, WireCodec::<M>::new(config.max_frame_size));
    let mut writer = FramedWrite::new(write, WireCodec::<M>::new(config.max_frame_size));
    let mut closing = false;
    // Set once the channel is released while closing.
    let mut linger: Option<Instant> = None;

    loop {
        tokio::select! {
            cmd = command_rx.recv(), if linger.is_none() => match cmd {
                Some(ConnCommand::Write(message)) if !closing => {
                    if let Err(e) = writer.send(message).await {
                        sink.error(e);
                        return;
                    }
                }
                Some(ConnCommand::Write(_)) => {
                    trace!(%endpoint, "dropping write after disconnect request");
                }
                Some(ConnCommand::Disconnect) if !closing => {
                    trace!(%endpoint, "half-closing connection");
                    closing = true;
                    match timeout(config.linger, writer.close()).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            sink.error(e);
                            return;
                        }
                        Err(_) => {
                            debug!(%endpoint, "flush did not complete, dropping connection");
                            sink.error(ChannelError::Closed);
                            return;
                        }
                    }
                }
                Some(ConnCommand::Disconnect) => {}
                None if closing => {
                    trace!(%endpoint, "channel released, waiting for peer to close");
                    linger = Some(Instant::now() + config.linger);
                }
                None => {
                    trace!(%endpoint, "channel dropped, ending connection task");
                    return;
                }
            },
            _ = sleep_until(linger.unwrap_or_else(Instant::now)), if linger.is_some() => {
                debug!(%endpoint, "peer did not close before linger elapsed");
                return;
            }
            frame = reader.next() => match frame {
                Some(Ok(message)) => {
                    sink.received(message);
                }
                Some(Err(e)) => {
                    debug!(%endpoint, error = %e, "connection failed");
                    sink.error(e);
                    return;
                }
                None => {
                    debug!(%endpoint, "peer closed connection");
                    sink.disconnected();
                    return;
                }
            },
        }
    }
}
