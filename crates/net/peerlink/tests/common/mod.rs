//! In-memory transport for driving the coordinator from tests.

#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use peerlink_net::{
    Acceptor, Channel, ChannelError, Endpoint, EventSink, LinkEvent, PeerLinkConfig,
    PeerLinkHandle, RawChannel, Transport, spawn_peerlink,
};
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Payload taxonomy used by the integration tests.
#[derive(Debug, Clone, PartialEq)]
pub enum Msg {
    Text(String),
    Heartbeat(u64),
}

impl From<String> for Msg {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<u64> for Msg {
    fn from(n: u64) -> Self {
        Self::Heartbeat(n)
    }
}

impl TryFrom<Msg> for String {
    type Error = Msg;
    fn try_from(m: Msg) -> Result<Self, Self::Error> {
        match m {
            Msg::Text(s) => Ok(s),
            other => Err(other),
        }
    }
}

impl TryFrom<Msg> for u64 {
    type Error = Msg;
    fn try_from(m: Msg) -> Result<Self, Self::Error> {
        match m {
            Msg::Heartbeat(n) => Ok(n),
            other => Err(other),
        }
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

pub fn endpoint(port: u16) -> Endpoint {
    format!("10.0.0.1:{port}").parse().unwrap()
}

/// Calls the coordinator made on one channel.
#[derive(Debug, Default)]
pub struct ProbeState {
    pub writes: Vec<Msg>,
    pub disconnect_requests: usize,
    pub force_closes: usize,
    pub fail_writes: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Probe(Arc<Mutex<ProbeState>>);

impl Probe {
    pub fn writes(&self) -> Vec<Msg> {
        self.0.lock().writes.clone()
    }

    pub fn disconnect_requests(&self) -> usize {
        self.0.lock().disconnect_requests
    }

    pub fn force_closes(&self) -> usize {
        self.0.lock().force_closes
    }

    pub fn is_released(&self) -> bool {
        self.force_closes() > 0
    }

    pub fn fail_writes(&self) {
        self.0.lock().fail_writes = true;
    }
}

struct MockChannel {
    endpoint: Endpoint,
    probe: Probe,
}

impl Channel<Msg> for MockChannel {
    fn peer_endpoint(&self) -> Endpoint {
        self.endpoint
    }

    fn write(&mut self, message: Msg) -> Result<(), ChannelError> {
        let mut state = self.probe.0.lock();
        if state.fail_writes {
            return Err(ChannelError::Closed);
        }
        state.writes.push(message);
        Ok(())
    }

    fn request_disconnect(&mut self) {
        self.probe.0.lock().disconnect_requests += 1;
    }

    fn force_close(&mut self) {
        self.probe.0.lock().force_closes += 1;
    }
}

/// Remote side of one mock channel.
#[derive(Clone)]
pub struct Remote {
    pub endpoint: Endpoint,
    pub sink: EventSink<Msg>,
    pub probe: Probe,
}

fn mock_channel(endpoint: Endpoint) -> (RawChannel<Msg>, Remote) {
    let probe = Probe::default();
    let (raw, sink) = RawChannel::new(MockChannel {
        endpoint,
        probe: probe.clone(),
    });
    (raw, Remote {
        endpoint,
        sink,
        probe,
    })
}

#[derive(Default)]
struct NetState {
    dials: Vec<Remote>,
    inbound_tx: Option<mpsc::UnboundedSender<RawChannel<Msg>>>,
    /// Inbound channels handed to the service so far.
    delivered: usize,
    /// Inbound channels the service has taken from its acceptor.
    taken: usize,
    listens: Vec<SocketAddr>,
}

/// Test-side view of the mock network.
#[derive(Clone, Default)]
pub struct MockNet(Arc<Mutex<NetState>>);

impl MockNet {
    pub fn transport(&self) -> MockTransport {
        MockTransport { net: self.clone() }
    }

    /// Deliver an inbound connection from `endpoint` to the current listener.
    pub fn incoming(&self, endpoint: Endpoint) -> Remote {
        let (raw, remote) = mock_channel(endpoint);
        let mut state = self.0.lock();
        let tx = state.inbound_tx.as_ref().expect("not listening");
        tx.send(raw).expect("acceptor stopped");
        state.delivered += 1;
        remote
    }

    /// Whether the service has picked up every delivered inbound channel.
    pub fn inbound_drained(&self) -> bool {
        let state = self.0.lock();
        state.taken == state.delivered
    }

    /// Most recent dial to `endpoint`.
    pub fn dialed(&self, endpoint: Endpoint) -> Remote {
        self.0
            .lock()
            .dials
            .iter()
            .rev()
            .find(|r| r.endpoint == endpoint)
            .cloned()
            .expect("endpoint was never dialed")
    }

    pub fn dial_count(&self) -> usize {
        self.0.lock().dials.len()
    }

    pub fn listens(&self) -> Vec<SocketAddr> {
        self.0.lock().listens.clone()
    }

    pub fn is_accepting(&self) -> bool {
        self.0
            .lock()
            .inbound_tx
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }
}

pub struct MockTransport {
    net: MockNet,
}

#[async_trait::async_trait]
impl Transport<Msg> for MockTransport {
    type Acceptor = MockAcceptor;

    async fn listen(&mut self, addr: SocketAddr) -> io::Result<MockAcceptor> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.net.0.lock();
        state.inbound_tx = Some(tx);
        state.listens.push(addr);
        Ok(MockAcceptor {
            local_addr: addr,
            inbound: UnboundedReceiverStream::new(rx),
            net: self.net.clone(),
        })
    }

    fn dial(&mut self, endpoint: Endpoint) -> RawChannel<Msg> {
        let (raw, remote) = mock_channel(endpoint);
        self.net.0.lock().dials.push(remote);
        raw
    }
}

pub struct MockAcceptor {
    local_addr: SocketAddr,
    inbound: UnboundedReceiverStream<RawChannel<Msg>>,
    net: MockNet,
}

impl Stream for MockAcceptor {
    type Item = RawChannel<Msg>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = Pin::new(&mut self.inbound).poll_next(cx);
        if let Poll::Ready(Some(_)) = &polled {
            self.net.0.lock().taken += 1;
        }
        polled
    }
}

impl Acceptor<Msg> for MockAcceptor {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn stop(&mut self) {
        self.inbound.close();
    }
}

/// A running service plus the mock network behind it.
pub struct Harness {
    pub net: MockNet,
    pub handle: PeerLinkHandle<Msg>,
    pub events: broadcast::Receiver<LinkEvent>,
}

impl Harness {
    pub async fn start(config: PeerLinkConfig) -> Self {
        init_tracing();
        let net = MockNet::default();
        let handle = spawn_peerlink::<Msg, _>(config, net.transport());
        let events = handle.subscribe_events();
        handle
            .listen("127.0.0.1:7000".parse().unwrap())
            .await
            .unwrap();
        Self {
            net,
            handle,
            events,
        }
    }

    pub async fn single() -> Self {
        Self::start(PeerLinkConfig::default()).await
    }

    pub async fn multi() -> Self {
        Self::start(PeerLinkConfig::multi()).await
    }

    /// Round-trip through the service; everything sent before has been applied.
    pub async fn peers(&self) -> Vec<Endpoint> {
        let mut peers = self.handle.peers().await.unwrap();
        peers.sort();
        peers
    }

    /// Dial and report the connection as established.
    pub async fn connect(&self, endpoint: Endpoint) -> Remote {
        self.handle.dial(endpoint).unwrap();
        self.peers().await;
        let remote = self.net.dialed(endpoint);
        remote.sink.connected();
        self.peers().await;
        remote
    }

    /// Deliver an inbound connection and wait until the service has handled it.
    ///
    /// Commands already queued are applied first, so a policy change sent
    /// before the connection arrives governs its admission.
    pub async fn accept(&self, endpoint: Endpoint) -> Remote {
        let remote = self.net.incoming(endpoint);
        while !self.net.inbound_drained() {
            tokio::task::yield_now().await;
        }
        remote
    }

    /// Public events emitted so far.
    pub fn take_events(&mut self) -> Vec<LinkEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}
