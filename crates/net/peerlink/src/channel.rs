//! Transport channel contract and the coordinator-owned channel handle.

use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, trace, warn};

use crate::endpoint::Endpoint;
use crate::error::ChannelError;

/// Blanket-implemented for any message taxonomy the router can carry.
pub trait LinkMessage: Clone + Debug + Send + Sync + 'static {}

impl<T> LinkMessage for T where T: Clone + Debug + Send + Sync + 'static {}

/// Capabilities the coordinator requires from a transport channel.
///
/// All operations are non-blocking. Completion and failure are reported later
/// through the channel's [`EventSink`].
pub trait Channel<M>: Send + 'static {
    fn peer_endpoint(&self) -> Endpoint;

    /// Enqueue a payload. An immediate error means the channel can no longer write.
    fn write(&mut self, message: M) -> Result<(), ChannelError>;

    /// Ask the remote side to acknowledge closure.
    fn request_disconnect(&mut self);

    /// Release local resources without waiting for the remote side.
    fn force_close(&mut self);
}

/// Notifications a transport raises for one channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent<M> {
    Connected,
    Disconnected,
    Error(ChannelError),
    Received(M),
}

/// Event stream of one channel.
pub type ChannelEvents<M> = UnboundedReceiverStream<ChannelEvent<M>>;

/// Transport side of a channel's event stream.
#[derive(Debug)]
pub struct EventSink<M> {
    tx: mpsc::UnboundedSender<ChannelEvent<M>>,
}

impl<M> Clone for EventSink<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<M> EventSink<M> {
    /// Returns false once the coordinator no longer listens to this channel.
    pub fn emit(&self, event: ChannelEvent<M>) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn connected(&self) -> bool {
        self.emit(ChannelEvent::Connected)
    }

    pub fn disconnected(&self) -> bool {
        self.emit(ChannelEvent::Disconnected)
    }

    pub fn error(&self, cause: ChannelError) -> bool {
        self.emit(ChannelEvent::Error(cause))
    }

    pub fn received(&self, message: M) -> bool {
        self.emit(ChannelEvent::Received(message))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A channel produced by an acceptor or dialer, not yet owned by the coordinator.
pub struct RawChannel<M> {
    pub(crate) channel: Box<dyn Channel<M>>,
    pub(crate) events: ChannelEvents<M>,
}

impl<M: Send + 'static> RawChannel<M> {
    /// Wrap a transport channel, returning the sink its transport task reports through.
    pub fn new(channel: impl Channel<M>) -> (Self, EventSink<M>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let raw = Self {
            channel: Box::new(channel),
            events: UnboundedReceiverStream::new(rx),
        };
        (raw, EventSink { tx })
    }

    pub fn peer_endpoint(&self) -> Endpoint {
        self.channel.peer_endpoint()
    }
}

impl<M: 'static> Debug for RawChannel<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawChannel")
            .field("endpoint", &self.channel.peer_endpoint())
            .finish_non_exhaustive()
    }
}

/// Coordinator-assigned identity, distinguishes successive channels to one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Channel lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Connected,
    Disconnecting,
    Closed,
    Errored,
}

impl ChannelState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Errored)
    }

    /// A superseded dial may be torn down while still connecting.
    pub fn can_transition_to(&self, next: Self) -> bool {
        use ChannelState::*;
        matches!(
            (self, next),
            (Connecting, Connected | Errored | Disconnecting | Closed)
                | (Connected, Disconnecting | Errored | Closed)
                | (Disconnecting, Closed | Errored)
        )
    }
}

/// Which side initiated the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Why a channel was released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    /// Remote side confirmed or initiated the disconnect.
    Disconnected,
    /// Transport reported an error.
    Errored,
    /// Superseded by a newer channel to the same endpoint.
    Replaced,
    /// Denied by the connection policy.
    Rejected,
    /// Closed on request.
    Closed,
    /// Fallback deadline elapsed before the disconnect was confirmed.
    DeadlineElapsed,
}

impl ReleaseReason {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Errored => "errored",
            Self::Replaced => "replaced",
            Self::Rejected => "rejected",
            Self::Closed => "closed",
            Self::DeadlineElapsed => "deadline_elapsed",
        }
    }

    fn terminal_state(&self) -> ChannelState {
        match self {
            Self::Errored => ChannelState::Errored,
            _ => ChannelState::Closed,
        }
    }
}

/// One transport channel plus its lifecycle state.
///
/// Owned by exactly one of the registry, the pending-teardown set, or the handler
/// currently processing it. [`release`](Self::release) consumes the handle.
pub struct ChannelHandle<M> {
    id: ChannelId,
    endpoint: Endpoint,
    direction: Direction,
    state: ChannelState,
    channel: Box<dyn Channel<M>>,
}

impl<M: 'static> ChannelHandle<M> {
    /// Outbound channel, dial in progress.
    pub(crate) fn outbound(endpoint: Endpoint, channel: Box<dyn Channel<M>>) -> Self {
        Self {
            id: ChannelId::next(),
            endpoint,
            direction: Direction::Outbound,
            state: ChannelState::Connecting,
            channel,
        }
    }

    /// Accepted channel, keyed by its peer endpoint.
    pub(crate) fn inbound(channel: Box<dyn Channel<M>>) -> Self {
        Self {
            id: ChannelId::next(),
            endpoint: channel.peer_endpoint(),
            direction: Direction::Inbound,
            state: ChannelState::Connected,
            channel,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Apply a lifecycle transition. Invalid transitions are logged and ignored.
    pub(crate) fn transition(&mut self, next: ChannelState) -> bool {
        if self.state == next {
            return true;
        }
        if !self.state.can_transition_to(next) {
            warn!(
                id = %self.id,
                endpoint = %self.endpoint,
                from = ?self.state,
                to = ?next,
                "ignoring invalid channel transition"
            );
            return false;
        }
        trace!(
            id = %self.id,
            endpoint = %self.endpoint,
            from = ?self.state,
            to = ?next,
            "channel state changed"
        );
        self.state = next;
        true
    }

    pub(crate) fn write(&mut self, message: M) -> Result<(), ChannelError> {
        self.channel.write(message)
    }

    /// Request disconnect once. Later calls on a draining channel are no-ops.
    pub(crate) fn begin_disconnect(&mut self) {
        if self.state == ChannelState::Disconnecting {
            return;
        }
        if self.transition(ChannelState::Disconnecting) {
            self.channel.request_disconnect();
        }
    }

    /// Release transport resources. Consuming `self` makes a second release impossible.
    pub(crate) fn release(mut self, reason: ReleaseReason) -> ChannelState {
        let terminal = reason.terminal_state();
        if !self.state.is_terminal() {
            self.transition(terminal);
        }
        self.channel.force_close();
        debug!(
            id = %self.id,
            endpoint = %self.endpoint,
            direction = ?self.direction,
            reason = reason.as_str(),
            "channel released"
        );
        self.state
    }
}

impl<M: 'static> Debug for ChannelHandle<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("direction", &self.direction)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
