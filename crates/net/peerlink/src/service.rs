//! Lifecycle coordinator actor (runs in its own tokio task).
//!
//! All registry mutation, admission checks and state transitions happen here, on
//! one task, so the registry needs no lock. Transport completions arrive as
//! per-channel event streams and are applied in the same loop.

use std::net::SocketAddr;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_stream::StreamMap;
use tracing::{debug, info, trace, warn};

use crate::channel::{
    ChannelEvent, ChannelEvents, ChannelHandle, ChannelId, ChannelState, LinkMessage, RawChannel,
    ReleaseReason,
};
use crate::config::PeerLinkConfig;
use crate::endpoint::Endpoint;
use crate::error::{ChannelError, PeerLinkError};
use crate::events::EventEmitter;
use crate::handle::PeerLinkHandle;
use crate::metrics::PeerLinkMetrics;
use crate::policy;
use crate::registry::ConnectionRegistry;
use crate::router::Router;
use crate::teardown::PendingTeardown;
use crate::transport::{Acceptor, Transport};

/// Commands from the handle to the service.
pub enum LinkCommand<M> {
    /// Connect to a peer, replacing any existing channel to it.
    Dial { endpoint: Endpoint },
    /// Close the channel to one peer without awaiting confirmation.
    Close { endpoint: Endpoint },
    /// Close every channel and stop accepting.
    CloseAll,
    /// Bind and start accepting, replacing any current listener.
    Listen {
        addr: SocketAddr,
        response_tx: oneshot::Sender<Result<SocketAddr, PeerLinkError>>,
    },
    /// Affects future admissions only.
    SetAllowMulti { allow_multi: bool },
    /// Write a payload to every registered channel.
    Broadcast { message: M },
    /// Currently registered endpoints.
    Peers {
        response_tx: oneshot::Sender<Vec<Endpoint>>,
    },
}

/// Subscription key for a registered channel's event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ChannelKey {
    endpoint: Endpoint,
    id: ChannelId,
}

impl<M: 'static> From<&ChannelHandle<M>> for ChannelKey {
    fn from(handle: &ChannelHandle<M>) -> Self {
        Self {
            endpoint: handle.endpoint(),
            id: handle.id(),
        }
    }
}

/// Drives every channel through its lifecycle and owns the registry.
pub struct PeerLinkService<M: LinkMessage, T: Transport<M>> {
    /// Receive commands from handles.
    command_rx: mpsc::UnboundedReceiver<LinkCommand<M>>,
    transport: T,
    acceptor: Option<T::Acceptor>,
    /// Listen address applied when the service starts.
    listen: Option<SocketAddr>,
    allow_multi: bool,
    disconnect_timeout: Duration,
    registry: ConnectionRegistry<M>,
    /// Event streams of registered channels. Removal is unsubscription.
    subscriptions: StreamMap<ChannelKey, ChannelEvents<M>>,
    /// Evicted channels awaiting disconnect confirmation.
    teardown: PendingTeardown<M>,
    router: Router<M>,
    events: EventEmitter,
    metrics: PeerLinkMetrics,
}

impl<M: LinkMessage, T: Transport<M>> PeerLinkService<M, T> {
    /// Create a new service. Prefer [`create_peerlink`] which also builds the handle.
    pub fn new(
        config: PeerLinkConfig,
        transport: T,
        command_rx: mpsc::UnboundedReceiver<LinkCommand<M>>,
        router: Router<M>,
        events: EventEmitter,
    ) -> Self {
        Self {
            command_rx,
            transport,
            acceptor: None,
            listen: config.listen,
            allow_multi: config.allow_multi,
            disconnect_timeout: config.disconnect_timeout,
            registry: ConnectionRegistry::new(),
            subscriptions: StreamMap::new(),
            teardown: PendingTeardown::default(),
            router,
            events,
            metrics: PeerLinkMetrics::default(),
        }
    }

    /// Run the service event loop.
    ///
    /// This method runs until all handles are dropped, then closes every channel.
    pub async fn run(mut self) {
        if let Some(addr) = self.listen.take() {
            if let Err(e) = self.listen(addr).await {
                warn!(%addr, error = %e, "initial listen failed");
            }
        }

        loop {
            let deadline = self.teardown.next_deadline();
            let has_subscriptions = !self.subscriptions.is_empty();

            // Events of known channels first: anything already delivered is
            // applied before a later command observes the registry. Commands
            // precede new inbound connections so admission sees the current policy.
            tokio::select! {
                biased;

                Some((key, event)) = self.subscriptions.next(), if has_subscriptions => {
                    self.on_channel_event(key, event);
                }
                (id, event) = self.teardown.next_event() => {
                    self.on_teardown_event(id, event);
                }
                _ = sleep_until(deadline) => {
                    self.expire_teardowns();
                }
                cmd = self.command_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => {
                        debug!("PeerLink service shutting down");
                        break;
                    }
                },
                inbound = next_inbound(&mut self.acceptor) => match inbound {
                    Some(raw) => self.accept_incoming(raw),
                    None => {
                        debug!("acceptor finished");
                        self.acceptor = None;
                    }
                },
            }

            self.metrics.set_sizes(self.registry.len(), self.teardown.len());
        }

        self.shutdown();
    }

    /// Convert self into a spawnable future.
    pub async fn into_task(self) {
        self.run().await;
    }

    async fn handle_command(&mut self, cmd: LinkCommand<M>) {
        match cmd {
            LinkCommand::Dial { endpoint } => self.dial(endpoint),
            LinkCommand::Close { endpoint } => self.close_one(endpoint),
            LinkCommand::CloseAll => self.close_all(),
            LinkCommand::Listen { addr, response_tx } => {
                let result = self.listen(addr).await;
                let _ = response_tx.send(result);
            }
            LinkCommand::SetAllowMulti { allow_multi } => {
                debug!(allow_multi, "connection policy updated");
                self.allow_multi = allow_multi;
            }
            LinkCommand::Broadcast { message } => self.broadcast(message),
            LinkCommand::Peers { response_tx } => {
                let _ = response_tx.send(self.registry.endpoints());
            }
        }
    }

    async fn listen(&mut self, addr: SocketAddr) -> Result<SocketAddr, PeerLinkError> {
        if let Some(mut previous) = self.acceptor.take() {
            debug!(local = %previous.local_addr(), "stopping previous listener");
            previous.stop();
        }

        let acceptor = self
            .transport
            .listen(addr)
            .await
            .map_err(|e| PeerLinkError::Listen(e.to_string()))?;

        let local = acceptor.local_addr();
        info!(%local, "listening for peers");
        self.acceptor = Some(acceptor);
        Ok(local)
    }

    /// Outbound connect. A channel already registered for `endpoint` is closed
    /// gracefully with a fallback deadline before the new attempt is admitted.
    /// In single-link mode the current occupant of the slot is displaced the
    /// same way.
    fn dial(&mut self, endpoint: Endpoint) {
        if let Some((old, events)) = self.evict(&endpoint) {
            debug!(%endpoint, id = %old.id(), "replacing channel, awaiting disconnect");
            self.drain_gracefully(old, events);
        }

        if !self.allow_multi {
            for occupant in self.registry.endpoints() {
                if let Some((old, events)) = self.evict(&occupant) {
                    debug!(
                        endpoint = %occupant,
                        id = %old.id(),
                        dialing = %endpoint,
                        "vacating single link slot"
                    );
                    self.drain_gracefully(old, events);
                }
            }
        }

        if !policy::admit(self.registry.len(), self.allow_multi).is_admitted() {
            debug!(%endpoint, peers = self.registry.len(), "dial rejected by connection policy");
            self.metrics.inc_rejected();
            return;
        }

        let RawChannel { channel, events } = self.transport.dial(endpoint);
        let handle = ChannelHandle::outbound(endpoint, channel);
        debug!(%endpoint, id = %handle.id(), "dialing");
        self.register(handle, events);
    }

    /// Inbound connect. A channel already registered for the same endpoint is
    /// closed immediately, then the new one is admitted against what remains.
    fn accept_incoming(&mut self, raw: RawChannel<M>) {
        let RawChannel { channel, events } = raw;
        let handle = ChannelHandle::inbound(channel);
        let endpoint = handle.endpoint();

        if let Some((old, _)) = self.evict(&endpoint) {
            debug!(%endpoint, id = %old.id(), "inbound connection replaces channel");
            self.close_abruptly(old, ReleaseReason::Replaced);
        }

        if !policy::admit(self.registry.len(), self.allow_multi).is_admitted() {
            debug!(
                %endpoint,
                peers = self.registry.len(),
                "inbound connection rejected by connection policy"
            );
            self.metrics.inc_rejected();
            self.close_abruptly(handle, ReleaseReason::Rejected);
            return;
        }

        if self.register(handle, events) {
            self.events.connected(endpoint);
        }
    }

    fn close_one(&mut self, endpoint: Endpoint) {
        match self.evict(&endpoint) {
            Some((handle, _)) => self.close_abruptly(handle, ReleaseReason::Closed),
            None => trace!(%endpoint, "close requested for unknown endpoint"),
        }
    }

    fn close_all(&mut self) {
        let handles: Vec<_> = self.registry.drain().collect();
        self.subscriptions.clear();
        debug!(count = handles.len(), "closing all channels");
        for handle in handles {
            self.release(handle, ReleaseReason::Closed);
        }

        if let Some(mut acceptor) = self.acceptor.take() {
            debug!(local = %acceptor.local_addr(), "stopping listener");
            acceptor.stop();
        }
    }

    fn broadcast(&mut self, message: M) {
        let failures = self.router.broadcast(&mut self.registry, &message);
        for failure in failures {
            self.metrics.inc_write_failures();
            let key = ChannelKey {
                endpoint: failure.endpoint,
                id: failure.id,
            };
            self.on_error(key, failure.cause);
        }
    }

    fn on_channel_event(&mut self, key: ChannelKey, event: ChannelEvent<M>) {
        match event {
            ChannelEvent::Connected => self.on_connected(key),
            ChannelEvent::Disconnected => self.on_disconnected(key),
            ChannelEvent::Error(cause) => self.on_error(key, cause),
            ChannelEvent::Received(payload) => {
                if self.registry.holds(&key.endpoint, key.id) {
                    self.router.publish(key.endpoint, payload);
                }
            }
        }
    }

    fn on_connected(&mut self, key: ChannelKey) {
        let Some(handle) = self
            .registry
            .lookup_mut(&key.endpoint)
            .filter(|handle| handle.id() == key.id)
        else {
            trace!(endpoint = %key.endpoint, id = %key.id, "connected event for stale channel");
            return;
        };

        if handle.state() == ChannelState::Connecting
            && handle.transition(ChannelState::Connected)
        {
            debug!(endpoint = %key.endpoint, id = %key.id, "channel connected");
            self.events.connected(key.endpoint);
        }
    }

    fn on_disconnected(&mut self, key: ChannelKey) {
        let Some((mut handle, _)) = self.evict_channel(key) else {
            trace!(endpoint = %key.endpoint, id = %key.id, "disconnect for superseded channel");
            return;
        };

        handle.transition(ChannelState::Disconnecting);
        self.release(handle, ReleaseReason::Disconnected);
        self.events.disconnected(key.endpoint);
    }

    fn on_error(&mut self, key: ChannelKey, cause: ChannelError) {
        let Some((handle, _)) = self.evict_channel(key) else {
            trace!(endpoint = %key.endpoint, id = %key.id, %cause, "error for superseded channel");
            return;
        };

        warn!(endpoint = %key.endpoint, id = %key.id, %cause, "transport error, evicting channel");
        self.release(handle, ReleaseReason::Errored);
        self.events.error(key.endpoint, cause);
    }

    fn on_teardown_event(&mut self, id: ChannelId, event: ChannelEvent<M>) {
        match event {
            ChannelEvent::Disconnected | ChannelEvent::Error(_) => {
                if let Some(handle) = self.teardown.confirm(id) {
                    self.release(handle, ReleaseReason::Replaced);
                }
            }
            ChannelEvent::Connected | ChannelEvent::Received(_) => {
                trace!(%id, "ignoring event from draining channel");
            }
        }
    }

    fn expire_teardowns(&mut self) {
        for handle in self.teardown.expired(Instant::now()) {
            debug!(
                endpoint = %handle.endpoint(),
                id = %handle.id(),
                "disconnect not confirmed before deadline, forcing release"
            );
            self.release(handle, ReleaseReason::DeadlineElapsed);
        }
    }

    fn register(&mut self, handle: ChannelHandle<M>, events: ChannelEvents<M>) -> bool {
        let key = ChannelKey::from(&handle);
        match self.registry.insert(handle) {
            Ok(()) => {
                self.subscriptions.insert(key, events);
                self.metrics.inc_registered();
                debug!(
                    endpoint = %key.endpoint,
                    id = %key.id,
                    peers = self.registry.len(),
                    "channel registered"
                );
                true
            }
            Err((err, handle)) => {
                warn!(%err, "registry already holds endpoint, releasing new channel");
                self.release(handle, ReleaseReason::Closed);
                false
            }
        }
    }

    /// Remove the entry for `endpoint` and its subscription.
    fn evict(
        &mut self,
        endpoint: &Endpoint,
    ) -> Option<(ChannelHandle<M>, Option<ChannelEvents<M>>)> {
        let handle = self.registry.remove(endpoint)?;
        let events = self.subscriptions.remove(&ChannelKey::from(&handle));
        Some((handle, events))
    }

    /// Evict only if the registry still holds this exact channel.
    fn evict_channel(
        &mut self,
        key: ChannelKey,
    ) -> Option<(ChannelHandle<M>, Option<ChannelEvents<M>>)> {
        if !self.registry.holds(&key.endpoint, key.id) {
            return None;
        }
        self.evict(&key.endpoint)
    }

    /// Request disconnect and hold the channel until confirmed or the deadline passes.
    fn drain_gracefully(&mut self, handle: ChannelHandle<M>, events: Option<ChannelEvents<M>>) {
        let deadline = Instant::now() + self.disconnect_timeout;
        self.teardown.begin(handle, events, deadline);
    }

    /// Request disconnect, then release without awaiting confirmation.
    fn close_abruptly(&self, mut handle: ChannelHandle<M>, reason: ReleaseReason) {
        handle.begin_disconnect();
        self.release(handle, reason);
    }

    fn release(&self, handle: ChannelHandle<M>, reason: ReleaseReason) {
        handle.release(reason);
        self.metrics.inc_released(reason);
    }

    fn shutdown(&mut self) {
        self.close_all();
        for handle in self.teardown.drain() {
            self.release(handle, ReleaseReason::Closed);
        }
        self.metrics.set_sizes(0, 0);
    }
}

async fn next_inbound<M, A: Acceptor<M>>(acceptor: &mut Option<A>) -> Option<RawChannel<M>> {
    match acceptor {
        Some(acceptor) => acceptor.next().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Create a PeerLink actor (service and handle pair).
///
/// The service should be spawned as a background task; it stops once every
/// handle is dropped.
pub fn create_peerlink<M, T>(
    config: PeerLinkConfig,
    transport: T,
) -> (PeerLinkService<M, T>, PeerLinkHandle<M>)
where
    M: LinkMessage,
    T: Transport<M>,
{
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let router = Router::new(config.delivery_channel_capacity);
    let events = EventEmitter::new(config.event_channel_capacity);

    let handle = PeerLinkHandle::new(command_tx, router.clone(), events.clone());
    let service = PeerLinkService::new(config, transport, command_rx, router, events);

    (service, handle)
}

/// Create a PeerLink actor and spawn its service on the current tokio runtime.
pub fn spawn_peerlink<M, T>(config: PeerLinkConfig, transport: T) -> PeerLinkHandle<M>
where
    M: LinkMessage,
    T: Transport<M>,
{
    let (service, handle) = create_peerlink(config, transport);
    tokio::spawn(service.into_task());
    handle
}
