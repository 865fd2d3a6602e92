//! Cloneable handle for interacting with the PeerLink service.

use std::net::SocketAddr;

use tokio::sync::{broadcast, mpsc, oneshot};

use crate::channel::LinkMessage;
use crate::endpoint::Endpoint;
use crate::error::PeerLinkError;
use crate::events::{EventEmitter, LinkEvent};
use crate::router::{Delivery, Received, Router};
use crate::service::LinkCommand;

/// Cloneable handle to a running PeerLink service.
///
/// Commands are queued and applied in order by the service task. The service
/// stops, closing every channel, once the last handle is dropped.
pub struct PeerLinkHandle<M> {
    command_tx: mpsc::UnboundedSender<LinkCommand<M>>,
    router: Router<M>,
    events: EventEmitter,
}

impl<M> Clone for PeerLinkHandle<M> {
    fn clone(&self) -> Self {
        Self {
            command_tx: self.command_tx.clone(),
            router: self.router.clone(),
            events: self.events.clone(),
        }
    }
}

impl<M: LinkMessage> PeerLinkHandle<M> {
    /// Create a new handle from a command sender and the shared fan-out channels.
    pub fn new(
        command_tx: mpsc::UnboundedSender<LinkCommand<M>>,
        router: Router<M>,
        events: EventEmitter,
    ) -> Self {
        Self {
            command_tx,
            router,
            events,
        }
    }

    fn send(&self, cmd: LinkCommand<M>) -> Result<(), PeerLinkError> {
        self.command_tx
            .send(cmd)
            .map_err(|_| PeerLinkError::ServiceStopped)
    }

    /// Start accepting on `addr`, replacing the current listener. Returns the bound address.
    pub async fn listen(&self, addr: SocketAddr) -> Result<SocketAddr, PeerLinkError> {
        let (tx, rx) = oneshot::channel();
        self.send(LinkCommand::Listen {
            addr,
            response_tx: tx,
        })?;
        rx.await.map_err(|_| PeerLinkError::ServiceStopped)?
    }

    /// Connect to `endpoint`. Any existing channel to it is closed first.
    /// With multiple links disallowed, the currently connected peer is
    /// disconnected to make room.
    ///
    /// Completion is reported as [`LinkEvent::Connected`] or [`LinkEvent::Error`].
    pub fn dial(&self, endpoint: Endpoint) -> Result<(), PeerLinkError> {
        self.send(LinkCommand::Dial { endpoint })
    }

    /// Close the channel to `endpoint`, if any.
    pub fn close(&self, endpoint: Endpoint) -> Result<(), PeerLinkError> {
        self.send(LinkCommand::Close { endpoint })
    }

    /// Close every channel and stop accepting.
    pub fn close_all(&self) -> Result<(), PeerLinkError> {
        self.send(LinkCommand::CloseAll)
    }

    /// Change the connection policy for future admissions.
    pub fn set_allow_multi(&self, allow_multi: bool) -> Result<(), PeerLinkError> {
        self.send(LinkCommand::SetAllowMulti { allow_multi })
    }

    /// Write a payload to every registered channel.
    pub fn broadcast(&self, message: impl Into<M>) -> Result<(), PeerLinkError> {
        self.send(LinkCommand::Broadcast {
            message: message.into(),
        })
    }

    /// Endpoints currently registered.
    pub async fn peers(&self) -> Result<Vec<Endpoint>, PeerLinkError> {
        let (tx, rx) = oneshot::channel();
        self.send(LinkCommand::Peers { response_tx: tx })?;
        rx.await.map_err(|_| PeerLinkError::ServiceStopped)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    /// Inbound payloads of type `T` from any registered channel.
    pub fn subscribe<T: TryFrom<M>>(&self) -> Received<M, T> {
        self.router.subscribe()
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<Delivery<M>> {
        self.router.subscribe_all()
    }
}
