//! PeerLink - endpoint-keyed connection registry with a single/multi link policy.
//!
//! Every live channel is keyed by the peer's [`Endpoint`], and at most one channel
//! per endpoint is registered at any time. A newer channel to the same endpoint
//! replaces the older one. When multi-peer mode is off the registry holds at most
//! one channel in total.
//!
//! # Actor Pattern
//!
//! - [`PeerLinkService`] runs in its own tokio task and owns the registry
//! - [`PeerLinkHandle`] is cheap-to-clone and used to send commands
//!
//! Use [`create_peerlink`] to create the service and handle pair, or
//! [`spawn_peerlink`] to also spawn the service.
//!
//! # Teardown
//!
//! Replacing a channel from `dial` requests a disconnect and keeps the old channel
//! draining until the remote confirms or the disconnect timeout elapses. Every
//! other close path releases the channel immediately.
//!
//! # Payloads
//!
//! The [`Router`] is generic over the caller's message taxonomy. Typed
//! subscriptions select the variants convertible into the requested type.

pub mod channel;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod handle;
mod metrics;
pub mod policy;
pub mod registry;
pub mod router;
pub mod service;
mod teardown;
pub mod transport;

pub use channel::{
    Channel, ChannelEvent, ChannelEvents, ChannelHandle, ChannelId, ChannelState, Direction,
    EventSink, LinkMessage, RawChannel, ReleaseReason,
};
pub use config::{DEFAULT_DISCONNECT_TIMEOUT, PeerLinkConfig};
pub use endpoint::Endpoint;
pub use error::{ChannelError, PeerLinkError, RegistryError};
pub use events::{EventEmitter, LinkEvent};
pub use handle::PeerLinkHandle;
pub use policy::{Admission, admit};
pub use registry::ConnectionRegistry;
pub use router::{Delivery, Received, Router};
pub use service::{LinkCommand, PeerLinkService, create_peerlink, spawn_peerlink};
pub use transport::{Acceptor, Transport};
