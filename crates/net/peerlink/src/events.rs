//! Public link events and non-blocking broadcast emitter.

use tokio::sync::broadcast;

use crate::endpoint::Endpoint;
use crate::error::ChannelError;

/// Events surfaced to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected {
        endpoint: Endpoint,
    },
    Disconnected {
        endpoint: Endpoint,
    },
    /// The channel was evicted and released.
    Error {
        endpoint: Endpoint,
        cause: ChannelError,
    },
}

impl LinkEvent {
    pub fn endpoint(&self) -> &Endpoint {
        match self {
            Self::Connected { endpoint }
            | Self::Disconnected { endpoint }
            | Self::Error { endpoint, .. } => endpoint,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

pub(crate) const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Non-blocking broadcast emitter. Slow subscribers drop events independently.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<LinkEvent>,
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, event: LinkEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn connected(&self, endpoint: Endpoint) {
        self.emit(LinkEvent::Connected { endpoint });
    }

    pub fn disconnected(&self, endpoint: Endpoint) {
        self.emit(LinkEvent::Disconnected { endpoint });
    }

    pub fn error(&self, endpoint: Endpoint, cause: ChannelError) {
        self.emit(LinkEvent::Error { endpoint, cause });
    }
}
