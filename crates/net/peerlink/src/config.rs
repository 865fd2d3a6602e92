//! Coordinator configuration.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::events::DEFAULT_CHANNEL_CAPACITY;
use crate::router::DEFAULT_DELIVERY_CAPACITY;

/// Wait for a replaced channel's disconnect confirmation before forcing release.
pub const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Link coordinator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerLinkConfig {
    /// `false`: a single global connection slot. `true`: any number of distinct peers.
    pub allow_multi: bool,
    /// Address to listen on when the service starts.
    pub listen: Option<SocketAddr>,
    /// Fallback deadline for graceful close, in seconds on disk.
    #[serde(with = "duration_secs")]
    pub disconnect_timeout: Duration,
    /// Broadcast channel capacity for link events.
    pub event_channel_capacity: usize,
    /// Broadcast channel capacity for inbound payloads.
    pub delivery_channel_capacity: usize,
}

impl Default for PeerLinkConfig {
    fn default() -> Self {
        Self {
            allow_multi: false,
            listen: None,
            disconnect_timeout: DEFAULT_DISCONNECT_TIMEOUT,
            event_channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            delivery_channel_capacity: DEFAULT_DELIVERY_CAPACITY,
        }
    }
}

impl PeerLinkConfig {
    /// Config allowing any number of distinct peers.
    pub fn multi() -> Self {
        Self {
            allow_multi: true,
            ..Default::default()
        }
    }

    pub fn with_disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.disconnect_timeout = timeout;
        self
    }

    pub fn with_listen(mut self, addr: SocketAddr) -> Self {
        self.listen = Some(addr);
        self
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
