//! TCP transport configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_LINGER: Duration = Duration::from_secs(5);

/// Largest accepted frame, payload only.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    /// A dial still connecting after this long fails with a connect timeout. Seconds on disk.
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,
    pub max_frame_size: usize,
    /// Set `TCP_NODELAY` on every connection.
    pub nodelay: bool,
    /// How long a released connection keeps flushing and waiting for the peer
    /// to close after a disconnect request. Seconds on disk.
    #[serde(with = "duration_secs")]
    pub linger: Duration,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            nodelay: true,
            linger: DEFAULT_LINGER,
        }
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
