//! Payloads exchanged between nodes.

use derive_more::{From, TryInto};
use serde::{Deserialize, Serialize};

/// A line of text typed by the remote operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ChatLine {
    pub(crate) text: String,
}

/// Liveness beacon; `seq` increases per sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Heartbeat {
    pub(crate) seq: u64,
}

/// Every payload the node sends or receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, From, TryInto)]
pub(crate) enum Payload {
    Chat(ChatLine),
    Heartbeat(Heartbeat),
}
