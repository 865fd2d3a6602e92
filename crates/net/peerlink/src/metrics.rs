//! Link Coordinator Metrics

use metrics::{Counter, Gauge};

use crate::channel::ReleaseReason;

/// Link Coordinator Metrics
#[derive(Clone, Debug)]
pub(crate) struct PeerLinkMetrics {
    /// Number of channels inserted into the registry
    channels_registered_total: Counter,
    /// Number of connection attempts denied by the policy
    admissions_rejected_total: Counter,
    /// Number of writes that failed immediately during a broadcast
    broadcast_write_failures_total: Counter,
    /// Channels currently registered
    registry_size: Gauge,
    /// Channels evicted but awaiting disconnect confirmation
    teardown_pending: Gauge,
}

impl Default for PeerLinkMetrics {
    fn default() -> Self {
        Self {
            channels_registered_total: metrics::counter!("peerlink.channels.registered_total"),
            admissions_rejected_total: metrics::counter!("peerlink.admissions.rejected_total"),
            broadcast_write_failures_total: metrics::counter!(
                "peerlink.broadcast.write_failures_total"
            ),
            registry_size: metrics::gauge!("peerlink.registry.size"),
            teardown_pending: metrics::gauge!("peerlink.teardown.pending"),
        }
    }
}

impl PeerLinkMetrics {
    pub(crate) fn inc_registered(&self) {
        self.channels_registered_total.increment(1);
    }

    pub(crate) fn inc_rejected(&self) {
        self.admissions_rejected_total.increment(1);
    }

    pub(crate) fn inc_write_failures(&self) {
        self.broadcast_write_failures_total.increment(1);
    }

    pub(crate) fn inc_released(&self, reason: ReleaseReason) {
        metrics::counter!("peerlink.channels.released_total", "reason" => reason.as_str())
            .increment(1);
    }

    pub(crate) fn set_sizes(&self, registry: usize, teardown: usize) {
        self.registry_size.set(registry as f64);
        self.teardown_pending.set(teardown as f64);
    }
}
