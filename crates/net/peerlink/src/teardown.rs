//! Channels evicted from the registry whose disconnect is still in flight.

use std::collections::HashMap;

use futures::StreamExt;
use tokio::time::Instant;
use tokio_stream::StreamMap;

use crate::channel::{ChannelEvent, ChannelEvents, ChannelHandle, ChannelId};

struct Draining<M> {
    handle: ChannelHandle<M>,
    deadline: Instant,
}

/// Owns draining channels until their disconnect is confirmed or their deadline passes.
pub(crate) struct PendingTeardown<M> {
    entries: HashMap<ChannelId, Draining<M>>,
    /// Kept only to observe confirmation; payloads are discarded.
    events: StreamMap<ChannelId, ChannelEvents<M>>,
}

impl<M> Default for PendingTeardown<M> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            events: StreamMap::new(),
        }
    }
}

impl<M: Send + 'static> PendingTeardown<M> {
    /// Request disconnect and start the fallback clock.
    pub(crate) fn begin(
        &mut self,
        mut handle: ChannelHandle<M>,
        events: Option<ChannelEvents<M>>,
        deadline: Instant,
    ) {
        handle.begin_disconnect();
        let id = handle.id();
        if let Some(events) = events {
            self.events.insert(id, events);
        }
        self.entries.insert(id, Draining { handle, deadline });
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().map(|d| d.deadline).min()
    }

    /// Next event from any draining channel. Pending forever when nothing drains.
    pub(crate) async fn next_event(&mut self) -> (ChannelId, ChannelEvent<M>) {
        loop {
            if self.events.is_empty() {
                std::future::pending::<()>().await;
            }
            if let Some(item) = self.events.next().await {
                return item;
            }
        }
    }

    /// Take a channel out once its disconnect is confirmed.
    pub(crate) fn confirm(&mut self, id: ChannelId) -> Option<ChannelHandle<M>> {
        self.events.remove(&id);
        self.entries.remove(&id).map(|d| d.handle)
    }

    /// Take every channel whose deadline is at or before `now`.
    pub(crate) fn expired(&mut self, now: Instant) -> Vec<ChannelHandle<M>> {
        let ids: Vec<ChannelId> = self
            .entries
            .iter()
            .filter(|(_, d)| d.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter().filter_map(|id| self.confirm(id)).collect()
    }

    pub(crate) fn drain(&mut self) -> Vec<ChannelHandle<M>> {
        self.events.clear();
        self.entries.drain().map(|(_, d)| d.handle).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
