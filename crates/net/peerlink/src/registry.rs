//! Endpoint → channel mapping: the single source of truth for what is connected.

use std::collections::HashMap;
use std::fmt;

use crate::channel::{ChannelHandle, ChannelId};
use crate::endpoint::Endpoint;
use crate::error::RegistryError;

/// At most one live channel per [`Endpoint`].
///
/// Mutated only from the coordinator task, so no locking.
pub struct ConnectionRegistry<M> {
    channels: HashMap<Endpoint, ChannelHandle<M>>,
}

impl<M: 'static> Default for ConnectionRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: 'static> fmt::Debug for ConnectionRegistry<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.channels.values()).finish()
    }
}

impl<M: 'static> ConnectionRegistry<M> {
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
        }
    }

    pub fn lookup(&self, endpoint: &Endpoint) -> Option<&ChannelHandle<M>> {
        self.channels.get(endpoint)
    }

    pub(crate) fn lookup_mut(&mut self, endpoint: &Endpoint) -> Option<&mut ChannelHandle<M>> {
        self.channels.get_mut(endpoint)
    }

    /// Whether `endpoint` is held by exactly the channel `id`.
    pub fn holds(&self, endpoint: &Endpoint, id: ChannelId) -> bool {
        self.lookup(endpoint).is_some_and(|handle| handle.id() == id)
    }

    /// Insert a channel under its endpoint. Fails if the endpoint is taken; evict first.
    pub fn insert(
        &mut self,
        handle: ChannelHandle<M>,
    ) -> Result<(), (RegistryError, ChannelHandle<M>)> {
        let endpoint = handle.endpoint();
        if self.channels.contains_key(&endpoint) {
            return Err((RegistryError::DuplicateKey(endpoint), handle));
        }
        self.channels.insert(endpoint, handle);
        Ok(())
    }

    pub fn remove(&mut self, endpoint: &Endpoint) -> Option<ChannelHandle<M>> {
        self.channels.remove(endpoint)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.channels.keys().copied().collect()
    }

    /// Visit every registered channel, in no particular order.
    pub(crate) fn for_each(&mut self, mut visitor: impl FnMut(&mut ChannelHandle<M>)) {
        self.channels.values_mut().for_each(|handle| visitor(handle));
    }

    /// Remove and return every entry.
    pub(crate) fn drain(&mut self) -> impl Iterator<Item = ChannelHandle<M>> + '_ {
        self.channels.drain().map(|(_, handle)| handle)
    }
}
