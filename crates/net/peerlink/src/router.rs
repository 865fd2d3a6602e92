//! Generic fan-out of outbound payloads and fan-in of inbound payloads.
//!
//! The router is parameterised by the caller's message taxonomy `M`, usually an
//! enum with one variant per payload type. Typed views are obtained with
//! [`Router::subscribe`], which keeps only the payloads convertible into `T`.

use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{trace, warn};

use crate::channel::{ChannelId, LinkMessage};
use crate::endpoint::Endpoint;
use crate::error::ChannelError;
use crate::registry::ConnectionRegistry;

pub(crate) const DEFAULT_DELIVERY_CAPACITY: usize = 1024;

/// An inbound payload and the endpoint it arrived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery<T> {
    pub endpoint: Endpoint,
    pub payload: T,
}

/// A write that failed while broadcasting. The channel is treated as errored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WriteFailure {
    pub(crate) endpoint: Endpoint,
    pub(crate) id: ChannelId,
    pub(crate) cause: ChannelError,
}

/// Multiplexes every registered channel's inbound payloads into one stream.
///
/// Reads the registry to broadcast, never mutates its membership.
#[derive(Debug)]
pub struct Router<M> {
    tx: broadcast::Sender<Delivery<M>>,
}

impl<M> Clone for Router<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<M: LinkMessage> Default for Router<M> {
    fn default() -> Self {
        Self::new(DEFAULT_DELIVERY_CAPACITY)
    }
}

impl<M: LinkMessage> Router<M> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Write `message` to every registered channel. One failure does not stop the rest.
    pub(crate) fn broadcast(
        &self,
        registry: &mut ConnectionRegistry<M>,
        message: &M,
    ) -> Vec<WriteFailure> {
        let mut failures = Vec::new();
        registry.for_each(|handle| {
            if let Err(cause) = handle.write(message.clone()) {
                failures.push(WriteFailure {
                    endpoint: handle.endpoint(),
                    id: handle.id(),
                    cause,
                });
            }
        });
        trace!(peers = registry.len(), failed = failures.len(), "broadcast payload");
        failures
    }

    /// Republish a payload received on a registered channel.
    pub(crate) fn publish(&self, endpoint: Endpoint, payload: M) {
        trace!(%endpoint, "routing inbound payload");
        let _ = self.tx.send(Delivery { endpoint, payload });
    }

    /// Every inbound payload, untyped.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Delivery<M>> {
        self.tx.subscribe()
    }

    /// Inbound payloads of type `T` only.
    pub fn subscribe<T>(&self) -> Received<M, T>
    where
        T: TryFrom<M>,
    {
        Received {
            inner: BroadcastStream::new(self.tx.subscribe()),
            _marker: PhantomData,
        }
    }
}

/// Typed stream of inbound payloads. Per-channel order is preserved; there is no
/// global order across channels.
pub struct Received<M, T> {
    inner: BroadcastStream<Delivery<M>>,
    _marker: PhantomData<fn() -> T>,
}

impl<M, T> Received<M, T>
where
    M: LinkMessage,
    T: TryFrom<M>,
{
    /// Next payload of type `T`, or `None` once the router is gone.
    pub async fn recv(&mut self) -> Option<Delivery<T>> {
        self.next().await
    }
}

impl<M, T> Stream for Received<M, T>
where
    M: LinkMessage,
    T: TryFrom<M>,
{
    type Item = Delivery<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match ready!(self.inner.poll_next_unpin(cx)) {
                Some(Ok(delivery)) => {
                    if let Ok(payload) = T::try_from(delivery.payload) {
                        return Poll::Ready(Some(Delivery {
                            endpoint: delivery.endpoint,
                            payload,
                        }));
                    }
                }
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!(skipped, "receiver lagged, inbound payloads dropped");
                }
                None => return Poll::Ready(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::channel::ChannelHandle;
    use crate::channel::tests::CountingChannel;

    #[derive(Debug, Clone, PartialEq)]
    enum TestMessage {
        Text(String),
        Number(u32),
    }

    impl TryFrom<TestMessage> for String {
        type Error = TestMessage;
        fn try_from(m: TestMessage) -> Result<Self, Self::Error> {
            match m {
                TestMessage::Text(s) => Ok(s),
                other => Err(other),
            }
        }
    }

    impl TryFrom<TestMessage> for u32 {
        type Error = TestMessage;
        fn try_from(m: TestMessage) -> Result<Self, Self::Error> {
            match m {
                TestMessage::Number(n) => Ok(n),
                other => Err(other),
            }
        }
    }

    fn endpoint(port: u16) -> Endpoint {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[tokio::test]
    async fn test_typed_subscriptions_filter_by_type() {
        let router = Router::<TestMessage>::default();
        let mut texts = router.subscribe::<String>();
        let mut numbers = router.subscribe::<u32>();

        router.publish(endpoint(1), TestMessage::Number(7));
        router.publish(endpoint(2), TestMessage::Text("hello".into()));
        router.publish(endpoint(1), TestMessage::Number(8));

        let text = texts.recv().await.unwrap();
        assert_eq!(text.endpoint, endpoint(2));
        assert_eq!(text.payload, "hello");

        assert_eq!(numbers.recv().await.unwrap().payload, 7);
        assert_eq!(numbers.recv().await.unwrap().payload, 8);
    }

    #[tokio::test]
    async fn test_subscribe_all_sees_everything() {
        let router = Router::<TestMessage>::default();
        let mut all = router.subscribe_all();

        router.publish(endpoint(1), TestMessage::Number(1));
        router.publish(endpoint(1), TestMessage::Text("a".into()));

        assert_eq!(all.recv().await.unwrap().payload, TestMessage::Number(1));
        assert_eq!(all.recv().await.unwrap().payload, TestMessage::Text("a".into()));
    }

    #[tokio::test]
    async fn test_received_ends_with_router() {
        let router = Router::<TestMessage>::default();
        let mut numbers = router.subscribe::<u32>();
        drop(router);
        assert!(numbers.recv().await.is_none());
    }

    #[test]
    fn test_broadcast_continues_past_failures() {
        let mut registry = ConnectionRegistry::<u32>::new();

        let healthy = CountingChannel::to(endpoint(1));
        let healthy_writes = Arc::clone(&healthy.writes);
        registry
            .insert(ChannelHandle::inbound(Box::new(healthy)))
            .unwrap();

        let broken = CountingChannel {
            fail_writes: true,
            ..CountingChannel::to(endpoint(2))
        };
        registry
            .insert(ChannelHandle::inbound(Box::new(broken)))
            .unwrap();

        let other = CountingChannel::to(endpoint(3));
        let other_writes = Arc::clone(&other.writes);
        registry
            .insert(ChannelHandle::inbound(Box::new(other)))
            .unwrap();

        let router = Router::<u32>::default();
        let failures = router.broadcast(&mut registry, &42);

        assert_eq!(failures.len(), 1);
        assert_eq!(failures.first().map(|f| f.endpoint), Some(endpoint(2)));
        assert_eq!(healthy_writes.load(Ordering::SeqCst), 1);
        assert_eq!(other_writes.load(Ordering::SeqCst), 1);
        // Router never changes membership.
        assert_eq!(registry.len(), 3);
    }
}
