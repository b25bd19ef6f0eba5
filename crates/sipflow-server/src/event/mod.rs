//! Typed in-process publish/subscribe
//!
//! Each subscription owns a bounded buffer. Publishing never blocks: when a
//! subscriber's buffer is full the event is dropped for that subscriber only.
//! Delivery order per subscriber equals publish order.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub mod ingest;
pub mod serializer;

pub use ingest::IngestEvent;
pub use serializer::{JsonSerializer, SerializeError, Serializer};

/// Per-subscriber buffer capacity.
pub const DEFAULT_BUFFER_SIZE: usize = 128;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("subscribe: no async runtime available")]
    NoRuntime,

    #[error("subscribe: context already cancelled")]
    Cancelled,
}

pub trait EventService<E>: Send + Sync {
    /// Best-effort delivery to every live subscription.
    fn publish_event(&self, event: E);

    /// Cancelling `cancel` closes the returned subscription.
    fn subscribe(&self, cancel: CancellationToken) -> Result<Subscription<E>, EventError>;
}

/// Receiving end of a subscription. Dropping it closes the subscription.
pub struct Subscription<E> {
    rx: mpsc::Receiver<E>,
    cancel: CancellationToken,
    on_close: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl<E> fmt::Debug for Subscription<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.on_close.is_none())
            .finish()
    }
}

impl<E> Subscription<E> {
    pub fn new(
        rx: mpsc::Receiver<E>,
        cancel: CancellationToken,
        on_close: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            rx,
            cancel,
            on_close: Some(Box::new(on_close)),
        }
    }

    /// Next event in publish order; `None` once the subscription is closed.
    pub async fn recv(&mut self) -> Option<E> {
        if self.on_close.is_none() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.close();
                None
            }
            event = self.rx.recv() => event,
        }
    }

    /// Idempotent.
    pub fn close(&mut self) {
        if let Some(on_close) = self.on_close.take() {
            self.cancel.cancel();
            self.rx.close();
            on_close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.on_close.is_none()
    }
}

impl<E> Drop for Subscription<E> {
    fn drop(&mut self) {
        self.close();
    }
}

struct Registry<E> {
    next_id: AtomicU64,
    subscribers: RwLock<HashMap<u64, mpsc::Sender<E>>>,
}

impl<E> Registry<E> {
    fn insert(&self, tx: mpsc::Sender<E>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        id
    }

    fn remove(&self, id: u64) {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    fn len(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// [`EventService`] delivering through bounded tokio channels.
pub struct InMemoryEventService<E> {
    registry: Arc<Registry<E>>,
    buffer_size: usize,
}

impl<E> Clone for InMemoryEventService<E> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            buffer_size: self.buffer_size,
        }
    }
}

impl<E> Default for InMemoryEventService<E> {
    fn default() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }
}

impl<E> InMemoryEventService<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// A zero size is treated as one.
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            registry: Arc::new(Registry {
                next_id: AtomicU64::new(0),
                subscribers: RwLock::new(HashMap::new()),
            }),
            buffer_size: buffer_size.max(1),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }
}

impl<E> EventService<E> for InMemoryEventService<E>
where
    E: Clone + Send + Sync + 'static,
{
    fn publish_event(&self, event: E) {
        let subscribers = self
            .registry
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for (id, tx) in subscribers.iter() {
            match tx.try_send(event.clone()) {
                Ok(()) => {},
                Err(TrySendError::Full(_)) => {
                    debug!(subscription = id, "subscriber buffer full, dropping event");
                },
                Err(TrySendError::Closed(_)) => {},
            }
        }
    }

    fn subscribe(&self, cancel: CancellationToken) -> Result<Subscription<E>, EventError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| EventError::NoRuntime)?;
        if cancel.is_cancelled() {
            return Err(EventError::Cancelled);
        }

        let (tx, rx) = mpsc::channel(self.buffer_size);
        let id = self.registry.insert(tx);
        let token = cancel.child_token();

        // Drop the sender as soon as the context is cancelled, even if the
        // subscriber never polls again.
        let registry = Arc::clone(&self.registry);
        let watched = token.clone();
        handle.spawn(async move {
            watched.cancelled().await;
            registry.remove(id);
        });

        let registry = Arc::clone(&self.registry);
        Ok(Subscription::new(rx, token, move || registry.remove(id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_per_subscriber() {
        let bus = InMemoryEventService::new();
        let mut a = bus.subscribe(CancellationToken::new()).unwrap();
        let mut b = bus.subscribe(CancellationToken::new()).unwrap();

        for i in 0..10 {
            bus.publish_event(i);
        }

        for i in 0..10 {
            assert_eq!(a.recv().await, Some(i));
            assert_eq!(b.recv().await, Some(i));
        }
    }

    #[tokio::test]
    async fn test_publish_never_blocks_on_full_buffer() {
        let bus = InMemoryEventService::with_buffer_size(4);
        let mut sub = bus.subscribe(CancellationToken::new()).unwrap();

        for i in 0..10 {
            bus.publish_event(i);
        }

        for i in 0..4 {
            assert_eq!(sub.recv().await, Some(i));
        }
        let next = tokio::time::timeout(Duration::from_millis(20), sub.recv()).await;
        assert!(next.is_err(), "overflowed events must be dropped");
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_unregisters() {
        let bus = InMemoryEventService::<u8>::new();
        let mut sub = bus.subscribe(CancellationToken::new()).unwrap();
        assert_eq!(bus.subscriber_count(), 1);

        sub.close();
        sub.close();
        assert!(sub.is_closed());
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(sub.recv().await, None);

        bus.publish_event(1);
    }

    #[tokio::test]
    async fn test_drop_unregisters() {
        let bus = InMemoryEventService::<u8>::new();
        {
            let _sub = bus.subscribe(CancellationToken::new()).unwrap();
            assert_eq!(bus.subscriber_count(), 1);
        }
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_closes_subscription() {
        let bus = InMemoryEventService::<u8>::new();
        let cancel = CancellationToken::new();
        let mut sub = bus.subscribe(cancel.clone()).unwrap();

        cancel.cancel();
        assert_eq!(sub.recv().await, None);
        assert!(sub.is_closed());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_without_polling_unregisters() {
        let bus = InMemoryEventService::<u8>::new();
        let cancel = CancellationToken::new();
        let _sub = bus.subscribe(cancel.clone()).unwrap();

        cancel.cancel();
        for _ in 0..10 {
            if bus.subscriber_count() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_with_cancelled_context() {
        let bus = InMemoryEventService::<u8>::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(bus.subscribe(cancel).unwrap_err(), EventError::Cancelled);
    }

    #[test]
    fn test_subscribe_outside_runtime() {
        let bus = InMemoryEventService::<u8>::new();
        assert_eq!(
            bus.subscribe(CancellationToken::new()).unwrap_err(),
            EventError::NoRuntime
        );
    }
}
