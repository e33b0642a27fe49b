//! Generic publish/subscribe broker
//!
//! Each subscriber owns a bounded channel. Publishing uses `try_send`, so a
//! slow subscriber can lose events but can never stall the publisher.

use futures::Stream;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use super::event::{Event, EventType};

/// Default per-subscriber channel capacity
pub const DEFAULT_CHANNEL_BUFFER_SIZE: usize = 64;

/// What to do when a subscriber's channel is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackpressureStrategy {
    /// Drop the event for that subscriber only
    #[default]
    DropEvents,
    /// Drop the event and unsubscribe the slow subscriber
    RemoveSlowSubscribers,
}

struct BrokerInner<T> {
    subs: RwLock<HashMap<u64, mpsc::Sender<Event<T>>>>,
    next_id: AtomicU64,
    shut_down: AtomicBool,
    channel_buffer_size: usize,
    strategy: BackpressureStrategy,
    dropped_events: AtomicU64,
    slow_subs_removed: AtomicU64,
}

impl<T> BrokerInner<T> {
    fn remove(&self, id: u64) -> bool {
        self.subs.write().remove(&id).is_some()
    }
}

/// Fan-out broker for one payload type
///
/// Cloning a `Broker` yields another handle to the same subscriber set.
pub struct Broker<T> {
    inner: Arc<BrokerInner<T>>,
}

impl<T> Clone for Broker<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Broker<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("subscribers", &self.inner.subs.read().len())
            .field("strategy", &self.inner.strategy)
            .field("shut_down", &self.inner.shut_down.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + 'static> Default for Broker<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Broker<T> {
    /// Create a broker with default buffer size and the drop strategy
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(DEFAULT_CHANNEL_BUFFER_SIZE, BackpressureStrategy::DropEvents)
    }

    /// Create a broker with explicit buffer size and strategy
    ///
    /// # Panics
    /// Panics if `channel_buffer_size` is zero
    #[must_use]
    pub fn with_options(channel_buffer_size: usize, strategy: BackpressureStrategy) -> Self {
        assert!(channel_buffer_size > 0, "channel buffer size must be positive");
        Self {
            inner: Arc::new(BrokerInner {
                subs: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                shut_down: AtomicBool::new(false),
                channel_buffer_size,
                strategy,
                dropped_events: AtomicU64::new(0),
                slow_subs_removed: AtomicU64::new(0),
            }),
        }
    }

    /// Subscribe to future events
    ///
    /// After [`shutdown`](Self::shutdown) the returned subscription is already
    /// closed.
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::channel(self.inner.channel_buffer_size);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        {
            let mut subs = self.inner.subs.write();
            if !self.inner.shut_down.load(Ordering::Acquire) {
                subs.insert(id, tx);
            }
        }

        Subscription {
            id,
            rx,
            broker: Arc::downgrade(&self.inner),
            guard: CancellationToken::new(),
        }
    }

    /// Subscribe until `cancel` fires, then unsubscribe automatically
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe_until(&self, cancel: CancellationToken) -> Subscription<T> {
        let subscription = self.subscribe();
        let id = subscription.id;
        let broker = Weak::clone(&subscription.broker);
        let guard = subscription.guard.clone();

        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {
                    if let Some(inner) = broker.upgrade() {
                        inner.remove(id);
                    }
                }
                () = guard.cancelled() => {}
            }
        });

        subscription
    }

    /// Publish an event to every current subscriber without blocking
    pub fn publish(&self, event_type: EventType, payload: T) {
        let event = Event::new(event_type, payload);
        let mut to_remove = Vec::new();

        {
            // Delivery happens under the read lock so an unsubscribe (write
            // lock) can never interleave with a send to the same subscriber.
            let subs = self.inner.subs.read();
            if self.inner.shut_down.load(Ordering::Acquire) {
                return;
            }

            for (id, tx) in subs.iter() {
                match tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        self.inner.dropped_events.fetch_add(1, Ordering::Relaxed);
                        if self.inner.strategy == BackpressureStrategy::RemoveSlowSubscribers {
                            to_remove.push(*id);
                        }
                    }
                    Err(TrySendError::Closed(_)) => to_remove.push(*id),
                }
            }
        }

        if to_remove.is_empty() {
            return;
        }

        let mut subs = self.inner.subs.write();
        for id in to_remove {
            if let Some(tx) = subs.remove(&id)
                && !tx.is_closed()
            {
                self.inner.slow_subs_removed.fetch_add(1, Ordering::Relaxed);
                log::debug!("Removed slow subscriber {id}");
            }
        }
    }

    /// Close every subscriber and reject future deliveries
    pub fn shutdown(&self) {
        let mut subs = self.inner.subs.write();
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        subs.clear();
    }

    /// Number of live subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subs.read().len()
    }

    /// Total events dropped because a subscriber was full
    #[must_use]
    pub fn dropped_event_count(&self) -> u64 {
        self.inner.dropped_events.load(Ordering::Relaxed)
    }

    /// Total subscribers removed by [`BackpressureStrategy::RemoveSlowSubscribers`]
    #[must_use]
    pub fn slow_subscribers_removed(&self) -> u64 {
        self.inner.slow_subs_removed.load(Ordering::Relaxed)
    }
}

/// A consumer-owned event stream
///
/// Dropping the subscription (or calling [`unsubscribe`](Self::unsubscribe))
/// removes it from the broker.
pub struct Subscription<T> {
    id: u64,
    rx: mpsc::Receiver<Event<T>>,
    broker: Weak<BrokerInner<T>>,
    guard: CancellationToken,
}

impl<T: Send + 'static> Subscription<T> {
    /// Receive the next event; `None` once unsubscribed and drained
    pub async fn recv(&mut self) -> Option<Event<T>> {
        self.rx.recv().await
    }

    /// Receive the next event unless `cancel` fires first
    pub async fn recv_until(&mut self, cancel: &CancellationToken) -> Option<Event<T>> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            event = self.rx.recv() => event,
        }
    }

    /// Take a buffered event without waiting
    pub fn try_recv(&mut self) -> Option<Event<T>> {
        self.rx.try_recv().ok()
    }

    /// Stop receiving events
    pub fn unsubscribe(self) {
        drop(self);
    }

    /// Convert into a `Stream` of events
    pub fn into_stream(mut self) -> impl Stream<Item = Event<T>> {
        async_stream::stream! {
            while let Some(event) = self.rx.recv().await {
                yield event;
            }
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.guard.cancel();
        if let Some(inner) = self.broker.upgrade() {
            inner.remove(self.id);
        }
    }
}
