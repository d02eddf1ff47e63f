//! Event publishing/subscription abstraction (mechanics only).
//!
//! This module provides the **event bus pattern**: a topic-based pub/sub mechanism
//! that decouples producers (API handlers, the settlement worker) from consumers
//! (the settlement worker, the broadcast hub).
//!
//! ## Delivery Guarantees
//!
//! - **At-most-once, best-effort**: nothing is persisted; events published while a
//!   handler is not registered are never redelivered to it.
//! - **Total order**: every published event gets the next sequence number. Handlers
//!   observe events in strictly increasing sequence order.
//! - **Subscription order**: handlers of one topic are invoked in the order they
//!   subscribed.
//! - **Isolation**: a handler returning an error (or panicking) does not prevent
//!   other handlers from receiving the event, and is never reported to the publisher.
//!
//! ## Handler Contract
//!
//! Handlers run inline on the publishing thread. They must not block and must not
//! publish on the same bus synchronously; hand the envelope off to a queue instead
//! (see `Subscription`).

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use thiserror::Error;

use crate::{EventEnvelope, EventHandler};

/// A consumer-owned queue of messages.
///
/// Subscriptions are fed by a producer (the broadcast hub, a worker dispatcher) and
/// drained by exactly one consumer. Dropping the subscription closes the queue; the
/// producer notices on its next send.
///
/// ## Usage Pattern
///
/// ```ignore
/// let (id, subscription) = hub.join();
///
/// loop {
///     match subscription.recv_timeout(Duration::from_secs(1)) {
///         Ok(envelope) => forward(envelope)?,
///         Err(RecvTimeoutError::Timeout) => continue,      // check for shutdown
///         Err(RecvTimeoutError::Disconnected) => break,    // dropped by the hub
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently queued without blocking.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

/// Handle returned by `EventBus::subscribe`; pass it to `unsubscribe` to stop delivery.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    topic: &'static str,
}

impl SubscriptionHandle {
    pub fn new(id: u64, topic: &'static str) -> Self {
        Self { id, topic }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn topic(&self) -> &'static str {
        self.topic
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Publish failed due to internal lock poisoning.
    #[error("event bus lock poisoned")]
    Poisoned,
}

/// Topic-based event bus (pub/sub abstraction).
///
/// ```text
/// API ── publish(trade.initiated) ──► EventBus ──► SettlementWorker
///                                       ▲   └────► BroadcastHub ──► subscribers
///  SettlementWorker ── publish(cargo.created, inventory.adjusted) ─┘
/// ```
///
/// The trait requires `Send + Sync`: any thread may publish or subscribe.
pub trait EventBus<E>: Send + Sync {
    /// Assign the next sequence number and deliver to every handler of the event's topic.
    ///
    /// Returns the published envelope. Handler failures are not reported here.
    fn publish(&self, event: E) -> Result<EventEnvelope<E>, BusError>;

    /// Register a handler for `topic`.
    fn subscribe(&self, topic: &'static str, handler: Arc<dyn EventHandler<E>>) -> SubscriptionHandle;

    /// Remove a handler. Returns `false` if it was not (or no longer) registered.
    fn unsubscribe(&self, handle: SubscriptionHandle) -> bool;
}

impl<E, B> EventBus<E> for Arc<B>
where
    B: EventBus<E> + ?Sized,
{
    fn publish(&self, event: E) -> Result<EventEnvelope<E>, BusError> {
        (**self).publish(event)
    }

    fn subscribe(&self, topic: &'static str, handler: Arc<dyn EventHandler<E>>) -> SubscriptionHandle {
        (**self).subscribe(topic, handler)
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        (**self).unsubscribe(handle)
    }
}
