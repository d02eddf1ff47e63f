//! Real-time fan-out of domain events to long-lived subscribers.
//!
//! The hub listens to every topic on the bus and copies each envelope into one
//! bounded queue per subscriber. Queues are independent: a subscriber that stops
//! reading fills its own queue and is dropped, while everyone else (and the
//! publisher) carries on.
//!
//! Delivery runs inside the bus publish, so each subscriber receives envelopes in
//! strictly increasing sequence order, exactly once, starting with the first event
//! published after `join` returned.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, TrySendError};
use std::sync::{Arc, Mutex, Weak};

use thiserror::Error;
use tracing::{debug, warn};

use starport_events::{EventBus, EventEnvelope, HandlerError, Subscription, SubscriptionHandle};
use starport_trading::{DomainEvent, topics};

/// Identifies one joined subscriber; pass it to `leave`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "subscriber-{}", self.0)
    }
}

/// Why a subscriber stopped receiving events. Never reported to publishers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HubError {
    #[error("{subscriber} fell {capacity} events behind and was dropped")]
    SubscriberBackpressure { subscriber: SubscriberId, capacity: usize },

    #[error("{subscriber} closed its queue")]
    SubscriberGone { subscriber: SubscriberId },
}

type Delivery = EventEnvelope<DomainEvent>;

pub struct BroadcastHub {
    subscribers: Mutex<BTreeMap<SubscriberId, mpsc::SyncSender<Delivery>>>,
    bus_handles: Mutex<Vec<SubscriptionHandle>>,
    capacity: usize,
    next_id: AtomicU64,
    dropped: AtomicU64,
}

impl BroadcastHub {
    /// `capacity` is the per-subscriber queue length (at least 1).
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            subscribers: Mutex::new(BTreeMap::new()),
            bus_handles: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
            dropped: AtomicU64::new(0),
        })
    }

    /// Subscribe the hub to every domain topic on `bus`.
    ///
    /// The bus only keeps a weak reference: dropping the last `Arc<BroadcastHub>`
    /// silently turns the handlers into no-ops.
    pub fn attach<B>(self: &Arc<Self>, bus: &B)
    where
        B: EventBus<DomainEvent>,
    {
        let mut handles = Vec::with_capacity(topics::ALL.len());
        for topic in topics::ALL {
            let hub: Weak<Self> = Arc::downgrade(self);
            handles.push(bus.subscribe(
                topic,
                Arc::new(move |envelope: &Delivery| -> Result<(), HandlerError> {
                    if let Some(hub) = hub.upgrade() {
                        hub.fan_out(envelope);
                    }
                    Ok(())
                }),
            ));
        }
        lock(&self.bus_handles).extend(handles);
    }

    /// Unsubscribe the hub from `bus`. Joined subscribers stay joined but receive nothing.
    pub fn detach<B>(&self, bus: &B)
    where
        B: EventBus<DomainEvent>,
    {
        for handle in lock(&self.bus_handles).drain(..) {
            bus.unsubscribe(handle);
        }
    }

    /// Start receiving every event published from now on.
    pub fn join(&self) -> (SubscriberId, Subscription<Delivery>) {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::sync_channel(self.capacity);
        lock(&self.subscribers).insert(id, tx);
        debug!(subscriber = %id, "subscriber joined");
        (id, Subscription::new(rx))
    }

    /// Stop delivery to `id` and release its queue. Returns `false` if it was not joined.
    pub fn leave(&self, id: SubscriberId) -> bool {
        let removed = lock(&self.subscribers).remove(&id).is_some();
        if removed {
            debug!(subscriber = %id, "subscriber left");
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    /// Subscribers dropped so far for backpressure or a closed queue.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn fan_out(&self, envelope: &Delivery) {
        let mut subscribers = lock(&self.subscribers);
        let mut failed = Vec::new();

        for (id, tx) in subscribers.iter() {
            match tx.try_send(envelope.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => failed.push(HubError::SubscriberBackpressure {
                    subscriber: *id,
                    capacity: self.capacity,
                }),
                Err(TrySendError::Disconnected(_)) => failed.push(HubError::SubscriberGone { subscriber: *id }),
            }
        }

        for err in failed {
            let subscriber = match &err {
                HubError::SubscriberBackpressure { subscriber, .. } | HubError::SubscriberGone { subscriber } => {
                    *subscriber
                }
            };
            subscribers.remove(&subscriber);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            match err {
                HubError::SubscriberBackpressure { .. } => {
                    warn!(error = %err, sequence = envelope.sequence_number(), "dropping slow subscriber")
                }
                HubError::SubscriberGone { .. } => debug!(error = %err, "removing closed subscriber"),
            }
        }
    }
}

impl core::fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("subscribers", &self.subscriber_count())
            .field("capacity", &self.capacity)
            .field("dropped", &self.dropped_count())
            .finish()
    }
}

/// The protected maps stay consistent even if a holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
