//! In-memory event bus.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::bus::{BusError, EventBus, SubscriptionHandle};
use crate::{Event, EventEnvelope, EventHandler};

struct Registered<E> {
    id: u64,
    handler: Arc<dyn EventHandler<E>>,
}

impl<E> Clone for Registered<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            handler: self.handler.clone(),
        }
    }
}

/// In-memory, topic-based pub/sub bus.
///
/// - No IO / no async
/// - Sequence assignment and dispatch share one publish gate, so handlers see a
///   strictly increasing sequence even with concurrent publishers
/// - Handlers are snapshotted per publish: (un)subscribing from any thread, including
///   from inside a handler, is safe and takes effect for the next publish
pub struct InMemoryEventBus<E> {
    topics: RwLock<HashMap<&'static str, Vec<Registered<E>>>>,
    /// Last assigned sequence number; held for the whole publish.
    publish_gate: Mutex<u64>,
    next_handle: AtomicU64,
    handler_failures: AtomicU64,
}

impl<E> InMemoryEventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number of the most recently published event (0 before the first publish).
    pub fn last_sequence(&self) -> u64 {
        match self.publish_gate.lock() {
            Ok(seq) => *seq,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Number of handlers currently registered for `topic`.
    pub fn handler_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .map(|t| t.get(topic).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }

    /// Total handler invocations that returned an error or panicked.
    pub fn handler_failures(&self) -> u64 {
        self.handler_failures.load(Ordering::Relaxed)
    }
}

impl<E> Default for InMemoryEventBus<E> {
    fn default() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            publish_gate: Mutex::new(0),
            next_handle: AtomicU64::new(1),
            handler_failures: AtomicU64::new(0),
        }
    }
}

impl<E> core::fmt::Debug for InMemoryEventBus<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryEventBus")
            .field("last_sequence", &self.last_sequence())
            .field("handler_failures", &self.handler_failures())
            .finish_non_exhaustive()
    }
}

impl<E> EventBus<E> for InMemoryEventBus<E>
where
    E: Event,
{
    fn publish(&self, event: E) -> Result<EventEnvelope<E>, BusError> {
        let mut last = self.publish_gate.lock().map_err(|_| BusError::Poisoned)?;
        let topic = event.event_type();

        let handlers: Vec<Registered<E>> = {
            let topics = self.topics.read().map_err(|_| BusError::Poisoned)?;
            topics.get(topic).cloned().unwrap_or_default()
        };

        *last += 1;
        let envelope = EventEnvelope::new(Uuid::now_v7(), *last, Utc::now(), event);

        for registered in &handlers {
            let outcome = catch_unwind(AssertUnwindSafe(|| registered.handler.handle(&envelope)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    self.handler_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        topic,
                        handler = registered.id,
                        sequence = envelope.sequence_number(),
                        error = %err,
                        "event handler failed"
                    );
                }
                Err(_) => {
                    self.handler_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        topic,
                        handler = registered.id,
                        sequence = envelope.sequence_number(),
                        "event handler panicked"
                    );
                }
            }
        }

        Ok(envelope)
    }

    fn subscribe(&self, topic: &'static str, handler: Arc<dyn EventHandler<E>>) -> SubscriptionHandle {
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);

        // If the lock is poisoned we still hand out a handle; it just never fires.
        if let Ok(mut topics) = self.topics.write() {
            topics.entry(topic).or_default().push(Registered { id, handler });
        }

        SubscriptionHandle::new(id, topic)
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let Ok(mut topics) = self.topics.write() else {
            return false;
        };
        let Some(handlers) = topics.get_mut(handle.topic()) else {
            return false;
        };

        let before = handlers.len();
        handlers.retain(|r| r.id != handle.id());
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            topics.remove(handle.topic());
        }
        removed
    }
}
