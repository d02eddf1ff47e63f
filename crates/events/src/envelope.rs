use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope for a published event.
///
/// This is the unit handlers and subscribers receive.
///
/// Notes:
/// - `sequence_number` is assigned by the bus at publish time and is strictly
///   increasing across all topics of one bus. It is the total order consumers sort by.
/// - `payload` is an immutable snapshot of the event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,

    /// Monotonically increasing position in the bus stream (first event = 1).
    sequence_number: u64,

    published_at: DateTime<Utc>,

    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(event_id: Uuid, sequence_number: u64, published_at: DateTime<Utc>, payload: E) -> Self {
        Self {
            event_id,
            sequence_number,
            published_at,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}
