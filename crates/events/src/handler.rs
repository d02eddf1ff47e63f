use thiserror::Error;

use crate::EventEnvelope;

/// Why a handler could not take an event.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The handler refused the event (malformed, unexpected topic, ...).
    #[error("handler rejected event: {0}")]
    Rejected(String),

    /// The queue behind the handler is gone (consumer shut down).
    #[error("handler downstream closed: {0}")]
    Closed(String),
}

impl HandlerError {
    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    pub fn closed(msg: impl Into<String>) -> Self {
        Self::Closed(msg.into())
    }
}

/// Receives published envelopes for one topic.
///
/// Implementations are invoked on the publisher's thread and must return quickly.
pub trait EventHandler<E>: Send + Sync {
    fn handle(&self, envelope: &EventEnvelope<E>) -> Result<(), HandlerError>;
}

impl<E, F> EventHandler<E> for F
where
    F: Fn(&EventEnvelope<E>) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, envelope: &EventEnvelope<E>) -> Result<(), HandlerError> {
        self(envelope)
    }
}
