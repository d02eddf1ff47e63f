//! Domain events: envelopes, handlers and the in-process event bus.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;

pub use bus::{BusError, EventBus, Subscription, SubscriptionHandle};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::{EventHandler, HandlerError};
pub use in_memory_bus::InMemoryEventBus;
