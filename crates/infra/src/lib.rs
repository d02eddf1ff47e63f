//! Infrastructure layer: record store, settlement pipeline, real-time fan-out, config.

pub mod broadcast;
pub mod config;
pub mod locks;
pub mod settlement;
pub mod store;

#[cfg(test)]
mod integration_tests;

pub use broadcast::{BroadcastHub, HubError, SubscriberId};
pub use config::{ConfigError, StarportConfig};
pub use locks::{KeyedGuard, KeyedLocks};
pub use settlement::{
    Settlement, SettlementError, SettlementOutcome, SettlementPool, SettlementSettings, SettlementWorker,
};
pub use store::{InMemoryStore, Record, RecordKind, Store, StoreError, UnitOfWork};
