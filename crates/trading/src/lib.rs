//! Trading domain module: trades between stations and the domain events the
//! settlement pipeline publishes about them.

pub mod event;
pub mod trade;

pub use event::{
    AdjustmentReason, CargoCreated, CargoUpdated, DomainEvent, FailureReason, InventoryAdjusted,
    SettlementFailed, TradeInitiated, topics,
};
pub use trade::{Trade, TradeRequest, TradeStatus};
