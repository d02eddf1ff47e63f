//! Domain events published on the bus.
//!
//! Every variant carries an immutable snapshot of the records it talks about, so
//! subscribers never need to read the store to render an update.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use starport_cargo::{Cargo, CargoStatus};
use starport_core::{ItemId, StationId, TransactionId};
use starport_events::Event;
use starport_inventory::Inventory;

use crate::Trade;

/// Bus topics, one per `DomainEvent` variant.
pub mod topics {
    pub const TRADE_INITIATED: &str = "trade.initiated";
    pub const CARGO_CREATED: &str = "cargo.created";
    pub const INVENTORY_ADJUSTED: &str = "inventory.adjusted";
    pub const CARGO_UPDATED: &str = "cargo.updated";
    pub const SETTLEMENT_FAILED: &str = "settlement.failed";

    pub const ALL: [&str; 5] = [
        TRADE_INITIATED,
        CARGO_CREATED,
        INVENTORY_ADJUSTED,
        CARGO_UPDATED,
        SETTLEMENT_FAILED,
    ];
}

/// Event: a trade was accepted and awaits settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeInitiated {
    pub trade: Trade,
    pub occurred_at: DateTime<Utc>,
}

/// Event: settlement created the shipment for a trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CargoCreated {
    pub transaction_id: TransactionId,
    pub cargo: Cargo,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentReason {
    /// Seller side of a settled trade.
    Debit,
    /// Buyer side of a settled trade.
    Credit,
    /// Holdings replaced by an operator.
    Provisioned,
}

/// Event: a station's holdings changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryAdjusted {
    pub station_id: StationId,
    /// Trade that caused the change, if any.
    pub transaction_id: Option<TransactionId>,
    pub reason: AdjustmentReason,
    /// Signed change in quantity.
    pub delta: i64,
    /// Holdings after the change.
    pub inventory: Inventory,
    pub occurred_at: DateTime<Utc>,
}

/// Event: a shipment moved forward in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CargoUpdated {
    pub previous_status: CargoStatus,
    pub cargo: Cargo,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The trade itself was malformed (e.g. seller and buyer are the same station).
    InvalidTrade,
    /// Seller did not hold every traded item. Nothing was mutated.
    InsufficientInventory,
    /// The store rejected a write. Applied writes were rolled back.
    StoreWrite,
    /// The store did not answer within the settlement deadline.
    Timeout,
}

/// Event: a trade could not be settled. Terminal for that trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementFailed {
    pub transaction_id: TransactionId,
    pub reason: FailureReason,
    pub detail: String,
    /// Items the seller lacked (only for `InsufficientInventory`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_items: Vec<ItemId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    TradeInitiated(TradeInitiated),
    CargoCreated(CargoCreated),
    InventoryAdjusted(InventoryAdjusted),
    CargoUpdated(CargoUpdated),
    SettlementFailed(SettlementFailed),
}

impl DomainEvent {
    /// Trade this event belongs to, if it belongs to one.
    pub fn transaction_id(&self) -> Option<&TransactionId> {
        match self {
            DomainEvent::TradeInitiated(e) => Some(&e.trade.transaction_id),
            DomainEvent::CargoCreated(e) => Some(&e.transaction_id),
            DomainEvent::InventoryAdjusted(e) => e.transaction_id.as_ref(),
            DomainEvent::CargoUpdated(_) => None,
            DomainEvent::SettlementFailed(e) => Some(&e.transaction_id),
        }
    }
}

impl Event for DomainEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::TradeInitiated(_) => topics::TRADE_INITIATED,
            DomainEvent::CargoCreated(_) => topics::CARGO_CREATED,
            DomainEvent::InventoryAdjusted(_) => topics::INVENTORY_ADJUSTED,
            DomainEvent::CargoUpdated(_) => topics::CARGO_UPDATED,
            DomainEvent::SettlementFailed(_) => topics::SETTLEMENT_FAILED,
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DomainEvent::TradeInitiated(e) => e.occurred_at,
            DomainEvent::CargoCreated(e) => e.occurred_at,
            DomainEvent::InventoryAdjusted(e) => e.occurred_at,
            DomainEvent::CargoUpdated(e) => e.occurred_at,
            DomainEvent::SettlementFailed(e) => e.occurred_at,
        }
    }
}
