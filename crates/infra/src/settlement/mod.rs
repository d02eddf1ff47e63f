//! Trade settlement: turning a `trade.initiated` fact into a shipment and the
//! matching pair of inventory adjustments.
//!
//! ```text
//! trade.initiated ─► SettlementPool (shard by transaction id) ─► SettlementWorker
//!                                                                  ├─ lock seller + buyer stations
//!                                                                  ├─ reject malformed trades
//!                                                                  ├─ idempotency check (shipment id)
//!                                                                  ├─ seller holds every item?
//!                                                                  ├─ unit of work: cargo, seller, buyer, trade
//!                                                                  └─ publish cargo.created, inventory.adjusted ×2
//!                                                                     (or settlement.failed)
//! ```
//!
//! The station locks are held until the events are published, so the sequence
//! numbers of a station's `inventory.adjusted` events follow its commit order.
//!
//! Settlement runs to completion once started. It is never retried here: a failed
//! trade is reported once, and any retry is the caller's decision.

pub mod pool;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn};

use starport_cargo::Cargo;
use starport_core::{DomainError, ItemId, ShipmentId, StationId, TransactionId};
use starport_events::{BusError, EventBus};
use starport_inventory::Inventory;
use starport_trading::{
    AdjustmentReason, CargoCreated, DomainEvent, FailureReason, InventoryAdjusted, SettlementFailed,
    Trade, TradeStatus,
};

use crate::config::StarportConfig;
use crate::locks::{KeyedGuard, KeyedLocks};
use crate::store::{Record, RecordKind, Store, StoreError, UnitOfWork};

pub use pool::SettlementPool;

/// Tunables for a settlement worker.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SettlementSettings {
    /// Cargo ETA = creation time + transit.
    pub transit: chrono::Duration,
    /// Budget for all store calls of one settlement.
    pub store_timeout: Duration,
}

impl Default for SettlementSettings {
    fn default() -> Self {
        Self {
            transit: chrono::Duration::hours(24),
            store_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&StarportConfig> for SettlementSettings {
    fn from(config: &StarportConfig) -> Self {
        Self {
            transit: config.transit,
            store_timeout: config.store_timeout,
        }
    }
}

/// Records written by a successful settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub transaction_id: TransactionId,
    pub cargo: Cargo,
    pub seller: Inventory,
    pub buyer: Inventory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    Settled(Settlement),
    /// The shipment already exists; nothing was written or published.
    AlreadySettled { shipment_id: ShipmentId },
}

#[derive(Debug, Error)]
pub enum SettlementError {
    /// The trade breaks a structural rule (e.g. seller == buyer). Nothing was mutated.
    #[error("trade {transaction_id}: {source}")]
    InvalidTrade {
        transaction_id: TransactionId,
        source: DomainError,
    },

    /// Seller could not cover the trade. Nothing was mutated.
    #[error("trade {transaction_id}: {detail}")]
    InsufficientInventory {
        transaction_id: TransactionId,
        seller: StationId,
        missing: Vec<ItemId>,
        detail: String,
    },

    /// A store call failed. Applied writes were rolled back.
    #[error("trade {transaction_id}: store write failed: {source}")]
    StoreWrite {
        transaction_id: TransactionId,
        source: StoreError,
    },

    /// The store did not answer within the budget. Applied writes were rolled back.
    #[error("trade {transaction_id}: store did not respond within {limit:?}")]
    Timeout {
        transaction_id: TransactionId,
        limit: Duration,
    },

    /// Settlement was written but its events could not be published.
    #[error("trade {transaction_id}: settled but events were not published: {source}")]
    Publish {
        transaction_id: TransactionId,
        source: BusError,
    },
}

impl SettlementError {
    pub fn transaction_id(&self) -> &TransactionId {
        match self {
            SettlementError::InvalidTrade { transaction_id, .. }
            | SettlementError::InsufficientInventory { transaction_id, .. }
            | SettlementError::StoreWrite { transaction_id, .. }
            | SettlementError::Timeout { transaction_id, .. }
            | SettlementError::Publish { transaction_id, .. } => transaction_id,
        }
    }

    /// How the failure is reported on the bus; `None` when the trade did settle.
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            SettlementError::InvalidTrade { .. } => Some(FailureReason::InvalidTrade),
            SettlementError::InsufficientInventory { .. } => Some(FailureReason::InsufficientInventory),
            SettlementError::StoreWrite { .. } => Some(FailureReason::StoreWrite),
            SettlementError::Timeout { .. } => Some(FailureReason::Timeout),
            SettlementError::Publish { .. } => None,
        }
    }
}

/// Applies the side effects of one trade and publishes what happened.
pub struct SettlementWorker<S, B> {
    store: S,
    bus: B,
    stations: Arc<KeyedLocks<StationId>>,
    settings: SettlementSettings,
}

impl<S, B> SettlementWorker<S, B>
where
    S: Store,
    B: EventBus<DomainEvent>,
{
    /// `stations` must be shared with every other writer of inventory records.
    pub fn new(store: S, bus: B, stations: Arc<KeyedLocks<StationId>>, settings: SettlementSettings) -> Self {
        Self {
            store,
            bus,
            stations,
            settings,
        }
    }

    pub fn settings(&self) -> SettlementSettings {
        self.settings
    }

    /// Settle `trade` and publish the result (derived events or `settlement.failed`).
    pub fn process(&self, trade: &Trade) -> Result<SettlementOutcome, SettlementError> {
        let span = info_span!("settlement", transaction_id = %trade.transaction_id);
        let _entered = span.enter();

        let _stations = self.lock_stations(trade);
        match self.settle_locked(trade) {
            Ok(SettlementOutcome::Settled(settlement)) => {
                self.publish_settled(&settlement)
                    .map_err(|source| {
                        error!(error = %source, "settlement applied but events were not published");
                        SettlementError::Publish {
                            transaction_id: trade.transaction_id.clone(),
                            source,
                        }
                    })?;
                info!(
                    shipment_id = %settlement.cargo.shipment_id,
                    items = settlement.cargo.items.len(),
                    "trade settled"
                );
                Ok(SettlementOutcome::Settled(settlement))
            }
            Ok(already) => {
                debug!("trade already settled; replay ignored");
                Ok(already)
            }
            Err(err) => {
                match &err {
                    SettlementError::InvalidTrade { .. } | SettlementError::InsufficientInventory { .. } => {
                        warn!(error = %err, "settlement rejected")
                    }
                    _ => error!(error = %err, "settlement failed"),
                }
                self.publish_failure(&err);
                Err(err)
            }
        }
    }

    /// Apply the settlement writes without publishing anything.
    pub fn settle(&self, trade: &Trade) -> Result<SettlementOutcome, SettlementError> {
        let _stations = self.lock_stations(trade);
        self.settle_locked(trade)
    }

    fn lock_stations(&self, trade: &Trade) -> KeyedGuard {
        self.stations.lock_all([&trade.seller, &trade.buyer])
    }

    /// Caller holds the seller and buyer station locks.
    fn settle_locked(&self, trade: &Trade) -> Result<SettlementOutcome, SettlementError> {
        let deadline = Instant::now() + self.settings.store_timeout;
        let tx = &trade.transaction_id;
        let shipment_id = trade.shipment_id();

        if let Err(source) = trade.check() {
            self.mark_failed(trade);
            return Err(SettlementError::InvalidTrade {
                transaction_id: tx.clone(),
                source,
            });
        }

        if self.store.cargo(&shipment_id).map_err(|e| self.store_failure(tx, e))?.is_some() {
            return Ok(SettlementOutcome::AlreadySettled { shipment_id });
        }

        let seller_before = self.store.inventory(&trade.seller).map_err(|e| self.store_failure(tx, e))?;
        let buyer_before = self.store.inventory(&trade.buyer).map_err(|e| self.store_failure(tx, e))?;
        let trade_before = self.store.trade(tx).map_err(|e| self.store_failure(tx, e))?;
        self.check_deadline(tx, deadline)
            .inspect_err(|_| self.mark_failed(trade))?;

        let mut seller = seller_before.clone().unwrap_or_else(|| Inventory::empty(trade.seller.clone()));
        if let Err(err) = seller.debit(&trade.items) {
            self.mark_failed(trade);
            return Err(SettlementError::InsufficientInventory {
                transaction_id: tx.clone(),
                seller: trade.seller.clone(),
                missing: seller.missing(&trade.items),
                detail: err.to_string(),
            });
        }

        let mut buyer = buyer_before.clone().unwrap_or_else(|| Inventory::empty(trade.buyer.clone()));
        buyer.credit(&trade.items);

        let cargo = Cargo::dispatch(
            shipment_id.clone(),
            trade.seller.clone(),
            trade.buyer.clone(),
            trade.items.clone(),
            Utc::now(),
            self.settings.transit,
        );

        let mut uow = UnitOfWork::begin(&self.store).with_deadline(deadline);
        let written = write_settlement(
            &mut uow,
            &cargo,
            (seller_before, &seller),
            (buyer_before, &buyer),
            (trade_before, trade.with_status(TradeStatus::Settled)),
        );

        match written {
            Ok(true) => {
                uow.commit();
                Ok(SettlementOutcome::Settled(Settlement {
                    transaction_id: tx.clone(),
                    cargo,
                    seller,
                    buyer,
                }))
            }
            Ok(false) => {
                uow.rollback();
                Ok(SettlementOutcome::AlreadySettled { shipment_id })
            }
            Err(err) => {
                let undo_failures = uow.rollback();
                if !undo_failures.is_empty() {
                    error!(failures = undo_failures.len(), "rollback incomplete; records may need repair");
                }
                self.mark_failed(trade);
                Err(self.store_failure(tx, err))
            }
        }
    }

    fn publish_settled(&self, settlement: &Settlement) -> Result<(), BusError> {
        let now = Utc::now();
        let moved = settlement.cargo.items.len() as i64;

        self.bus.publish(DomainEvent::CargoCreated(CargoCreated {
            transaction_id: settlement.transaction_id.clone(),
            cargo: settlement.cargo.clone(),
            occurred_at: now,
        }))?;
        for (inventory, reason, delta) in [
            (&settlement.seller, AdjustmentReason::Debit, -moved),
            (&settlement.buyer, AdjustmentReason::Credit, moved),
        ] {
            self.bus.publish(DomainEvent::InventoryAdjusted(InventoryAdjusted {
                station_id: inventory.station_id.clone(),
                transaction_id: Some(settlement.transaction_id.clone()),
                reason,
                delta,
                inventory: inventory.clone(),
                occurred_at: now,
            }))?;
        }
        Ok(())
    }

    fn publish_failure(&self, err: &SettlementError) {
        let Some(reason) = err.failure_reason() else {
            return;
        };
        let missing_items = match err {
            SettlementError::InsufficientInventory { missing, .. } => missing.clone(),
            _ => Vec::new(),
        };

        let event = DomainEvent::SettlementFailed(SettlementFailed {
            transaction_id: err.transaction_id().clone(),
            reason,
            detail: err.to_string(),
            missing_items,
            occurred_at: Utc::now(),
        });
        if let Err(bus_err) = self.bus.publish(event) {
            error!(error = %bus_err, "could not publish settlement failure");
        }
    }

    /// Record the failed status; a settled trade is never downgraded.
    fn mark_failed(&self, trade: &Trade) {
        let result = self.store.update::<StoreError, _>(RecordKind::Trade, trade.transaction_id.as_str(), |current| {
            let current = match current {
                Some(Record::Trade(t)) => t,
                _ => trade.clone(),
            };
            if current.status == TradeStatus::Settled {
                return Ok(current.into());
            }
            Ok(current.with_status(TradeStatus::Failed).into())
        });
        if let Err(err) = result {
            warn!(error = %err, "could not record failed trade status");
        }
    }

    fn check_deadline(&self, tx: &TransactionId, deadline: Instant) -> Result<(), SettlementError> {
        if Instant::now() > deadline {
            return Err(SettlementError::Timeout {
                transaction_id: tx.clone(),
                limit: self.settings.store_timeout,
            });
        }
        Ok(())
    }

    fn store_failure(&self, tx: &TransactionId, err: StoreError) -> SettlementError {
        match err {
            StoreError::Timeout(_) => SettlementError::Timeout {
                transaction_id: tx.clone(),
                limit: self.settings.store_timeout,
            },
            source => SettlementError::StoreWrite {
                transaction_id: tx.clone(),
                source,
            },
        }
    }
}

/// Cargo first: its insert is the idempotency guard. `Ok(false)` = already settled.
fn write_settlement<S: Store>(
    uow: &mut UnitOfWork<'_, S>,
    cargo: &Cargo,
    seller: (Option<Inventory>, &Inventory),
    buyer: (Option<Inventory>, &Inventory),
    trade: (Option<Trade>, Trade),
) -> Result<bool, StoreError> {
    if !uow.insert(cargo.clone().into())? {
        return Ok(false);
    }
    uow.replace(seller.0.map(Record::from), seller.1.clone().into())?;
    uow.replace(buyer.0.map(Record::from), buyer.1.clone().into())?;
    uow.replace(trade.0.map(Record::from), trade.1.into())?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use proptest::prelude::*;

    use starport_events::{EventEnvelope, HandlerError, InMemoryEventBus};
    use starport_trading::topics;

    use super::*;
    use crate::store::InMemoryStore;

    type Bus = Arc<InMemoryEventBus<DomainEvent>>;

    fn worker() -> (SettlementWorker<Arc<InMemoryStore>, Bus>, Arc<InMemoryStore>, Bus) {
        let store = Arc::new(InMemoryStore::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let worker = SettlementWorker::new(
            store.clone(),
            bus.clone(),
            Arc::new(KeyedLocks::new()),
            SettlementSettings::default(),
        );
        (worker, store, bus)
    }

    fn ids(items: &[&str]) -> Vec<ItemId> {
        items.iter().map(|i| ItemId::new(*i)).collect()
    }

    fn trade(tx: &str, seller: &str, buyer: &str, items: &[&str]) -> Trade {
        Trade::initiated(TransactionId::new(tx), StationId::new(seller), StationId::new(buyer), ids(items))
    }

    fn record_topics(bus: &Bus) -> Arc<Mutex<Vec<&'static str>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        for topic in topics::ALL {
            let seen = seen.clone();
            bus.subscribe(
                topic,
                Arc::new(move |e: &EventEnvelope<DomainEvent>| -> Result<(), HandlerError> {
                    seen.lock().unwrap().push(starport_events::Event::event_type(e.payload()));
                    Ok(())
                }),
            );
        }
        seen
    }

    #[test]
    fn settle_writes_cargo_inventories_and_trade_status() {
        let (worker, store, _bus) = worker();
        store
            .put(Inventory::stocked(StationId::new("S1"), ids(&["widget-1", "widget-2", "widget-3"])).into())
            .unwrap();
        let t1 = trade("t1", "S1", "B1", &["widget-1", "widget-2"]);

        let SettlementOutcome::Settled(settlement) = worker.settle(&t1).unwrap() else {
            panic!("expected a settlement");
        };

        assert_eq!(settlement.cargo.shipment_id, ShipmentId::new("shipment-t1"));
        assert_eq!(settlement.seller.quantity, 1);
        assert_eq!(settlement.buyer.quantity, 2);
        assert_eq!(store.cargo(&settlement.cargo.shipment_id).unwrap(), Some(settlement.cargo.clone()));
        assert_eq!(store.inventory(&StationId::new("B1")).unwrap(), Some(settlement.buyer));
        assert_eq!(store.trade(&t1.transaction_id).unwrap().unwrap().status, TradeStatus::Settled);
    }

    #[test]
    fn process_publishes_cargo_before_adjustments() {
        let (worker, store, bus) = worker();
        store
            .put(Inventory::stocked(StationId::new("S1"), ids(&["widget-1"])).into())
            .unwrap();
        let seen = record_topics(&bus);

        worker.process(&trade("t1", "S1", "B1", &["widget-1"])).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![topics::CARGO_CREATED, topics::INVENTORY_ADJUSTED, topics::INVENTORY_ADJUSTED]
        );
    }

    #[test]
    fn replay_publishes_nothing() {
        let (worker, store, bus) = worker();
        store
            .put(Inventory::stocked(StationId::new("S1"), ids(&["widget-1"])).into())
            .unwrap();
        let t1 = trade("t1", "S1", "B1", &["widget-1"]);
        worker.process(&t1).unwrap();
        let seen = record_topics(&bus);

        let outcome = worker.process(&t1).unwrap();

        assert_eq!(
            outcome,
            SettlementOutcome::AlreadySettled {
                shipment_id: ShipmentId::new("shipment-t1")
            }
        );
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn insufficient_inventory_reports_missing_items() {
        let (worker, store, bus) = worker();
        store
            .put(Inventory::stocked(StationId::new("S1"), ids(&["widget-1"])).into())
            .unwrap();
        let seen = record_topics(&bus);

        let err = worker.process(&trade("t1", "S1", "B1", &["widget-1", "widget-2"])).unwrap_err();

        let SettlementError::InsufficientInventory { missing, seller, .. } = &err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(missing, &ids(&["widget-2"]));
        assert_eq!(seller, &StationId::new("S1"));
        assert_eq!(err.failure_reason(), Some(FailureReason::InsufficientInventory));
        assert_eq!(*seen.lock().unwrap(), vec![topics::SETTLEMENT_FAILED]);
        assert_eq!(store.count(RecordKind::Cargo), 0);
        assert_eq!(store.count(RecordKind::Inventory), 1);
    }

    #[test]
    fn malformed_trade_is_not_a_store_failure() {
        let (worker, store, bus) = worker();
        store
            .put(Inventory::stocked(StationId::new("S1"), ids(&["widget-1"])).into())
            .unwrap();
        let seen = record_topics(&bus);

        let err = worker.process(&trade("t1", "S1", "S1", &["widget-1"])).unwrap_err();

        assert!(matches!(err, SettlementError::InvalidTrade { .. }), "unexpected error: {err}");
        assert_eq!(err.failure_reason(), Some(FailureReason::InvalidTrade));
        assert_eq!(*seen.lock().unwrap(), vec![topics::SETTLEMENT_FAILED]);
        assert_eq!(store.count(RecordKind::Cargo), 0);

        let err = worker.settle(&trade("t2", "S1", "B1", &[])).unwrap_err();
        assert!(matches!(err, SettlementError::InvalidTrade { .. }));
    }

    #[test]
    fn failure_never_downgrades_a_settled_trade() {
        let (worker, store, _bus) = worker();
        let t1 = trade("t1", "S1", "B1", &["widget-1"]);
        store.put(t1.with_status(TradeStatus::Settled).into()).unwrap();

        worker.mark_failed(&t1);

        assert_eq!(store.trade(&t1.transaction_id).unwrap().unwrap().status, TradeStatus::Settled);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: any sequence of trades between three stations keeps every item
        /// at exactly one station, and a station's quantity matches what it holds.
        #[test]
        fn settlements_conserve_items(
            trades in prop::collection::vec((0usize..3, 0usize..3, prop::collection::btree_set(0usize..12, 1..4)), 1..30),
        ) {
            let (worker, store, _bus) = worker();
            let stations = ["A", "B", "C"];
            let all: Vec<String> = (0..12).map(|i| format!("item-{i}")).collect();
            store
                .put(Inventory::stocked(StationId::new("A"), all.iter().map(ItemId::new)).into())
                .unwrap();

            for (n, (from, to, items)) in trades.into_iter().enumerate() {
                if from == to {
                    continue;
                }
                let items: Vec<&str> = items.iter().map(|i| all[*i].as_str()).collect();
                let _ = worker.settle(&trade(&format!("t{n}"), stations[from], stations[to], &items));
            }

            let mut total = 0;
            let mut held = std::collections::BTreeSet::new();
            for station in stations {
                if let Some(inventory) = store.inventory(&StationId::new(station)).unwrap() {
                    prop_assert_eq!(inventory.quantity as usize, inventory.items.len());
                    total += inventory.quantity;
                    for item in inventory.items {
                        prop_assert!(held.insert(item));
                    }
                }
            }
            prop_assert_eq!(total, 12);
        }
    }
}
