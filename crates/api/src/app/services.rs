//! Process context: one store, one bus, one hub and one settlement pool, built
//! once at startup and shared by every handler.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, info};

use starport_cargo::{Cargo, CargoStatus};
use starport_core::{ItemId, ShipmentId, StationId, TransactionId};
use starport_events::{EventBus, InMemoryEventBus};
use starport_infra::{
    BroadcastHub, InMemoryStore, KeyedLocks, Record, RecordKind, SettlementPool, SettlementSettings,
    SettlementWorker, StarportConfig, Store,
};
use starport_inventory::Inventory;
use starport_trading::{
    AdjustmentReason, CargoUpdated, DomainEvent, InventoryAdjusted, Trade, TradeInitiated, TradeRequest,
};

use crate::app::dto::HealthResponse;
use crate::app::errors::ApiError;

pub type Bus = Arc<InMemoryEventBus<DomainEvent>>;

pub struct AppServices {
    config: StarportConfig,
    store: Arc<InMemoryStore>,
    bus: Bus,
    hub: Arc<BroadcastHub>,
    /// Shared with the settlement workers; held by every inventory writer.
    stations: Arc<KeyedLocks<StationId>>,
    shipments: KeyedLocks<ShipmentId>,
    pool: Mutex<Option<SettlementPool<Bus>>>,
}

/// Wire the in-memory store, bus, hub and settlement pool.
pub fn build_services(config: &StarportConfig) -> std::io::Result<Arc<AppServices>> {
    let store = Arc::new(InMemoryStore::new());
    let bus: Bus = Arc::new(InMemoryEventBus::new());
    let stations = Arc::new(KeyedLocks::new());

    let hub = BroadcastHub::new(config.subscriber_capacity);
    hub.attach(&bus);

    let worker = Arc::new(SettlementWorker::new(
        store.clone(),
        bus.clone(),
        stations.clone(),
        SettlementSettings::from(config),
    ));
    let pool = SettlementPool::spawn(worker, bus.clone(), config.settlement_workers)?;

    info!(
        settlement_workers = pool.size(),
        subscriber_capacity = hub.capacity(),
        "services started"
    );

    Ok(Arc::new(AppServices {
        config: config.clone(),
        store,
        bus,
        hub,
        stations,
        shipments: KeyedLocks::new(),
        pool: Mutex::new(Some(pool)),
    }))
}

impl AppServices {
    pub fn config(&self) -> &StarportConfig {
        &self.config
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    /// Validate, persist (status initiated) and announce a trade.
    pub fn initiate_trade(&self, request: &TradeRequest) -> Result<Trade, ApiError> {
        let trade = request.validate()?;

        if !self.store.insert_if_absent(trade.clone().into())? {
            return Err(ApiError::Conflict(format!("trade {} already exists", trade.transaction_id)));
        }

        let envelope = self.bus.publish(DomainEvent::TradeInitiated(TradeInitiated {
            trade: trade.clone(),
            occurred_at: Utc::now(),
        }))?;
        info!(
            transaction_id = %trade.transaction_id,
            sequence = envelope.sequence_number(),
            items = trade.items.len(),
            "trade initiated"
        );
        Ok(trade)
    }

    pub fn trade(&self, id: &TransactionId) -> Result<Trade, ApiError> {
        self.store
            .trade(id)?
            .ok_or_else(|| ApiError::not_found(format!("trade {id}")))
    }

    pub fn cargo(&self, id: &ShipmentId) -> Result<Cargo, ApiError> {
        self.store
            .cargo(id)?
            .ok_or_else(|| ApiError::not_found(format!("cargo {id}")))
    }

    pub fn inventory(&self, id: &StationId) -> Result<Inventory, ApiError> {
        self.store
            .inventory(id)?
            .ok_or_else(|| ApiError::not_found(format!("inventory for {id}")))
    }

    /// Move a shipment forward and announce the change.
    pub fn advance_cargo(&self, id: &ShipmentId, next: CargoStatus) -> Result<Cargo, ApiError> {
        let _shipment = self.shipments.lock(id);
        let mut previous_status = None;
        let record = self.store.update::<ApiError, _>(RecordKind::Cargo, id.as_str(), |current| {
            let Some(Record::Cargo(mut cargo)) = current else {
                return Err(ApiError::not_found(format!("cargo {id}")));
            };
            previous_status = Some(cargo.status);
            cargo.advance(next)?;
            Ok(cargo.into())
        })?;

        let Record::Cargo(cargo) = record else {
            return Err(ApiError::not_found(format!("cargo {id}")));
        };
        let previous_status = previous_status.unwrap_or(CargoStatus::Pending);

        self.bus.publish(DomainEvent::CargoUpdated(CargoUpdated {
            previous_status,
            cargo: cargo.clone(),
            occurred_at: Utc::now(),
        }))?;
        info!(shipment_id = %id, from = %previous_status, to = %cargo.status, "cargo updated");
        Ok(cargo)
    }

    /// Replace a station's holdings and announce the adjustment.
    pub fn provision_inventory(&self, station_id: StationId, items: Vec<ItemId>) -> Result<Inventory, ApiError> {
        let inventory = Inventory::stocked(station_id.clone(), items);

        // Held through publish: a station's adjustments are sequenced in commit order.
        let _station = self.stations.lock(&station_id);
        let previous = self.store.inventory(&station_id)?;
        self.store.put(inventory.clone().into())?;

        let delta = inventory.quantity as i64 - previous.map_or(0, |p| p.quantity as i64);
        self.bus.publish(DomainEvent::InventoryAdjusted(InventoryAdjusted {
            station_id: station_id.clone(),
            transaction_id: None,
            reason: AdjustmentReason::Provisioned,
            delta,
            inventory: inventory.clone(),
            occurred_at: Utc::now(),
        }))?;
        info!(station_id = %station_id, quantity = inventory.quantity, delta, "inventory provisioned");
        Ok(inventory)
    }

    pub fn health(&self) -> HealthResponse {
        let settlement_workers = match self.pool.lock() {
            Ok(pool) => pool.as_ref().map_or(0, |p| p.size()),
            Err(poisoned) => poisoned.into_inner().as_ref().map_or(0, |p| p.size()),
        };
        HealthResponse {
            status: if settlement_workers > 0 { "ok" } else { "stopping" }.to_string(),
            subscribers: self.hub.subscriber_count(),
            dropped_subscribers: self.hub.dropped_count(),
            last_sequence: self.bus.last_sequence(),
            settlement_workers,
        }
    }

    /// Stop settlement (queued trades finish) and detach the hub. Blocking.
    pub fn shutdown(&self) {
        let pool = match self.pool.lock() {
            Ok(mut pool) => pool.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(pool) = pool {
            pool.shutdown();
            debug!("settlement pool stopped");
        }
        self.hub.detach(&self.bus);
    }
}

impl core::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AppServices")
            .field("config", &self.config)
            .field("hub", &self.hub)
            .field("last_sequence", &self.bus.last_sequence())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    const ROUNDS: usize = 100;

    /// The seller debit is the last event a settlement publishes for the seller.
    fn seller_done(payload: &DomainEvent) -> bool {
        match payload {
            DomainEvent::InventoryAdjusted(adj) => adj.reason == AdjustmentReason::Debit,
            DomainEvent::SettlementFailed(_) => true,
            _ => false,
        }
    }

    #[test]
    fn provisioning_and_settlement_snapshots_follow_sequence_order() {
        let config = StarportConfig {
            settlement_workers: 8,
            subscriber_capacity: 10_000,
            ..StarportConfig::default()
        };
        let services = build_services(&config).unwrap();
        let (_id, sub) = services.hub().join();
        let station = StationId::new("S");

        for round in 0..ROUNDS {
            let item = format!("widget-{round}");
            services
                .provision_inventory(station.clone(), vec![ItemId::new(item.as_str())])
                .unwrap();
            services
                .initiate_trade(&TradeRequest {
                    transaction_id: format!("t{round}"),
                    seller: "S".to_string(),
                    buyer: "B".to_string(),
                    items: vec![item],
                })
                .unwrap();
        }

        let mut events = Vec::new();
        let mut outcomes = 0;
        while outcomes < ROUNDS {
            let envelope = sub.recv_timeout(Duration::from_secs(5)).unwrap();
            if seller_done(envelope.payload()) {
                outcomes += 1;
            }
            events.push(envelope);
        }
        events.sort_by_key(|e| e.sequence_number());

        let last = events
            .iter()
            .rev()
            .find_map(|e| match e.payload() {
                DomainEvent::InventoryAdjusted(adj) if adj.station_id == station => Some(adj.inventory.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(Some(last), services.store.inventory(&station).unwrap());

        services.shutdown();
    }
}
