//! Integration tests for the full settlement pipeline.
//!
//! Tests: tradeInitiated → EventBus → SettlementPool → Store → EventBus → BroadcastHub
//!
//! Verifies:
//! - A covered trade produces one shipment and both inventory adjustments
//! - An uncovered or failing trade leaves no trace except `settlement.failed`
//! - Replays are idempotent and concurrent trades conserve item counts
//! - Subscribers see derived events in publish order, isolated from each other

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, HashMap};
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;

    use starport_cargo::CargoStatus;
    use starport_core::{ItemId, ShipmentId, StationId, TransactionId};
    use starport_events::{Event as _, EventBus, EventEnvelope, HandlerError, InMemoryEventBus, Subscription};
    use starport_inventory::Inventory;
    use starport_trading::{
        AdjustmentReason, DomainEvent, FailureReason, Trade, TradeInitiated, TradeStatus, topics,
    };

    use crate::broadcast::BroadcastHub;
    use crate::locks::KeyedLocks;
    use crate::settlement::{SettlementError, SettlementOutcome, SettlementPool, SettlementSettings, SettlementWorker};
    use crate::store::testing::FlakyStore;
    use crate::store::{InMemoryStore, RecordKind, Store};

    type Bus = Arc<InMemoryEventBus<DomainEvent>>;
    type Delivery = EventEnvelope<DomainEvent>;

    const WAIT: Duration = Duration::from_secs(5);

    struct Pipeline {
        store: Arc<InMemoryStore>,
        bus: Bus,
        hub: Arc<BroadcastHub>,
        pool: SettlementPool<Bus>,
    }

    fn setup(workers: usize) -> Pipeline {
        let store = Arc::new(InMemoryStore::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let hub = BroadcastHub::new(10_000);
        hub.attach(&bus);

        let worker = Arc::new(SettlementWorker::new(
            store.clone(),
            bus.clone(),
            Arc::new(KeyedLocks::new()),
            SettlementSettings::default(),
        ));
        let pool = SettlementPool::spawn(worker, bus.clone(), workers).unwrap();

        Pipeline { store, bus, hub, pool }
    }

    fn ids(items: &[&str]) -> Vec<ItemId> {
        items.iter().map(|i| ItemId::new(*i)).collect()
    }

    fn stock<S: Store>(store: &S, station: &str, items: &[&str]) {
        store
            .put(Inventory::stocked(StationId::new(station), ids(items)).into())
            .unwrap();
    }

    fn trade(tx: &str, seller: &str, buyer: &str, items: &[&str]) -> Trade {
        Trade::initiated(TransactionId::new(tx), StationId::new(seller), StationId::new(buyer), ids(items))
    }

    /// What the API does: persist the trade, then publish it.
    fn initiate<S: Store>(store: &S, bus: &Bus, trade: &Trade) {
        store.put(trade.clone().into()).unwrap();
        announce(bus, trade);
    }

    fn announce(bus: &Bus, trade: &Trade) {
        bus.publish(DomainEvent::TradeInitiated(TradeInitiated {
            trade: trade.clone(),
            occurred_at: Utc::now(),
        }))
        .unwrap();
    }

    fn inventory<S: Store>(store: &S, station: &str) -> Inventory {
        store.inventory(&StationId::new(station)).unwrap().unwrap()
    }

    fn item_set(items: &[&str]) -> BTreeSet<ItemId> {
        ids(items).into_iter().collect()
    }

    /// Receive until `done` holds for everything received so far, or panic after `WAIT`.
    fn collect_until(sub: &Subscription<Delivery>, done: impl Fn(&[Delivery]) -> bool) -> Vec<Delivery> {
        let deadline = std::time::Instant::now() + WAIT;
        let mut seen = Vec::new();
        while !done(&seen) {
            let left = deadline.saturating_duration_since(std::time::Instant::now());
            match sub.recv_timeout(left) {
                Ok(envelope) => seen.push(envelope),
                Err(err) => panic!("gave up waiting after {} events: {err:?}", seen.len()),
            }
        }
        seen
    }

    fn count_topic(events: &[Delivery], topic: &str) -> usize {
        events.iter().filter(|e| e.payload().event_type() == topic).count()
    }

    fn outcomes(events: &[Delivery]) -> usize {
        count_topic(events, topics::CARGO_CREATED) + count_topic(events, topics::SETTLEMENT_FAILED)
    }

    #[test]
    fn covered_trade_creates_cargo_and_moves_items() {
        let p = setup(2);
        stock(&*p.store, "S1", &["widget-1", "widget-2", "widget-3"]);
        stock(&*p.store, "B1", &[]);
        let (_id, sub) = p.hub.join();

        initiate(&*p.store, &p.bus, &trade("t1", "S1", "B1", &["widget-1", "widget-2"]));
        let events = collect_until(&sub, |seen| count_topic(seen, topics::INVENTORY_ADJUSTED) == 2);

        let cargo = p.store.cargo(&ShipmentId::new("shipment-t1")).unwrap().unwrap();
        assert_eq!(cargo.status, CargoStatus::Pending);
        assert_eq!(cargo.origin, StationId::new("S1"));
        assert_eq!(cargo.destination, StationId::new("B1"));
        assert_eq!(cargo.items, ids(&["widget-1", "widget-2"]));
        assert!(cargo.eta > Utc::now() + chrono::Duration::hours(23));

        let seller = inventory(&*p.store, "S1");
        assert_eq!(seller.quantity, 1);
        assert_eq!(seller.items, item_set(&["widget-3"]));
        let buyer = inventory(&*p.store, "B1");
        assert_eq!(buyer.quantity, 2);
        assert_eq!(buyer.items, item_set(&["widget-1", "widget-2"]));

        let stored = p.store.trade(&TransactionId::new("t1")).unwrap().unwrap();
        assert_eq!(stored.status, TradeStatus::Settled);

        let adjustments: Vec<_> = events
            .iter()
            .filter_map(|e| match e.payload() {
                DomainEvent::InventoryAdjusted(adj) => Some((adj.station_id.clone(), adj.reason, adj.delta)),
                _ => None,
            })
            .collect();
        assert_eq!(
            adjustments,
            vec![
                (StationId::new("S1"), AdjustmentReason::Debit, -2),
                (StationId::new("B1"), AdjustmentReason::Credit, 2),
            ]
        );

        p.pool.shutdown();
    }

    #[test]
    fn uncovered_trade_fails_without_side_effects() {
        let p = setup(2);
        stock(&*p.store, "S1", &["widget-1"]);
        stock(&*p.store, "B1", &[]);
        let (_id, sub) = p.hub.join();

        initiate(&*p.store, &p.bus, &trade("t1", "S1", "B1", &["widget-1", "widget-2", "widget-3"]));
        let events = collect_until(&sub, |seen| outcomes(seen) == 1);

        let failed = events
            .iter()
            .find_map(|e| match e.payload() {
                DomainEvent::SettlementFailed(failed) => Some(failed.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(failed.transaction_id, TransactionId::new("t1"));
        assert_eq!(failed.reason, FailureReason::InsufficientInventory);
        assert_eq!(failed.missing_items, ids(&["widget-2", "widget-3"]));
        assert_eq!(count_topic(&events, topics::CARGO_CREATED), 0);

        assert!(p.store.cargo(&ShipmentId::new("shipment-t1")).unwrap().is_none());
        assert_eq!(inventory(&*p.store, "S1").items, item_set(&["widget-1"]));
        assert_eq!(inventory(&*p.store, "B1").quantity, 0);
        let stored = p.store.trade(&TransactionId::new("t1")).unwrap().unwrap();
        assert_eq!(stored.status, TradeStatus::Failed);

        p.pool.shutdown();
    }

    #[test]
    fn replayed_trade_settles_once() {
        // One worker: the marker trade is processed after both copies of t1.
        let p = setup(1);
        stock(&*p.store, "S1", &["widget-1", "widget-2", "widget-3"]);
        stock(&*p.store, "S2", &["gadget-1"]);
        let (_id, sub) = p.hub.join();

        let t1 = trade("t1", "S1", "B1", &["widget-1"]);
        initiate(&*p.store, &p.bus, &t1);
        announce(&p.bus, &t1);
        initiate(&*p.store, &p.bus, &trade("marker", "S2", "B2", &["gadget-1"]));

        let events = collect_until(&sub, |seen| {
            seen.iter().any(|e| matches!(e.payload(), DomainEvent::CargoCreated(c) if c.transaction_id.as_str() == "marker"))
        });

        let t1_cargo = events
            .iter()
            .filter(|e| matches!(e.payload(), DomainEvent::CargoCreated(c) if c.transaction_id.as_str() == "t1"))
            .count();
        assert_eq!(t1_cargo, 1);
        assert_eq!(count_topic(&events, topics::SETTLEMENT_FAILED), 0);
        assert_eq!(inventory(&*p.store, "S1").quantity, 2);
        assert_eq!(inventory(&*p.store, "B1").items, item_set(&["widget-1"]));
        assert_eq!(p.store.count(RecordKind::Cargo), 2);

        p.pool.shutdown();
    }

    #[test]
    fn concurrent_trades_conserve_items() {
        let p = setup(4);
        let widgets: Vec<String> = (0..20).map(|i| format!("widget-{i}")).collect();
        let widget_refs: Vec<&str> = widgets.iter().map(String::as_str).collect();
        stock(&*p.store, "S1", &widget_refs);
        for b in 0..4 {
            stock(&*p.store, &format!("B{b}"), &[]);
        }
        let (_id, sub) = p.hub.join();

        // Every widget is sold twice, to different buyers; only one sale can win.
        let publishers: Vec<_> = (0..2)
            .map(|round| {
                let store = p.store.clone();
                let bus = p.bus.clone();
                let widgets = widgets.clone();
                std::thread::spawn(move || {
                    for (i, widget) in widgets.iter().enumerate() {
                        let buyer = format!("B{}", (i + round) % 4);
                        initiate(&*store, &bus, &trade(&format!("t{round}-{i}"), "S1", &buyer, &[widget.as_str()]));
                    }
                })
            })
            .collect();
        for publisher in publishers {
            publisher.join().unwrap();
        }

        let events = collect_until(&sub, |seen| outcomes(seen) == 40);

        assert_eq!(count_topic(&events, topics::CARGO_CREATED), 20);
        assert_eq!(count_topic(&events, topics::SETTLEMENT_FAILED), 20);

        let seller = inventory(&*p.store, "S1");
        assert_eq!(seller.quantity, 0);
        let mut held = BTreeSet::new();
        let mut total = seller.quantity;
        for b in 0..4 {
            let buyer = inventory(&*p.store, &format!("B{b}"));
            assert_eq!(buyer.quantity as usize, buyer.items.len());
            total += buyer.quantity;
            for item in buyer.items {
                assert!(held.insert(item), "an item ended up at two stations");
            }
        }
        assert_eq!(total, 20);
        assert_eq!(held, widgets.iter().map(ItemId::new).collect::<BTreeSet<_>>());

        p.pool.shutdown();
    }

    #[test]
    fn station_snapshots_follow_sequence_order() {
        const TRADES: usize = 200;
        let p = setup(8);
        let widgets: Vec<String> = (0..TRADES).map(|i| format!("widget-{i}")).collect();
        let widget_refs: Vec<&str> = widgets.iter().map(String::as_str).collect();
        stock(&*p.store, "S", &widget_refs);
        let (_id, sub) = p.hub.join();

        for (i, widget) in widgets.iter().enumerate() {
            initiate(&*p.store, &p.bus, &trade(&format!("t{i}"), "S", &format!("B{}", i % 16), &[widget.as_str()]));
        }
        let mut events = collect_until(&sub, |seen| count_topic(seen, topics::INVENTORY_ADJUSTED) == 2 * TRADES);
        events.sort_by_key(|e| e.sequence_number());

        let mut snapshots: HashMap<StationId, Vec<u64>> = HashMap::new();
        for envelope in &events {
            if let DomainEvent::InventoryAdjusted(adj) = envelope.payload() {
                snapshots.entry(adj.station_id.clone()).or_default().push(adj.inventory.quantity);
            }
        }

        let seller = &snapshots[&StationId::new("S")];
        assert_eq!(seller.len(), TRADES);
        assert!(seller.windows(2).all(|w| w[0] > w[1]), "seller snapshots out of order: {seller:?}");
        assert_eq!(seller.last().copied(), Some(inventory(&*p.store, "S").quantity));
        assert_eq!(inventory(&*p.store, "S").quantity, 0);

        for b in 0..16 {
            let station = format!("B{b}");
            let buyer = &snapshots[&StationId::new(station.as_str())];
            assert!(buyer.windows(2).all(|w| w[0] < w[1]), "{station} snapshots out of order: {buyer:?}");
            assert_eq!(buyer.last().copied(), Some(inventory(&*p.store, &station).quantity));
        }

        p.pool.shutdown();
    }

    #[test]
    fn cargo_is_announced_before_inventory_adjustments() {
        let p = setup(4);
        for s in 0..5 {
            stock(&*p.store, &format!("S{s}"), &["a", "b"]);
        }
        let (_id, sub) = p.hub.join();

        for s in 0..5 {
            initiate(&*p.store, &p.bus, &trade(&format!("t{s}"), &format!("S{s}"), "B", &["a"]));
        }
        let events = collect_until(&sub, |seen| count_topic(seen, topics::INVENTORY_ADJUSTED) == 10);

        let seqs: Vec<u64> = events.iter().map(|e| e.sequence_number()).collect();
        assert!(seqs.windows(2).all(|w| w[0] < w[1]), "sequence went backwards: {seqs:?}");

        let mut cargo_seq: HashMap<TransactionId, u64> = HashMap::new();
        for envelope in &events {
            match envelope.payload() {
                DomainEvent::CargoCreated(created) => {
                    cargo_seq.insert(created.transaction_id.clone(), envelope.sequence_number());
                }
                DomainEvent::InventoryAdjusted(adj) => {
                    let tx = adj.transaction_id.as_ref().unwrap();
                    let created = cargo_seq.get(tx).copied().unwrap();
                    assert!(created < envelope.sequence_number());
                }
                _ => {}
            }
        }
        assert_eq!(cargo_seq.len(), 5);

        p.pool.shutdown();
    }

    #[test]
    fn broken_handlers_and_stalled_subscribers_do_not_block_others() {
        let p = setup(2);
        p.bus.subscribe(
            topics::CARGO_CREATED,
            Arc::new(|_: &Delivery| -> Result<(), HandlerError> { panic!("handler bug") }),
        );
        p.bus.subscribe(
            topics::INVENTORY_ADJUSTED,
            Arc::new(|_: &Delivery| -> Result<(), HandlerError> { Err(HandlerError::rejected("nope")) }),
        );

        let stalled_hub = BroadcastHub::new(1);
        stalled_hub.attach(&p.bus);
        let (_stalled, _never_read) = stalled_hub.join();

        stock(&*p.store, "S1", &["w1", "w2", "w3"]);
        let (_id, sub) = p.hub.join();
        for (i, item) in ["w1", "w2", "w3"].into_iter().enumerate() {
            initiate(&*p.store, &p.bus, &trade(&format!("t{i}"), "S1", "B1", &[item]));
        }

        let events = collect_until(&sub, |seen| count_topic(seen, topics::INVENTORY_ADJUSTED) == 6);
        assert_eq!(count_topic(&events, topics::CARGO_CREATED), 3);
        assert_eq!(inventory(&*p.store, "B1").quantity, 3);
        assert_eq!(stalled_hub.subscriber_count(), 0);
        assert!(p.bus.handler_failures() >= 6);

        p.pool.shutdown();
    }

    #[test]
    fn store_failure_rolls_back_and_reports() {
        let store = Arc::new(FlakyStore::new(InMemoryStore::new()).fail_writes_to(RecordKind::Trade));
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let hub = BroadcastHub::new(16);
        hub.attach(&bus);
        let (_id, sub) = hub.join();
        let worker = SettlementWorker::new(store.clone(), bus.clone(), Arc::new(KeyedLocks::new()), SettlementSettings::default());

        stock(&*store, "S1", &["widget-1", "widget-2"]);
        stock(&*store, "B1", &["gizmo"]);
        let t1 = trade("t1", "S1", "B1", &["widget-1"]);
        store.put(t1.clone().into()).unwrap();

        let err = worker.process(&t1).unwrap_err();
        assert!(matches!(err, SettlementError::StoreWrite { .. }));

        assert!(store.cargo(&ShipmentId::new("shipment-t1")).unwrap().is_none());
        assert_eq!(inventory(&*store, "S1").items, item_set(&["widget-1", "widget-2"]));
        assert_eq!(inventory(&*store, "B1").items, item_set(&["gizmo"]));

        let events = sub.drain();
        assert_eq!(events.len(), 1);
        let DomainEvent::SettlementFailed(failed) = events[0].payload() else {
            panic!("expected settlement.failed, got {:?}", events[0].payload());
        };
        assert_eq!(failed.reason, FailureReason::StoreWrite);
    }

    #[test]
    fn slow_store_times_out_and_rolls_back() {
        let store = Arc::new(FlakyStore::new(InMemoryStore::new()).slow_writes(Duration::from_millis(30)));
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let hub = BroadcastHub::new(16);
        hub.attach(&bus);
        let (_id, sub) = hub.join();
        let settings = SettlementSettings {
            store_timeout: Duration::from_millis(10),
            ..SettlementSettings::default()
        };
        let worker = SettlementWorker::new(store.clone(), bus.clone(), Arc::new(KeyedLocks::new()), settings);

        stock(&*store, "S1", &["widget-1"]);
        let t1 = trade("t1", "S1", "B1", &["widget-1"]);

        let err = worker.process(&t1).unwrap_err();
        assert!(matches!(err, SettlementError::Timeout { limit, .. } if limit == Duration::from_millis(10)));

        assert!(store.cargo(&ShipmentId::new("shipment-t1")).unwrap().is_none());
        assert_eq!(inventory(&*store, "S1").items, item_set(&["widget-1"]));
        assert!(store.inventory(&StationId::new("B1")).unwrap().is_none());

        let failed: Vec<_> = sub
            .drain()
            .into_iter()
            .filter_map(|e| match e.into_payload() {
                DomainEvent::SettlementFailed(failed) => Some(failed.reason),
                _ => None,
            })
            .collect();
        assert_eq!(failed, vec![FailureReason::Timeout]);
    }

    #[test]
    fn self_trade_on_the_bus_is_rejected_as_invalid() {
        let p = setup(2);
        stock(&*p.store, "S1", &["widget-1"]);
        let (_id, sub) = p.hub.join();

        // Bypasses request validation: straight onto the bus.
        initiate(&*p.store, &p.bus, &trade("t1", "S1", "S1", &["widget-1"]));
        let events = collect_until(&sub, |seen| outcomes(seen) == 1);

        let failed = events
            .iter()
            .find_map(|e| match e.payload() {
                DomainEvent::SettlementFailed(failed) => Some(failed.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(failed.reason, FailureReason::InvalidTrade);
        assert!(failed.missing_items.is_empty());
        assert_eq!(count_topic(&events, topics::INVENTORY_ADJUSTED), 0);

        assert!(p.store.cargo(&ShipmentId::new("shipment-t1")).unwrap().is_none());
        assert_eq!(inventory(&*p.store, "S1").items, item_set(&["widget-1"]));
        let stored = p.store.trade(&TransactionId::new("t1")).unwrap().unwrap();
        assert_eq!(stored.status, TradeStatus::Failed);

        p.pool.shutdown();
    }

    #[test]
    fn failed_trade_can_be_retried_once_covered() {
        let store = Arc::new(InMemoryStore::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let worker = SettlementWorker::new(store.clone(), bus, Arc::new(KeyedLocks::new()), SettlementSettings::default());
        let t1 = trade("t1", "S1", "B1", &["widget-1"]);
        store.put(t1.clone().into()).unwrap();

        assert!(matches!(worker.process(&t1), Err(SettlementError::InsufficientInventory { .. })));
        assert_eq!(store.trade(&t1.transaction_id).unwrap().unwrap().status, TradeStatus::Failed);

        stock(&*store, "S1", &["widget-1"]);
        assert!(matches!(worker.process(&t1), Ok(SettlementOutcome::Settled(_))));
        assert_eq!(store.trade(&t1.transaction_id).unwrap().unwrap().status, TradeStatus::Settled);

        assert!(matches!(worker.process(&t1), Ok(SettlementOutcome::AlreadySettled { .. })));
    }

    #[test]
    fn shutdown_drains_queued_trades_and_stops_intake() {
        let p = setup(2);
        let items: Vec<String> = (0..10).map(|i| format!("w{i}")).collect();
        stock(&*p.store, "S1", &items.iter().map(String::as_str).collect::<Vec<_>>());

        for (i, item) in items.iter().enumerate() {
            initiate(&*p.store, &p.bus, &trade(&format!("t{i}"), "S1", "B1", &[item.as_str()]));
        }
        let handlers = p.bus.handler_count(topics::TRADE_INITIATED);
        p.pool.shutdown();

        assert_eq!(p.store.count(RecordKind::Cargo), 10);
        assert_eq!(p.bus.handler_count(topics::TRADE_INITIATED), handlers - 1);

        initiate(&*p.store, &p.bus, &trade("late", "B1", "S1", &["w0"]));
        assert_eq!(p.store.count(RecordKind::Cargo), 10);
        assert_eq!(inventory(&*p.store, "S1").quantity, 0);
    }
}
