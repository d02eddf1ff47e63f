use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, mpsc};
use std::thread;

use tracing::{debug, error};

use starport_core::TransactionId;
use starport_events::{EventBus, EventEnvelope, HandlerError, SubscriptionHandle};
use starport_trading::{DomainEvent, Trade, topics};

use super::SettlementWorker;
use crate::store::Store;

/// Bounded pool of settlement threads fed from the bus.
///
/// - Subscribes to `trade.initiated`; the bus handler only enqueues
/// - Each transaction id always lands on the same thread, so replays of one trade
///   are processed one after the other
/// - `shutdown` stops intake, drains queued trades and joins the threads
pub struct SettlementPool<B>
where
    B: EventBus<DomainEvent>,
{
    bus: B,
    subscription: SubscriptionHandle,
    workers: Vec<thread::JoinHandle<()>>,
}

impl<B> SettlementPool<B>
where
    B: EventBus<DomainEvent> + 'static,
{
    /// Spawn `size` worker threads (at least one) sharing `worker`.
    pub fn spawn<S>(worker: Arc<SettlementWorker<S, B>>, bus: B, size: usize) -> std::io::Result<Self>
    where
        S: Store + 'static,
    {
        let size = size.max(1);
        let mut queues = Vec::with_capacity(size);
        let mut workers = Vec::with_capacity(size);

        for index in 0..size {
            let (tx, rx) = mpsc::channel::<Trade>();
            let worker = worker.clone();
            let join = thread::Builder::new()
                .name(format!("settlement-{index}"))
                .spawn(move || worker_loop(index, rx, &worker))?;
            queues.push(tx);
            workers.push(join);
        }

        let subscription = bus.subscribe(
            topics::TRADE_INITIATED,
            Arc::new(move |envelope: &EventEnvelope<DomainEvent>| -> Result<(), HandlerError> {
                let DomainEvent::TradeInitiated(initiated) = envelope.payload() else {
                    return Err(HandlerError::rejected("expected trade.initiated"));
                };
                let trade = &initiated.trade;
                queues[shard_for(&trade.transaction_id, queues.len())]
                    .send(trade.clone())
                    .map_err(|_| HandlerError::closed("settlement worker stopped"))
            }),
        );

        Ok(Self {
            bus,
            subscription,
            workers,
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Stop taking new trades, finish queued ones and wait for the threads.
    pub fn shutdown(self) {
        // Dropping the handler drops the queue senders; workers exit once drained.
        self.bus.unsubscribe(self.subscription);
        for join in self.workers {
            if join.join().is_err() {
                error!("settlement worker thread panicked");
            }
        }
    }
}

fn worker_loop<S, B>(index: usize, queue: mpsc::Receiver<Trade>, worker: &SettlementWorker<S, B>)
where
    S: Store,
    B: EventBus<DomainEvent>,
{
    for trade in queue {
        // `process` reports its own outcome; only a panic needs handling here.
        let outcome = catch_unwind(AssertUnwindSafe(|| worker.process(&trade)));
        if outcome.is_err() {
            error!(worker = index, transaction_id = %trade.transaction_id, "settlement panicked");
        }
    }
    debug!(worker = index, "settlement worker stopped");
}

fn shard_for(id: &TransactionId, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    id.hash(&mut hasher);
    (hasher.finish() % shards as u64) as usize
}
