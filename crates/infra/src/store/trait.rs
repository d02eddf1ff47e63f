use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use starport_cargo::Cargo;
use starport_core::{Entity, ShipmentId, StationId, TransactionId};
use starport_inventory::Inventory;
use starport_trading::Trade;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Trade,
    Cargo,
    Inventory,
}

/// A persisted record. The key is derived from the record itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum Record {
    Trade(Trade),
    Cargo(Cargo),
    Inventory(Inventory),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Trade(_) => RecordKind::Trade,
            Record::Cargo(_) => RecordKind::Cargo,
            Record::Inventory(_) => RecordKind::Inventory,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Record::Trade(t) => t.id().as_str(),
            Record::Cargo(c) => c.id().as_str(),
            Record::Inventory(i) => i.id().as_str(),
        }
    }
}

impl From<Trade> for Record {
    fn from(value: Trade) -> Self {
        Record::Trade(value)
    }
}

impl From<Cargo> for Record {
    fn from(value: Cargo) -> Self {
        Record::Cargo(value)
    }
}

impl From<Inventory> for Record {
    fn from(value: Inventory) -> Self {
        Record::Inventory(value)
    }
}

/// Store operation error.
///
/// These are **infrastructure errors**, as opposed to domain errors (validation,
/// invariants). A settlement hitting any of them fails without partial state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("write rejected: {0}")]
    WriteRejected(String),

    /// A conditional write found a different value than expected.
    #[error("conflicting write: {0}")]
    Conflict(String),

    #[error("record kind mismatch: expected {expected:?}, found {found:?}")]
    KindMismatch { expected: RecordKind, found: RecordKind },

    #[error("store did not answer within {0:?}")]
    Timeout(Duration),

    #[error("store lock poisoned")]
    Poisoned,
}

/// Durable keyed records for trades, cargo and inventory.
///
/// ## Required Semantics
///
/// - `get`/`put`/`delete` are atomic per key
/// - `compare_and_swap` writes only if the current value equals `expected`
///   (`None` = key absent), which gives insert-if-absent for idempotency checks
/// - `update` is an atomic read-modify-write of one key: no other write to that key
///   can interleave between the read and the write
pub trait Store: Send + Sync {
    fn get(&self, kind: RecordKind, key: &str) -> Result<Option<Record>, StoreError>;

    fn put(&self, record: Record) -> Result<(), StoreError>;

    /// Remove a record, returning what was stored.
    fn delete(&self, kind: RecordKind, key: &str) -> Result<Option<Record>, StoreError>;

    /// Conditional write. Returns `false` (and writes nothing) if the current value
    /// differs from `expected`.
    fn compare_and_swap(&self, expected: Option<&Record>, new: Record) -> Result<bool, StoreError>;

    /// Atomic read-modify-write of one key. `f` sees the current value and returns the
    /// value to store; returning an error aborts without writing.
    fn update<E, F>(&self, kind: RecordKind, key: &str, f: F) -> Result<Record, E>
    where
        E: From<StoreError>,
        F: FnOnce(Option<Record>) -> Result<Record, E>;

    /// Insert only if nothing is stored under the record's key.
    fn insert_if_absent(&self, record: Record) -> Result<bool, StoreError> {
        self.compare_and_swap(None, record)
    }

    fn trade(&self, id: &TransactionId) -> Result<Option<Trade>, StoreError> {
        match self.get(RecordKind::Trade, id.as_str())? {
            None => Ok(None),
            Some(Record::Trade(t)) => Ok(Some(t)),
            Some(other) => Err(mismatch(RecordKind::Trade, &other)),
        }
    }

    fn cargo(&self, id: &ShipmentId) -> Result<Option<Cargo>, StoreError> {
        match self.get(RecordKind::Cargo, id.as_str())? {
            None => Ok(None),
            Some(Record::Cargo(c)) => Ok(Some(c)),
            Some(other) => Err(mismatch(RecordKind::Cargo, &other)),
        }
    }

    fn inventory(&self, id: &StationId) -> Result<Option<Inventory>, StoreError> {
        match self.get(RecordKind::Inventory, id.as_str())? {
            None => Ok(None),
            Some(Record::Inventory(i)) => Ok(Some(i)),
            Some(other) => Err(mismatch(RecordKind::Inventory, &other)),
        }
    }
}

fn mismatch(expected: RecordKind, found: &Record) -> StoreError {
    StoreError::KindMismatch {
        expected,
        found: found.kind(),
    }
}

impl<S> Store for Arc<S>
where
    S: Store,
{
    fn get(&self, kind: RecordKind, key: &str) -> Result<Option<Record>, StoreError> {
        (**self).get(kind, key)
    }

    fn put(&self, record: Record) -> Result<(), StoreError> {
        (**self).put(record)
    }

    fn delete(&self, kind: RecordKind, key: &str) -> Result<Option<Record>, StoreError> {
        (**self).delete(kind, key)
    }

    fn compare_and_swap(&self, expected: Option<&Record>, new: Record) -> Result<bool, StoreError> {
        (**self).compare_and_swap(expected, new)
    }

    fn update<E, F>(&self, kind: RecordKind, key: &str, f: F) -> Result<Record, E>
    where
        E: From<StoreError>,
        F: FnOnce(Option<Record>) -> Result<Record, E>,
    {
        (**self).update(kind, key, f)
    }
}

#[cfg(test)]
mod tests {
    use starport_core::{ItemId, StationId};

    use super::*;

    #[test]
    fn record_serializes_with_kind_tag() {
        let record: Record = Inventory::stocked(StationId::new("S1"), [ItemId::new("widget-1")]).into();

        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["kind"], "inventory");
        assert_eq!(json["record"]["station_id"], "S1");
        assert_eq!(serde_json::from_value::<Record>(json).unwrap(), record);
    }

    #[test]
    fn key_is_derived_from_the_record() {
        let record: Record = Inventory::empty(StationId::new("B1")).into();
        assert_eq!(record.kind(), RecordKind::Inventory);
        assert_eq!(record.key(), "B1");

        let trade = Trade::initiated(
            TransactionId::new("t1"),
            StationId::new("S1"),
            StationId::new("B1"),
            vec![ItemId::new("widget-1")],
        );
        let cargo = Cargo::dispatch(
            trade.shipment_id(),
            trade.seller.clone(),
            trade.buyer.clone(),
            trade.items.clone(),
            chrono::Utc::now(),
            chrono::Duration::hours(1),
        );
        assert_eq!(Record::from(cargo).key(), "shipment-t1");
        assert_eq!(Record::from(trade).key(), "t1");
    }
}
