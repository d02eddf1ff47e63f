use std::collections::HashMap;
use std::sync::RwLock;

use super::r#trait::{Record, RecordKind, Store, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RecordKey {
    kind: RecordKind,
    key: String,
}

impl RecordKey {
    fn new(kind: RecordKind, key: &str) -> Self {
        Self {
            kind,
            key: key.to_string(),
        }
    }

    fn of(record: &Record) -> Self {
        Self::new(record.kind(), record.key())
    }
}

/// In-memory keyed store.
///
/// Intended for tests/dev and single-process deployments. Every operation holds the
/// map lock for its whole duration, so each one is atomic per key.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: RwLock<HashMap<RecordKey, Record>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records of `kind`.
    pub fn count(&self, kind: RecordKind) -> usize {
        self.records
            .read()
            .map(|r| r.keys().filter(|k| k.kind == kind).count())
            .unwrap_or(0)
    }
}

impl Store for InMemoryStore {
    fn get(&self, kind: RecordKind, key: &str) -> Result<Option<Record>, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::Poisoned)?;
        Ok(records.get(&RecordKey::new(kind, key)).cloned())
    }

    fn put(&self, record: Record) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::Poisoned)?;
        records.insert(RecordKey::of(&record), record);
        Ok(())
    }

    fn delete(&self, kind: RecordKind, key: &str) -> Result<Option<Record>, StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::Poisoned)?;
        Ok(records.remove(&RecordKey::new(kind, key)))
    }

    fn compare_and_swap(&self, expected: Option<&Record>, new: Record) -> Result<bool, StoreError> {
        let key = RecordKey::of(&new);
        if let Some(exp) = expected {
            if RecordKey::of(exp) != key {
                return Err(StoreError::WriteRejected(format!(
                    "expected value for {:?}/{} compared against {:?}/{}",
                    exp.kind(),
                    exp.key(),
                    key.kind,
                    key.key
                )));
            }
        }

        let mut records = self.records.write().map_err(|_| StoreError::Poisoned)?;
        if records.get(&key) != expected {
            return Ok(false);
        }
        records.insert(key, new);
        Ok(true)
    }

    fn update<E, F>(&self, kind: RecordKind, key: &str, f: F) -> Result<Record, E>
    where
        E: From<StoreError>,
        F: FnOnce(Option<Record>) -> Result<Record, E>,
    {
        let slot = RecordKey::new(kind, key);
        let mut records = self.records.write().map_err(|_| StoreError::Poisoned)?;

        let next = f(records.get(&slot).cloned())?;
        if RecordKey::of(&next) != slot {
            return Err(StoreError::WriteRejected(format!(
                "update of {kind:?}/{key} produced {:?}/{}",
                next.kind(),
                next.key()
            ))
            .into());
        }

        records.insert(slot, next.clone());
        Ok(next)
    }
}
