//! Store wrappers that misbehave on purpose.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::r#trait::{Record, RecordKind, Store, StoreError};

/// Delegates to an inner store, failing or stalling selected operations.
#[derive(Debug)]
pub struct FlakyStore<S> {
    inner: S,
    fail_kind: Option<RecordKind>,
    /// Fail once this many writes have succeeded.
    fail_after_writes: Option<usize>,
    writes: AtomicUsize,
    write_delay: Option<Duration>,
}

impl<S: Store> FlakyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            fail_kind: None,
            fail_after_writes: None,
            writes: AtomicUsize::new(0),
            write_delay: None,
        }
    }

    pub fn fail_writes_to(mut self, kind: RecordKind) -> Self {
        self.fail_kind = Some(kind);
        self
    }

    pub fn fail_after_writes(mut self, n: usize) -> Self {
        self.fail_after_writes = Some(n);
        self
    }

    pub fn slow_writes(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn before_write(&self, kind: RecordKind) -> Result<(), StoreError> {
        if let Some(delay) = self.write_delay {
            std::thread::sleep(delay);
        }
        if self.fail_kind == Some(kind) {
            return Err(StoreError::WriteRejected(format!("injected failure for {kind:?}")));
        }
        if let Some(limit) = self.fail_after_writes {
            if self.writes.fetch_add(1, Ordering::SeqCst) >= limit {
                return Err(StoreError::Unavailable("injected outage".to_string()));
            }
        }
        Ok(())
    }
}

impl<S: Store> Store for FlakyStore<S> {
    fn get(&self, kind: RecordKind, key: &str) -> Result<Option<Record>, StoreError> {
        self.inner.get(kind, key)
    }

    // Plain puts and deletes are the rollback path; they always go through.
    fn put(&self, record: Record) -> Result<(), StoreError> {
        self.inner.put(record)
    }

    fn delete(&self, kind: RecordKind, key: &str) -> Result<Option<Record>, StoreError> {
        self.inner.delete(kind, key)
    }

    fn compare_and_swap(&self, expected: Option<&Record>, new: Record) -> Result<bool, StoreError> {
        self.before_write(new.kind())?;
        self.inner.compare_and_swap(expected, new)
    }

    fn update<E, F>(&self, kind: RecordKind, key: &str, f: F) -> Result<Record, E>
    where
        E: From<StoreError>,
        F: FnOnce(Option<Record>) -> Result<Record, E>,
    {
        self.before_write(kind)?;
        self.inner.update(kind, key, f)
    }
}
