//! All-or-nothing application of several writes on a plain keyed store.
//!
//! Writes are applied immediately, and each one remembers how to undo itself.
//! `rollback` replays the undo log in reverse, so a failure part-way through leaves
//! every touched key as it was before the unit began.
//!
//! Callers must hold whatever locks keep other writers off the touched keys until
//! `commit` or `rollback`; conditional writes detect anyone who did not.

use std::time::Instant;

use tracing::error;

use super::r#trait::{Record, RecordKind, Store, StoreError};

#[derive(Debug)]
enum Undo {
    /// Key was absent before; delete it.
    Remove { kind: RecordKind, key: String },
    /// Key held `previous`; write it back.
    Restore { previous: Record },
}

/// A sequence of writes that is either committed whole or rolled back.
#[derive(Debug)]
pub struct UnitOfWork<'s, S: Store> {
    store: &'s S,
    undo: Vec<Undo>,
    started: Instant,
    deadline: Option<Instant>,
}

impl<'s, S: Store> UnitOfWork<'s, S> {
    pub fn begin(store: &'s S) -> Self {
        Self {
            store,
            undo: Vec::new(),
            started: Instant::now(),
            deadline: None,
        }
    }

    /// Fail any write that completes after `deadline`.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Number of writes applied so far.
    pub fn len(&self) -> usize {
        self.undo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.undo.is_empty()
    }

    /// Write a record that must not exist yet. Returns `Ok(false)` if it does.
    pub fn insert(&mut self, record: Record) -> Result<bool, StoreError> {
        let (kind, key) = (record.kind(), record.key().to_string());
        let inserted = self.store.insert_if_absent(record)?;
        if inserted {
            self.undo.push(Undo::Remove { kind, key });
        }
        self.check_deadline()?;
        Ok(inserted)
    }

    /// Replace a record, expecting it to still hold `previous` (`None` = absent).
    pub fn replace(&mut self, previous: Option<Record>, record: Record) -> Result<(), StoreError> {
        let (kind, key) = (record.kind(), record.key().to_string());
        if !self.store.compare_and_swap(previous.as_ref(), record)? {
            return Err(StoreError::Conflict(format!("{kind:?}/{key} changed during unit of work")));
        }
        self.undo.push(match previous {
            Some(previous) => Undo::Restore { previous },
            None => Undo::Remove { kind, key },
        });
        self.check_deadline()
    }

    /// Keep every write.
    pub fn commit(self) {
        drop(self);
    }

    /// Undo every applied write, newest first.
    ///
    /// Returns the undo steps that failed; those keys may still hold the new value.
    pub fn rollback(self) -> Vec<StoreError> {
        let mut failures = Vec::new();
        for step in self.undo.into_iter().rev() {
            let result = match &step {
                Undo::Remove { kind, key } => self.store.delete(*kind, key).map(|_| ()),
                Undo::Restore { previous } => self.store.put(previous.clone()),
            };
            if let Err(err) = result {
                error!(step = ?step, error = %err, "unit of work rollback step failed");
                failures.push(err);
            }
        }
        failures
    }

    fn check_deadline(&self) -> Result<(), StoreError> {
        match self.deadline {
            Some(deadline) if Instant::now() > deadline => Err(StoreError::Timeout(self.started.elapsed())),
            _ => Ok(()),
        }
    }
}
