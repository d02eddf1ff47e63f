//! Keyed record store boundary.
//!
//! The settlement pipeline only needs per-key reads, conditional writes and a
//! per-key atomic read-modify-write; any engine offering those can back it.

pub mod in_memory;
pub mod r#trait;
pub mod unit_of_work;

#[cfg(test)]
pub(crate) mod testing;

pub use in_memory::InMemoryStore;
pub use r#trait::{Record, RecordKind, Store, StoreError};
pub use unit_of_work::UnitOfWork;
