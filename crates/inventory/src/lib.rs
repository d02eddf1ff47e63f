//! Station inventory domain module.
//!
//! Business rules for station holdings, implemented purely as deterministic
//! domain logic (no IO, no HTTP, no storage).

pub mod station;

pub use station::Inventory;
