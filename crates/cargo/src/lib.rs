//! Cargo shipment domain module.
//!
//! A cargo record is created once per settled trade and afterwards only moves
//! forward through its lifecycle.

pub mod shipment;

pub use shipment::{Cargo, CargoStatus};
