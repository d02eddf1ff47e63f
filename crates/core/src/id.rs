//! Strongly-typed identifiers used across the domain.
//!
//! Station, trade, shipment and item identifiers are opaque strings chosen by the
//! caller (e.g. `"S1"`, `"t1"`, `"widget-1"`). The newtypes keep them from being
//! mixed up and reject blank values at parse time.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Identifier of a trade transaction (unique per trade).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

/// Identifier of a space station (inventory key).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StationId(String);

/// Identifier of a cargo shipment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShipmentId(String);

/// Identifier of a single tradeable item.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

macro_rules! impl_string_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Build an identifier without validation.
            ///
            /// Prefer `parse()` for untrusted input.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $t {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Err(DomainError::invalid_id(format!("{}: must not be blank", $name)));
                }
                Ok(Self(trimmed.to_string()))
            }
        }
    };
}

impl_string_newtype!(TransactionId, "TransactionId");
impl_string_newtype!(StationId, "StationId");
impl_string_newtype!(ShipmentId, "ShipmentId");
impl_string_newtype!(ItemId, "ItemId");

impl ShipmentId {
    /// Deterministic shipment id for a trade: the settlement idempotency key.
    pub fn for_transaction(transaction_id: &TransactionId) -> Self {
        Self(format!("shipment-{}", transaction_id.as_str()))
    }
}
