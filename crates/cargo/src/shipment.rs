use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use starport_core::{DomainError, Entity, ItemId, ShipmentId, StationId};

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CargoStatus {
    Pending,
    InTransit,
    Delivered,
}

impl CargoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CargoStatus::Pending => "pending",
            CargoStatus::InTransit => "in-transit",
            CargoStatus::Delivered => "delivered",
        }
    }
}

impl core::fmt::Display for CargoStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for CargoStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(CargoStatus::Pending),
            "in-transit" | "in_transit" => Ok(CargoStatus::InTransit),
            "delivered" => Ok(CargoStatus::Delivered),
            other => Err(DomainError::validation(format!(
                "unknown cargo status '{other}' (expected pending, in-transit or delivered)"
            ))),
        }
    }
}

/// A shipment moving traded items from origin to destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cargo {
    pub shipment_id: ShipmentId,
    pub origin: StationId,
    pub destination: StationId,
    pub items: Vec<ItemId>,
    pub status: CargoStatus,
    pub eta: DateTime<Utc>,
}

impl Cargo {
    /// A freshly dispatched shipment: pending, arriving `transit` after `created_at`.
    pub fn dispatch(
        shipment_id: ShipmentId,
        origin: StationId,
        destination: StationId,
        items: Vec<ItemId>,
        created_at: DateTime<Utc>,
        transit: Duration,
    ) -> Self {
        Self {
            shipment_id,
            origin,
            destination,
            items,
            status: CargoStatus::Pending,
            eta: created_at + transit,
        }
    }

    /// Move the shipment forward. Status never goes backwards; repeating the
    /// current status is rejected so callers can tell nothing changed.
    pub fn advance(&mut self, next: CargoStatus) -> Result<(), DomainError> {
        if next <= self.status {
            return Err(DomainError::conflict(format!(
                "cargo {} cannot move from {} to {}",
                self.shipment_id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }
}

impl Entity for Cargo {
    type Id = ShipmentId;

    fn id(&self) -> &Self::Id {
        &self.shipment_id
    }
}
