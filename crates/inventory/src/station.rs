use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use starport_core::{DomainError, Entity, ItemId, StationId};

/// Holdings of one station.
///
/// Invariants:
/// - `quantity` never goes below zero (enforced by `u64` + checked debit)
/// - `items` holds no duplicates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub station_id: StationId,
    pub quantity: u64,
    pub items: BTreeSet<ItemId>,
}

impl Inventory {
    /// An empty inventory; stations without a stored record are treated as this.
    pub fn empty(station_id: StationId) -> Self {
        Self {
            station_id,
            quantity: 0,
            items: BTreeSet::new(),
        }
    }

    /// Build an inventory holding exactly `items` (duplicates collapse).
    pub fn stocked(station_id: StationId, items: impl IntoIterator<Item = ItemId>) -> Self {
        let items: BTreeSet<ItemId> = items.into_iter().collect();
        Self {
            station_id,
            quantity: items.len() as u64,
            items,
        }
    }

    /// Items from `wanted` this station does not hold, in request order.
    ///
    /// An item listed twice counts as missing the second time: a station cannot
    /// hand over the same item id twice.
    pub fn missing<'a>(&self, wanted: impl IntoIterator<Item = &'a ItemId>) -> Vec<ItemId> {
        let mut claimed = BTreeSet::new();
        wanted
            .into_iter()
            .filter(|item| !self.items.contains(*item) || !claimed.insert(*item))
            .cloned()
            .collect()
    }

    /// Remove `items` and decrease quantity by their count. All-or-nothing.
    pub fn debit(&mut self, items: &[ItemId]) -> Result<(), DomainError> {
        let missing = self.missing(items);
        if !missing.is_empty() {
            return Err(DomainError::invariant(format!(
                "station {} does not hold {}",
                self.station_id,
                join(&missing)
            )));
        }

        let count = items.len() as u64;
        let Some(quantity) = self.quantity.checked_sub(count) else {
            return Err(DomainError::invariant(format!(
                "station {} quantity {} cannot cover {count} items",
                self.station_id, self.quantity
            )));
        };

        for item in items {
            self.items.remove(item);
        }
        self.quantity = quantity;
        Ok(())
    }

    /// Add `items` and increase quantity by their count. Already-held ids are not duplicated.
    pub fn credit(&mut self, items: &[ItemId]) {
        self.quantity += items.len() as u64;
        self.items.extend(items.iter().cloned());
    }
}

impl Entity for Inventory {
    type Id = StationId;

    fn id(&self) -> &Self::Id {
        &self.station_id
    }
}

fn join(items: &[ItemId]) -> String {
    items.iter().map(ItemId::as_str).collect::<Vec<_>>().join(", ")
}
