use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use starport_core::{DomainError, Entity, ItemId, ShipmentId, StationId, TransactionId};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Initiated,
    Settled,
    Failed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Initiated => "initiated",
            TradeStatus::Settled => "settled",
            TradeStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TradeStatus::Initiated)
    }
}

/// A trade of items from a seller station to a buyer station.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub transaction_id: TransactionId,
    pub seller: StationId,
    pub buyer: StationId,
    pub items: Vec<ItemId>,
    pub status: TradeStatus,
}

impl Trade {
    pub fn initiated(
        transaction_id: TransactionId,
        seller: StationId,
        buyer: StationId,
        items: Vec<ItemId>,
    ) -> Self {
        Self {
            transaction_id,
            seller,
            buyer,
            items,
            status: TradeStatus::Initiated,
        }
    }

    /// The idempotency key of this trade's settlement.
    pub fn shipment_id(&self) -> ShipmentId {
        ShipmentId::for_transaction(&self.transaction_id)
    }

    /// Rules every trade must satisfy, however it entered the system.
    pub fn check(&self) -> Result<(), DomainError> {
        if self.seller == self.buyer {
            return Err(DomainError::validation("seller and buyer must be different stations"));
        }
        if self.items.is_empty() {
            return Err(DomainError::validation("a trade must list at least one item"));
        }

        let mut seen = BTreeSet::new();
        for item in &self.items {
            if !seen.insert(item) {
                return Err(DomainError::validation(format!("item {item} listed more than once")));
            }
        }
        Ok(())
    }

    /// Copy of this trade with a terminal status.
    pub fn with_status(&self, status: TradeStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}

impl Entity for Trade {
    type Id = TransactionId;

    fn id(&self) -> &Self::Id {
        &self.transaction_id
    }
}

/// Untrusted "initiate trade" input, as received at the API boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRequest {
    pub transaction_id: String,
    pub seller: String,
    pub buyer: String,
    pub items: Vec<String>,
}

impl TradeRequest {
    /// Validate and turn the request into an initiated trade.
    pub fn validate(&self) -> Result<Trade, DomainError> {
        let transaction_id: TransactionId = self
            .transaction_id
            .parse()
            .map_err(|_| DomainError::validation("transaction_id cannot be empty"))?;
        let seller: StationId = self
            .seller
            .parse()
            .map_err(|_| DomainError::validation("seller cannot be empty"))?;
        let buyer: StationId = self
            .buyer
            .parse()
            .map_err(|_| DomainError::validation("buyer cannot be empty"))?;

        let items = self
            .items
            .iter()
            .map(|raw| {
                raw.parse::<ItemId>()
                    .map_err(|_| DomainError::validation("item ids cannot be empty"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let trade = Trade::initiated(transaction_id, seller, buyer, items);
        trade.check()?;
        Ok(trade)
    }
}
