use std::str::FromStr;

use axum::response::sse::Event as SseEvent;
use serde::{Deserialize, Serialize};

use starport_core::{DomainError, ItemId};
use starport_events::{Event, EventEnvelope};
use starport_trading::DomainEvent;

use crate::app::errors::ApiError;

// -------------------------
// Request DTOs
// -------------------------

/// `POST /trades` body.
pub use starport_trading::TradeRequest as InitiateTradeRequest;

#[derive(Debug, Deserialize)]
pub struct UpdateCargoRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ProvisionInventoryRequest {
    pub items: Vec<String>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub subscribers: usize,
    pub dropped_subscribers: u64,
    pub last_sequence: u64,
    pub settlement_workers: usize,
}

// -------------------------
// Parsing helpers
// -------------------------

/// Parse a path identifier (trimmed, non-blank).
pub fn parse_id<T>(raw: &str) -> Result<T, ApiError>
where
    T: FromStr<Err = DomainError>,
{
    raw.parse::<T>().map_err(ApiError::from)
}

pub fn parse_items(raw: &[String]) -> Result<Vec<ItemId>, ApiError> {
    raw.iter()
        .map(|item| {
            item.parse::<ItemId>()
                .map_err(|_| ApiError::from(DomainError::validation("item ids cannot be empty")))
        })
        .collect()
}

/// One SSE frame per envelope: event name = topic, id = sequence number.
pub fn sse_event(envelope: &EventEnvelope<DomainEvent>) -> Result<SseEvent, axum::Error> {
    SseEvent::default()
        .event(envelope.payload().event_type())
        .id(envelope.sequence_number().to_string())
        .json_data(envelope)
}

#[cfg(test)]
mod tests {
    use starport_core::StationId;

    use super::*;

    #[test]
    fn blank_items_are_rejected() {
        let err = parse_items(&["widget-1".to_string(), "  ".to_string()]).unwrap_err();
        assert!(matches!(err, ApiError::Domain(DomainError::Validation(_))));
    }

    #[test]
    fn ids_are_trimmed() {
        let station: StationId = parse_id(" S1 ").unwrap();
        assert_eq!(station.as_str(), "S1");
        assert!(parse_id::<StationId>("").is_err());
    }
}
