//! Live event stream over Server-Sent Events.
//!
//! Each connection joins the broadcast hub and receives every event published
//! after it connected, in sequence order. A client that reads too slowly is
//! dropped by the hub; the stream then ends and the client reconnects.

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

use axum::{
    extract::Extension,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use starport_events::{EventEnvelope, Subscription};
use starport_infra::{BroadcastHub, SubscriberId};
use starport_trading::DomainEvent;

use crate::app::dto;
use crate::app::services::AppServices;

/// Frames buffered between the hub queue and the HTTP connection.
const FORWARD_BUFFER: usize = 16;

/// GET /stream
pub async fn stream(
    Extension(services): Extension<Arc<AppServices>>,
) -> Sse<ReceiverStream<Result<SseEvent, Infallible>>> {
    let hub = services.hub().clone();
    let (id, subscription) = hub.join();
    let (tx, rx) = mpsc::channel(FORWARD_BUFFER);

    // The hub queue is a blocking receiver; forward it from a blocking thread.
    tokio::task::spawn_blocking(move || forward(hub, id, subscription, tx));

    Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

fn forward(
    hub: Arc<BroadcastHub>,
    id: SubscriberId,
    subscription: Subscription<EventEnvelope<DomainEvent>>,
    tx: mpsc::Sender<Result<SseEvent, Infallible>>,
) {
    debug!(subscriber = %id, "stream opened");
    loop {
        match subscription.recv_timeout(Duration::from_secs(1)) {
            Ok(envelope) => {
                let event = match dto::sse_event(&envelope) {
                    Ok(event) => event,
                    Err(err) => {
                        warn!(error = %err, sequence = envelope.sequence_number(), "could not encode event");
                        continue;
                    }
                };
                // Blocks while the client is slow; the hub queue absorbs the rest.
                if tx.blocking_send(Ok(event)).is_err() {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if tx.is_closed() {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                debug!(subscriber = %id, "dropped by hub");
                break;
            }
        }
    }
    hub.leave(id);
    debug!(subscriber = %id, "stream closed");
}
