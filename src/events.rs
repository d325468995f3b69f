//! Broadcast bus for lifecycle events that an external notifier relays to devices.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::warn;
use uuid::Uuid;

use crate::models::location::LocationSample;
use crate::models::order::OrderStatus;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum OrderEvent {
    #[serde(rename = "order.status.changed")]
    StatusChanged {
        order_id: Uuid,
        order_number: String,
        from: OrderStatus,
        to: OrderStatus,
        reason: Option<String>,
        at: DateTime<Utc>,
    },
    #[serde(rename = "order.courier.assigned")]
    CourierAssigned { order_id: Uuid, courier_id: Uuid },
    #[serde(rename = "order.awaiting_courier")]
    AwaitingCourier {
        order_id: Uuid,
        order_number: String,
        candidates: Vec<Uuid>,
    },
    #[serde(rename = "location.updated")]
    LocationUpdated { order_id: Uuid, sample: LocationSample },
    #[serde(rename = "location.stale")]
    LocationStale {
        order_id: Uuid,
        last_updated: Option<DateTime<Utc>>,
    },
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<OrderEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrderEvent> {
        self.sender.subscribe()
    }

    /// Subscription as a stream; a lagging reader skips what it missed.
    pub fn stream(&self) -> impl Stream<Item = OrderEvent> + Send + use<> {
        BroadcastStream::new(self.sender.subscribe()).filter_map(|result| match result {
            Ok(event) => Some(event),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(skipped, "event subscriber lagging, events dropped");
                None
            }
        })
    }

    /// Fire-and-forget: having no listener is not an error.
    pub fn publish(&self, event: OrderEvent) {
        let _ = self.sender.send(event);
    }
}
