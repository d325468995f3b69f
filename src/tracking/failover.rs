use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::location::LocationSample;
use crate::tracking::channel::{FeedEvent, LocationChannel, SeenCursor, Subscription};
use crate::tracking::feed::PublishOutcome;

/// Serves from `primary` and falls back to `fallback` when it fails. A
/// subscriber whose primary stream dies keeps going on the fallback without
/// seeing any sample twice.
pub struct FailoverChannel {
    primary: Arc<dyn LocationChannel>,
    fallback: Arc<dyn LocationChannel>,
    buffer: usize,
}

impl FailoverChannel {
    pub fn new(
        primary: Arc<dyn LocationChannel>,
        fallback: Arc<dyn LocationChannel>,
        buffer: usize,
    ) -> Self {
        Self {
            primary,
            fallback,
            buffer,
        }
    }

    fn exhausted(&self, primary: AppError, fallback: AppError) -> AppError {
        AppError::ChannelUnavailable(format!(
            "{} failed ({primary}), {} failed ({fallback})",
            self.primary.transport(),
            self.fallback.transport()
        ))
    }
}

#[async_trait]
impl LocationChannel for FailoverChannel {
    fn order_id(&self) -> Uuid {
        self.primary.order_id()
    }

    fn transport(&self) -> &'static str {
        "failover"
    }

    async fn publish(&self, sample: LocationSample) -> Result<PublishOutcome, AppError> {
        match self.primary.publish(sample.clone()).await {
            Ok(outcome) => Ok(outcome),
            Err(err @ AppError::TrackingEnded(_)) => Err(err),
            Err(primary) => {
                warn!(
                    order_id = %self.order_id(),
                    error = %primary,
                    "primary location channel rejected publish, using fallback"
                );
                self.fallback
                    .publish(sample)
                    .await
                    .map_err(|fallback| self.exhausted(primary, fallback))
            }
        }
    }

    async fn latest(&self) -> Result<Option<LocationSample>, AppError> {
        match self.primary.latest().await {
            Ok(sample) => Ok(sample),
            Err(err @ AppError::TrackingEnded(_)) => Err(err),
            Err(primary) => self
                .fallback
                .latest()
                .await
                .map_err(|fallback| self.exhausted(primary, fallback)),
        }
    }

    fn subscribe(&self) -> Subscription {
        let order_id = self.order_id();
        let primary = self.primary.subscribe();
        let fallback = self.fallback.clone();
        Subscription::spawn(self.buffer, move |tx| relay(order_id, primary, fallback, tx))
    }
}

enum Relayed {
    Closed,
    Interrupted,
    SubscriberGone,
}

async fn relay(
    order_id: Uuid,
    primary: Subscription,
    fallback: Arc<dyn LocationChannel>,
    tx: mpsc::Sender<FeedEvent>,
) {
    let mut cursor = SeenCursor::default();

    match drain(primary, &mut cursor, &tx).await {
        Relayed::Closed | Relayed::SubscriberGone => return,
        Relayed::Interrupted => {
            warn!(
                order_id = %order_id,
                transport = fallback.transport(),
                "primary location stream ended, switching subscriber to fallback"
            );
        }
    }

    if let Relayed::Interrupted = drain(fallback.subscribe(), &mut cursor, &tx).await {
        warn!(order_id = %order_id, "fallback location stream ended");
        let _ = tx.send(FeedEvent::Closed).await;
    }
}

async fn drain(
    mut upstream: Subscription,
    cursor: &mut SeenCursor,
    tx: &mpsc::Sender<FeedEvent>,
) -> Relayed {
    while let Some(event) = upstream.recv().await {
        let closed = matches!(event, FeedEvent::Closed);
        if let FeedEvent::Sample(sample) = &event {
            if !cursor.advance(sample) {
                continue;
            }
        }
        if tx.send(event).await.is_err() {
            return Relayed::SubscriberGone;
        }
        if closed {
            return Relayed::Closed;
        }
    }
    Relayed::Interrupted
}
