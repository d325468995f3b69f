use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::location::LocationSample;
use crate::tracking::channel::{FeedEvent, LocationChannel, SeenCursor, Subscription};
use crate::tracking::feed::{FeedSnapshot, LocationFeed, PublishOutcome};

/// Push delivery: subscribers are woken whenever the feed changes.
pub struct PushChannel {
    feed: Arc<LocationFeed>,
    buffer: usize,
}

impl PushChannel {
    pub fn new(feed: Arc<LocationFeed>, buffer: usize) -> Self {
        Self { feed, buffer }
    }
}

#[async_trait]
impl LocationChannel for PushChannel {
    fn order_id(&self) -> Uuid {
        self.feed.order_id()
    }

    fn transport(&self) -> &'static str {
        "push"
    }

    async fn publish(&self, sample: LocationSample) -> Result<PublishOutcome, AppError> {
        self.feed.publish(sample)
    }

    async fn latest(&self) -> Result<Option<LocationSample>, AppError> {
        self.feed.latest()
    }

    fn subscribe(&self) -> Subscription {
        let rx = self.feed.watch();
        let window = self.feed.staleness_window();
        Subscription::spawn(self.buffer, move |tx| forward(rx, window, tx))
    }
}

async fn forward(
    mut rx: watch::Receiver<FeedSnapshot>,
    window: Duration,
    tx: mpsc::Sender<FeedEvent>,
) {
    let mut cursor = SeenCursor::default();
    let mut stale_flagged = false;

    // Late subscribers start from the last known position.
    let initial = rx.borrow_and_update().clone();
    if initial.closed {
        let _ = tx.send(FeedEvent::Closed).await;
        return;
    }
    if let Some(sample) = initial.sample {
        cursor.advance(&sample);
        if tx.send(FeedEvent::Sample(sample)).await.is_err() {
            return;
        }
    }

    loop {
        match tokio::time::timeout(window, rx.changed()).await {
            Ok(Ok(())) => {
                let snapshot = rx.borrow_and_update().clone();
                if snapshot.closed {
                    let _ = tx.send(FeedEvent::Closed).await;
                    return;
                }

                if let Some(sample) = snapshot.sample {
                    if cursor.advance(&sample) {
                        stale_flagged = false;
                        if tx.send(FeedEvent::Sample(sample)).await.is_err() {
                            return;
                        }
                    }
                }
            }
            // Feed dropped without an explicit close.
            Ok(Err(_)) => {
                let _ = tx.send(FeedEvent::Closed).await;
                return;
            }
            Err(_elapsed) => {
                if !stale_flagged {
                    stale_flagged = true;
                    let last_sample = rx.borrow().sample.clone();
                    if tx.send(FeedEvent::Stale { last_sample }).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}
