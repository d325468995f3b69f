//! The transport-agnostic location channel contract.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{TrackingConfig, TransportMode};
use crate::error::AppError;
use crate::models::location::LocationSample;
use crate::tracking::failover::FailoverChannel;
use crate::tracking::feed::{LocationFeed, PublishOutcome};
use crate::tracking::poll::PollChannel;
use crate::tracking::push::PushChannel;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    Sample(LocationSample),
    /// Nothing new within the staleness window; keep showing `last_sample`.
    Stale { last_sample: Option<LocationSample> },
    /// Tracking for the order ended.
    Closed,
}

#[async_trait]
pub trait LocationChannel: Send + Sync {
    fn order_id(&self) -> Uuid;

    fn transport(&self) -> &'static str;

    async fn publish(&self, sample: LocationSample) -> Result<PublishOutcome, AppError>;

    async fn latest(&self) -> Result<Option<LocationSample>, AppError>;

    fn subscribe(&self) -> Subscription;
}

/// A live feed for one subscriber. Delivery runs on its own task, so a slow
/// reader only ever delays itself. Dropping the subscription stops that task.
pub struct Subscription {
    events: mpsc::Receiver<FeedEvent>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn spawn<F, Fut>(buffer: usize, deliver: F) -> Self
    where
        F: FnOnce(mpsc::Sender<FeedEvent>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, events) = mpsc::channel(buffer.max(1));
        let task = tokio::spawn(deliver(tx));
        Self { events, task }
    }

    pub async fn recv(&mut self) -> Option<FeedEvent> {
        self.events.recv().await
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl Stream for Subscription {
    type Item = FeedEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<FeedEvent>> {
        self.get_mut().events.poll_recv(cx)
    }
}

/// Tracks the newest `captured_at` a subscriber has been handed.
#[derive(Debug, Default)]
pub(crate) struct SeenCursor(Option<DateTime<Utc>>);

impl SeenCursor {
    pub(crate) fn advance(&mut self, sample: &LocationSample) -> bool {
        match self.0 {
            Some(seen) if sample.captured_at <= seen => false,
            _ => {
                self.0 = Some(sample.captured_at);
                true
            }
        }
    }
}

pub fn open_channel(feed: Arc<LocationFeed>, config: &TrackingConfig) -> Arc<dyn LocationChannel> {
    let buffer = config.subscriber_buffer;

    match config.transport {
        TransportMode::Push => Arc::new(PushChannel::new(feed, buffer)),
        TransportMode::Poll => Arc::new(PollChannel::new(
            feed.order_id(),
            feed.clone(),
            config.poll,
            feed.staleness_window(),
            buffer,
        )),
        TransportMode::Failover => {
            let order_id = feed.order_id();
            let window = feed.staleness_window();
            let push = Arc::new(PushChannel::new(feed.clone(), buffer));
            let poll = Arc::new(PollChannel::new(order_id, feed, config.poll, window, buffer));
            Arc::new(FailoverChannel::new(push, poll, buffer))
        }
    }
}
