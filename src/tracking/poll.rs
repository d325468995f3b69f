use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::config::PollPolicy;
use crate::error::AppError;
use crate::models::location::LocationSample;
use crate::tracking::channel::{FeedEvent, LocationChannel, SeenCursor, Subscription};
use crate::tracking::feed::{LocationFeed, PublishOutcome};

/// Where a polling channel reads from and writes to.
#[async_trait]
pub trait SampleSource: Send + Sync {
    async fn fetch_latest(&self) -> Result<Option<LocationSample>, AppError>;

    async fn store(&self, sample: LocationSample) -> Result<PublishOutcome, AppError>;
}

#[async_trait]
impl SampleSource for LocationFeed {
    async fn fetch_latest(&self) -> Result<Option<LocationSample>, AppError> {
        self.latest()
    }

    async fn store(&self, sample: LocationSample) -> Result<PublishOutcome, AppError> {
        self.publish(sample)
    }
}

/// Pull delivery: each subscriber polls the source on an interval that backs
/// off while nothing changes and snaps back once a new sample shows up.
pub struct PollChannel {
    order_id: Uuid,
    source: Arc<dyn SampleSource>,
    policy: PollPolicy,
    staleness_window: Duration,
    buffer: usize,
}

impl PollChannel {
    pub fn new(
        order_id: Uuid,
        source: Arc<dyn SampleSource>,
        policy: PollPolicy,
        staleness_window: Duration,
        buffer: usize,
    ) -> Self {
        Self {
            order_id,
            source,
            policy,
            staleness_window,
            buffer,
        }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, AppError>>,
    ) -> Result<T, AppError> {
        tokio::time::timeout(self.policy.timeout, call)
            .await
            .map_err(|_| {
                AppError::SourceTimeout(format!(
                    "order {} after {:?}",
                    self.order_id, self.policy.timeout
                ))
            })?
    }
}

#[async_trait]
impl LocationChannel for PollChannel {
    fn order_id(&self) -> Uuid {
        self.order_id
    }

    fn transport(&self) -> &'static str {
        "poll"
    }

    async fn publish(&self, sample: LocationSample) -> Result<PublishOutcome, AppError> {
        self.bounded(self.source.store(sample)).await
    }

    async fn latest(&self) -> Result<Option<LocationSample>, AppError> {
        self.bounded(self.source.fetch_latest()).await
    }

    fn subscribe(&self) -> Subscription {
        let poller = Poller {
            order_id: self.order_id,
            source: self.source.clone(),
            policy: self.policy,
            staleness_window: self.staleness_window,
        };
        Subscription::spawn(self.buffer, move |tx| poller.run(tx))
    }
}

fn interval_backoff(policy: &PollPolicy) -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(policy.interval)
        .with_max_interval(policy.max_interval)
        .with_multiplier(2.0)
        .with_randomization_factor(0.0)
        .with_max_elapsed_time(None)
        .build()
}

struct Poller {
    order_id: Uuid,
    source: Arc<dyn SampleSource>,
    policy: PollPolicy,
    staleness_window: Duration,
}

impl Poller {
    async fn run(self, tx: mpsc::Sender<FeedEvent>) {
        let mut backoff = interval_backoff(&self.policy);
        let mut cursor = SeenCursor::default();
        let mut last_sample: Option<LocationSample> = None;
        let mut quiet_since = Instant::now();
        let mut stale_flagged = false;

        loop {
            let fetched =
                tokio::time::timeout(self.policy.timeout, self.source.fetch_latest()).await;

            let delay = match fetched {
                Ok(Ok(Some(sample))) if cursor.advance(&sample) => {
                    last_sample = Some(sample.clone());
                    quiet_since = Instant::now();
                    stale_flagged = false;
                    backoff.reset();
                    if tx.send(FeedEvent::Sample(sample)).await.is_err() {
                        return;
                    }
                    self.policy.interval
                }
                Ok(Ok(_)) => backoff.next_backoff().unwrap_or(self.policy.max_interval),
                Ok(Err(AppError::TrackingEnded(_))) => {
                    let _ = tx.send(FeedEvent::Closed).await;
                    return;
                }
                Ok(Err(err)) => {
                    debug!(order_id = %self.order_id, error = %err, "location poll failed");
                    backoff.next_backoff().unwrap_or(self.policy.max_interval)
                }
                Err(_) => {
                    debug!(order_id = %self.order_id, "location poll timed out");
                    backoff.next_backoff().unwrap_or(self.policy.max_interval)
                }
            };

            if !stale_flagged && quiet_since.elapsed() >= self.staleness_window {
                stale_flagged = true;
                let event = FeedEvent::Stale {
                    last_sample: last_sample.clone(),
                };
                if tx.send(event).await.is_err() {
                    return;
                }
            }

            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use uuid::Uuid;

    use super::{PollChannel, SampleSource};
    use crate::config::PollPolicy;
    use crate::error::AppError;
    use crate::models::location::LocationSample;
    use crate::tracking::channel::{FeedEvent, LocationChannel};
    use crate::tracking::feed::tests::sample;
    use crate::tracking::feed::{LocationFeed, PublishOutcome};

    const WINDOW: Duration = Duration::from_secs(30);

    fn channel_over(order_id: Uuid, source: Arc<dyn SampleSource>) -> PollChannel {
        PollChannel::new(order_id, source, PollPolicy::default(), WINDOW, 8)
    }

    /// Never has anything; counts how often it was asked.
    #[derive(Default)]
    struct EmptySource {
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl SampleSource for EmptySource {
        async fn fetch_latest(&self) -> Result<Option<LocationSample>, AppError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }

        async fn store(&self, _sample: LocationSample) -> Result<PublishOutcome, AppError> {
            Ok(PublishOutcome::Accepted)
        }
    }

    /// Never answers within any reasonable timeout.
    pub(crate) struct HangingSource;

    #[async_trait]
    impl SampleSource for HangingSource {
        async fn fetch_latest(&self) -> Result<Option<LocationSample>, AppError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(None)
        }

        async fn store(&self, _sample: LocationSample) -> Result<PublishOutcome, AppError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(PublishOutcome::Accepted)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn polls_pick_up_new_samples_then_report_staleness_and_close() {
        let order_id = Uuid::new_v4();
        let feed = Arc::new(LocationFeed::new(order_id, WINDOW));
        let channel = channel_over(order_id, feed.clone());
        let start = Utc::now();

        channel.publish(sample(order_id, 28.98, start)).await.unwrap();
        let mut subscription = channel.subscribe();
        match subscription.recv().await {
            Some(FeedEvent::Sample(s)) => assert_eq!(s.latitude, 28.98),
            other => panic!("unexpected {other:?}"),
        }

        channel
            .publish(sample(order_id, 28.99, start + chrono::Duration::seconds(3)))
            .await
            .unwrap();
        match subscription.recv().await {
            Some(FeedEvent::Sample(s)) => assert_eq!(s.latitude, 28.99),
            other => panic!("unexpected {other:?}"),
        }

        match subscription.recv().await {
            Some(FeedEvent::Stale { last_sample }) => {
                assert_eq!(last_sample.unwrap().latitude, 28.99)
            }
            other => panic!("unexpected {other:?}"),
        }

        feed.close();
        assert_eq!(subscription.recv().await, Some(FeedEvent::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_polling_backs_off_up_to_the_cap() {
        let order_id = Uuid::new_v4();
        let source = Arc::new(EmptySource::default());
        let channel = channel_over(order_id, source.clone());

        let _subscription = channel.subscribe();
        // Polls land at 0s, 5s, 15s and 35s; the next waits for the 30s cap.
        tokio::time::sleep(Duration::from_secs(40)).await;
        assert_eq!(source.fetches.load(Ordering::SeqCst), 4);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(source.fetches.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_source_is_a_retryable_timeout() {
        let channel = channel_over(Uuid::new_v4(), Arc::new(HangingSource));

        let err = channel.latest().await.unwrap_err();
        assert!(matches!(err, AppError::SourceTimeout(_)));
        assert_eq!(err.code(), "source_timeout");
        assert!(matches!(
            channel.publish(sample(Uuid::new_v4(), 1.0, Utc::now())).await,
            Err(AppError::SourceTimeout(_))
        ));
    }
}
