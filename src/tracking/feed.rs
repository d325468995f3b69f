use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::location::{Freshness, LocationSample};

#[derive(Debug, Clone, Default)]
pub struct FeedSnapshot {
    pub sample: Option<LocationSample>,
    pub closed: bool,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    Duplicate,
    OutOfOrder,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "reason")]
pub enum PublishOutcome {
    Accepted,
    Dropped(DropReason),
}

impl PublishOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            PublishOutcome::Accepted => "accepted",
            PublishOutcome::Dropped(DropReason::Duplicate) => "duplicate",
            PublishOutcome::Dropped(DropReason::OutOfOrder) => "out_of_order",
        }
    }
}

/// The single latest-sample cell of one order. Writers never wait on readers:
/// the watch value is swapped in place and receivers pick it up when they run.
pub struct LocationFeed {
    order_id: Uuid,
    opened_at: DateTime<Utc>,
    staleness_window: Duration,
    tx: watch::Sender<FeedSnapshot>,
    flagged_stale: AtomicBool,
}

impl LocationFeed {
    pub fn new(order_id: Uuid, staleness_window: Duration) -> Self {
        let (tx, _) = watch::channel(FeedSnapshot::default());
        Self {
            order_id,
            opened_at: Utc::now(),
            staleness_window,
            tx,
            flagged_stale: AtomicBool::new(false),
        }
    }

    pub fn order_id(&self) -> Uuid {
        self.order_id
    }

    pub fn staleness_window(&self) -> Duration {
        self.staleness_window
    }

    /// Stores `sample` if it was captured after the current one. Compare and
    /// replace happen in one step under the watch cell's write lock.
    pub fn publish(&self, sample: LocationSample) -> Result<PublishOutcome, AppError> {
        let mut outcome = Err(AppError::TrackingEnded(self.order_id));

        self.tx.send_if_modified(|snapshot| {
            if snapshot.closed {
                return false;
            }

            let verdict = match &snapshot.sample {
                Some(current) if current.captured_at == sample.captured_at => {
                    Some(DropReason::Duplicate)
                }
                Some(current) if !sample.is_newer_than(current) => Some(DropReason::OutOfOrder),
                _ => None,
            };

            match verdict {
                Some(reason) => {
                    outcome = Ok(PublishOutcome::Dropped(reason));
                    false
                }
                None => {
                    snapshot.sample = Some(sample);
                    outcome = Ok(PublishOutcome::Accepted);
                    true
                }
            }
        });

        if matches!(outcome, Ok(PublishOutcome::Accepted)) {
            self.flagged_stale.store(false, Ordering::Release);
        }
        outcome
    }

    pub fn latest(&self) -> Result<Option<LocationSample>, AppError> {
        let snapshot = self.tx.borrow();
        if snapshot.closed {
            return Err(AppError::TrackingEnded(self.order_id));
        }
        Ok(snapshot.sample.clone())
    }

    pub fn watch(&self) -> watch::Receiver<FeedSnapshot> {
        self.tx.subscribe()
    }

    /// Ends the feed: subscribers see `closed`, the stored sample is discarded.
    pub fn close(&self) {
        self.tx.send_modify(|snapshot| {
            snapshot.closed = true;
            snapshot.sample = None;
        });
    }

    pub fn is_closed(&self) -> bool {
        self.tx.borrow().closed
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.tx.borrow().sample.as_ref().map(|sample| sample.received_at)
    }

    pub fn freshness_at(&self, now: DateTime<Utc>) -> Freshness {
        let reference = self.last_updated().unwrap_or(self.opened_at);
        let age = (now - reference).to_std().unwrap_or_default();

        if age > self.staleness_window {
            Freshness::Stale
        } else {
            Freshness::Live
        }
    }

    /// True exactly once per stale episode; a fresh sample re-arms it.
    pub fn take_stale_transition(&self, now: DateTime<Utc>) -> bool {
        self.freshness_at(now) == Freshness::Stale && !self.flagged_stale.swap(true, Ordering::AcqRel)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::Duration;

    use chrono::{DateTime, Utc};
    use uuid::Uuid;

    use super::{DropReason, LocationFeed, PublishOutcome};
    use crate::error::AppError;
    use crate::models::location::{Freshness, LocationSample};

    pub(crate) fn sample(order_id: Uuid, lat: f64, captured_at: DateTime<Utc>) -> LocationSample {
        LocationSample {
            courier_id: Uuid::nil(),
            order_id: Some(order_id),
            latitude: lat,
            longitude: 77.7064,
            accuracy_meters: Some(8.0),
            speed_kmh: Some(18.0),
            heading_degrees: Some(90.0),
            captured_at,
            received_at: captured_at,
        }
    }

    #[test]
    fn out_of_order_sample_never_regresses_position() {
        let order_id = Uuid::new_v4();
        let feed = LocationFeed::new(order_id, Duration::from_secs(30));
        let now = Utc::now();

        assert_eq!(feed.publish(sample(order_id, 28.99, now)).unwrap(), PublishOutcome::Accepted);
        assert_eq!(
            feed.publish(sample(order_id, 28.50, now - chrono::Duration::seconds(5))).unwrap(),
            PublishOutcome::Dropped(DropReason::OutOfOrder)
        );
        assert_eq!(
            feed.publish(sample(order_id, 28.70, now)).unwrap(),
            PublishOutcome::Dropped(DropReason::Duplicate)
        );

        assert_eq!(feed.latest().unwrap().unwrap().latitude, 28.99);
    }

    #[test]
    fn closed_feed_discards_and_refuses_samples() {
        let order_id = Uuid::new_v4();
        let feed = LocationFeed::new(order_id, Duration::from_secs(30));
        feed.publish(sample(order_id, 28.99, Utc::now())).unwrap();

        feed.close();

        assert!(feed.is_closed());
        assert!(matches!(feed.latest(), Err(AppError::TrackingEnded(_))));
        assert!(matches!(
            feed.publish(sample(order_id, 29.0, Utc::now())),
            Err(AppError::TrackingEnded(_))
        ));
    }

    #[test]
    fn staleness_is_flagged_once_per_episode() {
        let order_id = Uuid::new_v4();
        let feed = LocationFeed::new(order_id, Duration::from_secs(30));
        let start = Utc::now();
        feed.publish(sample(order_id, 28.99, start)).unwrap();

        let later = start + chrono::Duration::seconds(45);
        assert_eq!(feed.freshness_at(start), Freshness::Live);
        assert_eq!(feed.freshness_at(later), Freshness::Stale);
        assert!(feed.take_stale_transition(later));
        assert!(!feed.take_stale_transition(later));

        feed.publish(sample(order_id, 29.0, later)).unwrap();
        assert_eq!(feed.freshness_at(later), Freshness::Live);
        assert!(feed.take_stale_transition(later + chrono::Duration::seconds(31)));
    }
}
