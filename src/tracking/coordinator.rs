use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::TrackingConfig;
use crate::engine::TrackingHooks;
use crate::error::AppError;
use crate::events::{EventBus, OrderEvent};
use crate::geo::{bounding_region, eta_minutes, haversine_km, Region, FLEET_VIEW, ORDER_VIEW};
use crate::models::actor::ActorRole;
use crate::models::courier::GeoPoint;
use crate::models::location::{Freshness, LocationSample};
use crate::models::order::{Order, OrderStatus};
use crate::observability::metrics::Metrics;
use crate::store::Store;
use crate::tracking::channel::{open_channel, LocationChannel, Subscription};
use crate::tracking::feed::{DropReason, LocationFeed, PublishOutcome};
use crate::tracking::fleet::FleetPositions;

/// How far ahead of the server clock a device timestamp may be.
const MAX_CLOCK_SKEW_SECS: i64 = 120;

struct TrackedOrder {
    courier_id: Uuid,
    feed: Arc<LocationFeed>,
    channel: Arc<dyn LocationChannel>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LiveLocation {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub tracking: bool,
    pub transport: Option<&'static str>,
    pub sample: Option<LocationSample>,
    pub freshness: Option<Freshness>,
    pub last_updated: Option<DateTime<Utc>>,
    pub distance_km: Option<f64>,
    pub eta_minutes: Option<f64>,
    pub viewport: Option<Region>,
}

impl LiveLocation {
    /// For callers that cannot show a last-known position.
    pub fn ensure_fresh(self) -> Result<Self, AppError> {
        match self.freshness {
            Some(Freshness::Stale) => Err(AppError::StaleLocation(self.order_id)),
            _ => Ok(self),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CourierPosition {
    pub courier_id: Uuid,
    pub name: String,
    pub active_order_id: Option<Uuid>,
    pub sample: LocationSample,
}

#[derive(Debug, Clone, Serialize)]
pub struct FleetView {
    pub couriers: Vec<CourierPosition>,
    pub viewport: Option<Region>,
}

/// Opens and closes per-order location channels as orders move through the
/// lifecycle, and answers the map-facing queries.
pub struct TrackingCoordinator {
    store: Arc<Store>,
    fleet: Arc<FleetPositions>,
    channels: DashMap<Uuid, TrackedOrder>,
    config: TrackingConfig,
    events: EventBus,
    metrics: Metrics,
}

impl TrackingCoordinator {
    pub fn new(
        store: Arc<Store>,
        fleet: Arc<FleetPositions>,
        config: TrackingConfig,
        events: EventBus,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            fleet,
            channels: DashMap::new(),
            config,
            events,
            metrics,
        }
    }

    pub fn is_tracking(&self, order_id: Uuid) -> bool {
        self.channels.contains_key(&order_id)
    }

    pub fn tracked_count(&self) -> usize {
        self.channels.len()
    }

    /// Ingress for every courier sample. Samples without an order only move
    /// the courier's last known position.
    pub async fn publish(
        &self,
        courier_id: Uuid,
        order_id: Option<Uuid>,
        mut sample: LocationSample,
    ) -> Result<PublishOutcome, AppError> {
        sample.courier_id = courier_id;
        sample.order_id = order_id;
        sample.received_at = Utc::now();
        validate(&sample)?;
        self.store.courier(courier_id)?;

        let Some(order_id) = order_id else {
            let outcome = if self.fleet.record(sample) {
                PublishOutcome::Accepted
            } else {
                PublishOutcome::Dropped(DropReason::OutOfOrder)
            };
            self.count_sample(outcome.label());
            return Ok(outcome);
        };

        let (assigned, channel) = self.channel_for(order_id)?;
        if assigned != courier_id {
            return Err(AppError::unauthorized(
                ActorRole::Courier,
                format!("publish location for order {order_id}"),
            ));
        }

        self.fleet.record(sample.clone());
        let outcome = match channel.publish(sample.clone()).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.count_sample("error");
                return Err(err);
            }
        };
        self.count_sample(outcome.label());

        match outcome {
            PublishOutcome::Accepted => {
                self.events.publish(OrderEvent::LocationUpdated { order_id, sample });
            }
            PublishOutcome::Dropped(reason) => {
                debug!(
                    order_id = %order_id,
                    courier_id = %courier_id,
                    reason = ?reason,
                    "location sample dropped"
                );
            }
        }
        Ok(outcome)
    }

    pub fn subscribe(&self, order_id: Uuid) -> Result<Subscription, AppError> {
        let (_, channel) = self.channel_for(order_id)?;
        Ok(channel.subscribe())
    }

    pub async fn latest(&self, order_id: Uuid) -> Result<Option<LocationSample>, AppError> {
        let (_, channel) = self.channel_for(order_id)?;
        channel.latest().await
    }

    pub async fn live_location(&self, order_id: Uuid) -> Result<LiveLocation, AppError> {
        let order = self.store.order(order_id)?;
        if order.status.is_terminal() {
            return Err(AppError::TrackingEnded(order_id));
        }

        let tracked = self
            .channels
            .get(&order_id)
            .map(|tracked| (tracked.feed.clone(), tracked.channel.clone()));

        let now = Utc::now();
        let (sample, freshness, last_updated, transport) = match tracked {
            Some((feed, channel)) => (
                channel.latest().await?,
                Some(feed.freshness_at(now)),
                feed.last_updated(),
                Some(channel.transport()),
            ),
            None => (None, None, None, None),
        };

        let distance_km = sample
            .as_ref()
            .map(|sample| haversine_km(&sample.point(), &order.delivery));
        let eta = match (&sample, distance_km) {
            (Some(sample), Some(distance)) => eta_minutes(
                distance,
                sample.speed_kmh.unwrap_or(self.config.assumed_speed_kmh),
            ),
            _ => None,
        };
        let viewport = self.order_region(&order, sample.as_ref());

        Ok(LiveLocation {
            order_id,
            status: order.status,
            tracking: transport.is_some(),
            transport,
            sample,
            freshness,
            last_updated,
            distance_km,
            eta_minutes: eta,
            viewport,
        })
    }

    /// Region covering the destination, the pickup origin and the courier.
    pub fn compute_viewport(&self, order_id: Uuid) -> Result<Region, AppError> {
        let order = self.store.order(order_id)?;
        let latest = self
            .channels
            .get(&order_id)
            .and_then(|tracked| tracked.feed.latest().ok().flatten());

        self.order_region(&order, latest.as_ref())
            .ok_or_else(|| AppError::Internal(format!("no region for order {order_id}")))
    }

    /// On-duty couriers with a known position, plus the pickup origin.
    pub fn fleet_view(&self) -> FleetView {
        let mut couriers: Vec<CourierPosition> = self
            .store
            .couriers
            .iter()
            .filter(|courier| courier.is_on_duty)
            .filter_map(|courier| {
                self.fleet.get(courier.id).map(|sample| CourierPosition {
                    courier_id: courier.id,
                    name: courier.name.clone(),
                    active_order_id: courier.active_order_id,
                    sample,
                })
            })
            .collect();
        couriers.sort_by(|a, b| a.name.cmp(&b.name));

        let mut points: Vec<GeoPoint> = couriers.iter().map(|c| c.sample.point()).collect();
        points.push(self.config.restaurant);

        FleetView {
            viewport: bounding_region(&points, FLEET_VIEW),
            couriers,
        }
    }

    /// Flags feeds that went quiet. Each stale episode produces one
    /// `location.stale` event; returns how many were flagged this pass.
    pub fn sweep_stale(&self, now: DateTime<Utc>) -> usize {
        let mut newly_stale = Vec::new();
        let mut stale_total = 0;

        for tracked in self.channels.iter() {
            if tracked.feed.freshness_at(now) == Freshness::Stale {
                stale_total += 1;
            }
            if tracked.feed.take_stale_transition(now) {
                newly_stale.push((*tracked.key(), tracked.feed.last_updated()));
            }
        }

        self.metrics.stale_feeds.set(stale_total);

        for (order_id, last_updated) in &newly_stale {
            warn!(order_id = %order_id, last_updated = ?last_updated, "location feed went stale");
            self.events.publish(OrderEvent::LocationStale {
                order_id: *order_id,
                last_updated: *last_updated,
            });
        }
        newly_stale.len()
    }

    pub async fn run_staleness_monitor(self: Arc<Self>, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            self.sweep_stale(Utc::now());
        }
    }

    fn channel_for(&self, order_id: Uuid) -> Result<(Uuid, Arc<dyn LocationChannel>), AppError> {
        if let Some(tracked) = self.channels.get(&order_id) {
            return Ok((tracked.courier_id, tracked.channel.clone()));
        }

        let order = self.store.order(order_id)?;
        if order.status.is_terminal() {
            Err(AppError::TrackingEnded(order_id))
        } else {
            Err(AppError::Conflict(format!(
                "order {order_id} is {} and not being tracked",
                order.status
            )))
        }
    }

    fn order_region(&self, order: &Order, latest: Option<&LocationSample>) -> Option<Region> {
        let mut points = vec![order.delivery, self.config.restaurant];
        if let Some(sample) = latest {
            points.push(sample.point());
        }
        bounding_region(&points, ORDER_VIEW)
    }

    fn count_sample(&self, outcome: &str) {
        self.metrics
            .location_samples_total
            .with_label_values(&[outcome])
            .inc();
    }

    fn seed_from_idle(&self, feed: &LocationFeed, courier_id: Uuid) {
        let Some(mut idle) = self.fleet.get(courier_id) else {
            return;
        };
        idle.order_id = Some(feed.order_id());
        if let Ok(PublishOutcome::Accepted) = feed.publish(idle) {
            debug!(order_id = %feed.order_id(), courier_id = %courier_id, "feed seeded from last known position");
        }
    }
}

fn validate(sample: &LocationSample) -> Result<(), AppError> {
    if !sample.point().is_valid() {
        return Err(AppError::BadRequest(format!(
            "invalid coordinate ({}, {})",
            sample.latitude, sample.longitude
        )));
    }
    if sample.captured_at > sample.received_at + chrono::Duration::seconds(MAX_CLOCK_SKEW_SECS) {
        return Err(AppError::BadRequest(
            "captured_at is ahead of the server clock".to_string(),
        ));
    }
    if sample.speed_kmh.is_some_and(|speed| speed < 0.0) {
        return Err(AppError::BadRequest("speed_kmh cannot be negative".to_string()));
    }
    Ok(())
}

impl TrackingHooks for TrackingCoordinator {
    fn order_entered_tracking(&self, order: &Order, courier_id: Uuid) {
        match self.channels.entry(order.id) {
            Entry::Occupied(mut entry) => {
                let tracked = entry.get_mut();
                tracked.courier_id = courier_id;
                self.seed_from_idle(&tracked.feed, courier_id);
                debug!(order_id = %order.id, status = %order.status, "location channel reused");
            }
            Entry::Vacant(entry) => {
                let feed = Arc::new(LocationFeed::new(order.id, self.config.staleness_window));
                self.seed_from_idle(&feed, courier_id);
                let channel = open_channel(feed.clone(), &self.config);
                info!(
                    order_id = %order.id,
                    courier_id = %courier_id,
                    transport = channel.transport(),
                    "location channel opened"
                );
                entry.insert(TrackedOrder {
                    courier_id,
                    feed,
                    channel,
                });
                self.metrics.tracked_orders.inc();
            }
        }
    }

    fn order_left_tracking(&self, order_id: Uuid) {
        if let Some((_, tracked)) = self.channels.remove(&order_id) {
            tracked.feed.close();
            self.metrics.tracked_orders.dec();
            info!(order_id = %order_id, "location channel closed");
        }
    }
}
