use std::sync::Arc;

use crate::config::TrackingConfig;
use crate::engine::assignment::AssignmentManager;
use crate::engine::locks::OrderLocks;
use crate::engine::order_machine::{DeliveryArea, OrderStateMachine};
use crate::engine::TrackingHooks;
use crate::events::EventBus;
use crate::observability::metrics::Metrics;
use crate::store::Store;
use crate::tracking::coordinator::TrackingCoordinator;
use crate::tracking::fleet::FleetPositions;

pub struct AppState {
    pub store: Arc<Store>,
    pub events: EventBus,
    pub metrics: Metrics,
    pub tracking: Arc<TrackingCoordinator>,
    pub assignments: Arc<AssignmentManager>,
    pub orders: Arc<OrderStateMachine>,
}

impl AppState {
    pub fn new(config: TrackingConfig, event_buffer_size: usize) -> Self {
        let store = Arc::new(Store::new());
        let locks = Arc::new(OrderLocks::new());
        let positions = Arc::new(FleetPositions::new());
        let events = EventBus::new(event_buffer_size);
        let metrics = Metrics::new();
        let pickup = config.restaurant;
        let area = DeliveryArea {
            origin: config.restaurant,
            radius_km: config.delivery_radius_km,
        };

        let tracking = Arc::new(TrackingCoordinator::new(
            store.clone(),
            positions.clone(),
            config,
            events.clone(),
            metrics.clone(),
        ));
        let hooks: Arc<dyn TrackingHooks> = tracking.clone();

        let assignments = Arc::new(AssignmentManager::new(
            store.clone(),
            locks.clone(),
            positions,
            hooks.clone(),
            events.clone(),
            metrics.clone(),
            pickup,
        ));

        let orders = Arc::new(OrderStateMachine::new(
            store.clone(),
            locks,
            assignments.clone(),
            hooks,
            events.clone(),
            metrics.clone(),
            area,
        ));

        Self {
            store,
            events,
            metrics,
            tracking,
            assignments,
            orders,
        }
    }
}
