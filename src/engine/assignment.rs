use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::locks::OrderLocks;
use crate::engine::scoring::{rank_candidates, Candidate};
use crate::engine::TrackingHooks;
use crate::error::AppError;
use crate::events::{EventBus, OrderEvent};
use crate::geo::haversine_km;
use crate::models::actor::{Actor, ActorRole};
use crate::models::assignment::{Assignment, AssignmentOrigin};
use crate::models::courier::{Courier, GeoPoint};
use crate::models::order::{Order, OrderStatus};
use crate::observability::metrics::Metrics;
use crate::store::Store;
use crate::tracking::fleet::FleetPositions;

/// Matches READY orders to couriers and owns the courier availability flags.
pub struct AssignmentManager {
    store: Arc<Store>,
    locks: Arc<OrderLocks>,
    positions: Arc<FleetPositions>,
    hooks: Arc<dyn TrackingHooks>,
    events: EventBus,
    metrics: Metrics,
    pickup: GeoPoint,
}

impl AssignmentManager {
    pub fn new(
        store: Arc<Store>,
        locks: Arc<OrderLocks>,
        positions: Arc<FleetPositions>,
        hooks: Arc<dyn TrackingHooks>,
        events: EventBus,
        metrics: Metrics,
        pickup: GeoPoint,
    ) -> Self {
        Self {
            store,
            locks,
            positions,
            hooks,
            events,
            metrics,
            pickup,
        }
    }

    pub fn register_courier(&self, name: &str) -> Result<Courier, AppError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::BadRequest("name cannot be empty".to_string()));
        }

        let courier = Courier::new(Uuid::new_v4(), name.to_string());
        self.store.couriers.insert(courier.id, courier.clone());
        info!(courier_id = %courier.id, "courier registered");
        Ok(courier)
    }

    pub fn couriers(&self) -> Vec<Courier> {
        self.store
            .couriers
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Duty toggle for the courier itself or an admin.
    pub fn set_duty(
        &self,
        courier_id: Uuid,
        actor: &Actor,
        on_duty: Option<bool>,
        available: Option<bool>,
    ) -> Result<Courier, AppError> {
        let allowed = match actor.role {
            ActorRole::Admin => true,
            ActorRole::Courier => actor.id == Some(courier_id),
            ActorRole::Customer | ActorRole::System => false,
        };
        if !allowed {
            return Err(AppError::unauthorized(actor.role, "change another courier's duty status"));
        }

        let mut courier = self
            .store
            .couriers
            .get_mut(&courier_id)
            .ok_or_else(|| AppError::NotFound(format!("courier {courier_id} not found")))?;

        if available == Some(true) && courier.active_order_id.is_some() {
            return Err(AppError::Conflict(
                "courier cannot be available during an active delivery".to_string(),
            ));
        }

        if let Some(on_duty) = on_duty {
            courier.is_on_duty = on_duty;
        }
        if let Some(available) = available {
            courier.is_available = available;
        }
        courier.updated_at = Utc::now();

        info!(
            courier_id = %courier_id,
            on_duty = courier.is_on_duty,
            available = courier.is_available,
            "courier duty updated"
        );
        Ok(courier.clone())
    }

    /// Pairs a READY order with a courier. Admin push and courier self-accept
    /// both come through here.
    pub async fn assign(
        &self,
        order_id: Uuid,
        courier_id: Uuid,
        actor: &Actor,
    ) -> Result<Assignment, AppError> {
        let result = self.assign_inner(order_id, courier_id, actor).await;

        let outcome = if result.is_ok() { "success" } else { "error" };
        self.metrics
            .assignments_total
            .with_label_values(&[outcome])
            .inc();

        result
    }

    async fn assign_inner(
        &self,
        order_id: Uuid,
        courier_id: Uuid,
        actor: &Actor,
    ) -> Result<Assignment, AppError> {
        let origin = match actor.role {
            ActorRole::Admin => AssignmentOrigin::Dispatched,
            ActorRole::Courier if actor.id == Some(courier_id) => AssignmentOrigin::SelfAccepted,
            role => return Err(AppError::unauthorized(role, "assign this order")),
        };

        let (_guard, mut order) = self.locks.lock_order(&self.store, order_id).await?;

        if order.status != OrderStatus::Ready {
            return Err(AppError::OrderNotReady(order.status));
        }
        if let Some(existing) = order.courier_id {
            return Err(AppError::Conflict(format!(
                "order {order_id} is already assigned to courier {existing}"
            )));
        }

        {
            let mut courier = self
                .store
                .couriers
                .get_mut(&courier_id)
                .ok_or_else(|| AppError::NotFound(format!("courier {courier_id} not found")))?;

            if !courier.can_take_order() {
                debug!(
                    courier_id = %courier_id,
                    on_duty = courier.is_on_duty,
                    available = courier.is_available,
                    "courier cannot take order"
                );
                return Err(AppError::CourierUnavailable(courier_id));
            }

            courier.reserved_order_id = Some(order_id);
            courier.updated_at = Utc::now();
        }

        order.courier_id = Some(courier_id);
        self.store.orders.insert(order_id, order.clone());

        let assignment = Assignment {
            id: Uuid::new_v4(),
            order_id,
            courier_id,
            origin,
            distance_to_pickup_km: self
                .positions
                .get(courier_id)
                .map(|sample| haversine_km(&sample.point(), &self.pickup)),
            assigned_at: Utc::now(),
        };
        self.store.assignments.insert(order_id, assignment.clone());

        self.hooks.order_entered_tracking(&order, courier_id);
        self.events.publish(OrderEvent::CourierAssigned {
            order_id,
            courier_id,
        });

        info!(
            order_id = %order_id,
            courier_id = %courier_id,
            origin = ?origin,
            "courier assigned"
        );

        Ok(assignment)
    }

    /// Moves the courier's reservation to an active delivery. Caller holds the order lock.
    pub(crate) fn activate_locked(&self, order: &Order, courier_id: Uuid) -> Result<(), AppError> {
        let mut courier = self
            .store
            .couriers
            .get_mut(&courier_id)
            .ok_or_else(|| AppError::NotFound(format!("courier {courier_id} not found")))?;

        if courier.active_order_id == Some(order.id) {
            return Ok(());
        }
        if courier.reserved_order_id != Some(order.id) || courier.active_order_id.is_some() {
            return Err(AppError::CourierUnavailable(courier_id));
        }

        courier.active_order_id = Some(order.id);
        courier.reserved_order_id = None;
        courier.is_available = false;
        courier.updated_at = Utc::now();
        Ok(())
    }

    /// Frees the courier of a finished order. Safe to call more than once.
    pub async fn release(&self, order_id: Uuid) -> Result<(), AppError> {
        let (_guard, order) = self.locks.lock_order(&self.store, order_id).await?;

        if !order.status.is_terminal() {
            return Err(AppError::Conflict(format!(
                "order {order_id} is still {}",
                order.status
            )));
        }

        self.release_locked(&order);
        Ok(())
    }

    /// Caller holds the order lock.
    pub(crate) fn release_locked(&self, order: &Order) {
        let Some(courier_id) = order.courier_id else {
            return;
        };

        let Some(mut courier) = self.store.couriers.get_mut(&courier_id) else {
            warn!(order_id = %order.id, courier_id = %courier_id, "assigned courier no longer registered");
            return;
        };

        let mut released = false;
        if courier.active_order_id == Some(order.id) {
            courier.active_order_id = None;
            if order.status == OrderStatus::Delivered {
                courier.completed_deliveries = courier.completed_deliveries.saturating_add(1);
            }
            released = true;
        }
        if courier.reserved_order_id == Some(order.id) {
            courier.reserved_order_id = None;
            released = true;
        }

        if released {
            courier.is_available = true;
            courier.updated_at = Utc::now();
            info!(order_id = %order.id, courier_id = %courier_id, "courier released");
        }
    }

    /// Couriers free to take `order`, best first.
    pub fn candidates_for(&self, order: &Order) -> Vec<Candidate> {
        let free: Vec<Courier> = self
            .store
            .couriers
            .iter()
            .filter(|entry| entry.value().can_take_order())
            .map(|entry| entry.value().clone())
            .collect();

        debug!(order_id = %order.id, candidates = free.len(), "ranking couriers");
        rank_candidates(&free, &self.positions, &self.pickup)
    }

    /// READY orders nobody has claimed yet, oldest first.
    pub fn available_orders(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .store
            .orders
            .iter()
            .filter(|entry| {
                let order = entry.value();
                order.status == OrderStatus::Ready && order.courier_id.is_none()
            })
            .map(|entry| entry.value().clone())
            .collect();

        orders.sort_by_key(|order| order.ready_at);
        orders
    }

    pub fn assignments(&self) -> Vec<Assignment> {
        self.store
            .assignments
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}
