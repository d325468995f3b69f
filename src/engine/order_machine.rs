use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::assignment::AssignmentManager;
use crate::engine::locks::OrderLocks;
use crate::engine::transitions::{authorize, next_step};
use crate::engine::TrackingHooks;
use crate::error::AppError;
use crate::events::{EventBus, OrderEvent};
use crate::geo::within_radius;
use crate::models::actor::{Actor, ActorRole};
use crate::models::courier::GeoPoint;
use crate::models::order::{Order, OrderStatus, PaymentMethod, PaymentStatus};
use crate::observability::metrics::Metrics;
use crate::store::Store;

const ORDER_NUMBER_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, Deserialize)]
pub struct PlaceOrder {
    pub payment_method: PaymentMethod,
    pub delivery: GeoPoint,
}

/// Where orders may be delivered.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryArea {
    pub origin: GeoPoint,
    pub radius_km: f64,
}

/// Canonical owner of every order's status.
pub struct OrderStateMachine {
    store: Arc<Store>,
    locks: Arc<OrderLocks>,
    assignments: Arc<AssignmentManager>,
    hooks: Arc<dyn TrackingHooks>,
    events: EventBus,
    metrics: Metrics,
    area: DeliveryArea,
}

impl OrderStateMachine {
    pub fn new(
        store: Arc<Store>,
        locks: Arc<OrderLocks>,
        assignments: Arc<AssignmentManager>,
        hooks: Arc<dyn TrackingHooks>,
        events: EventBus,
        metrics: Metrics,
        area: DeliveryArea,
    ) -> Self {
        Self {
            store,
            locks,
            assignments,
            hooks,
            events,
            metrics,
            area,
        }
    }

    pub fn place_order(&self, request: PlaceOrder) -> Result<Order, AppError> {
        if !request.delivery.is_valid() {
            return Err(AppError::BadRequest("delivery coordinates out of range".to_string()));
        }
        if !within_radius(&self.area.origin, &request.delivery, self.area.radius_km) {
            return Err(AppError::BadRequest(
                "delivery address is outside the delivery radius".to_string(),
            ));
        }

        let now = Utc::now();
        let id = Uuid::new_v4();
        let order_number = self.claim_order_number(id, now)?;

        let status = match request.payment_method {
            PaymentMethod::Cod => OrderStatus::Placed,
            PaymentMethod::Online => OrderStatus::PendingPayment,
        };

        let order = Order {
            id,
            order_number,
            status,
            payment_method: request.payment_method,
            payment_status: PaymentStatus::Pending,
            courier_id: None,
            delivery: request.delivery,
            cancel_reason: None,
            created_at: now,
            accepted_at: None,
            ready_at: None,
            out_for_delivery_at: None,
            delivered_at: None,
        };

        self.store.orders.insert(id, order.clone());
        info!(order_id = %id, order_number = %order.order_number, status = %status, "order placed");
        Ok(order)
    }

    fn claim_order_number(&self, order_id: Uuid, now: DateTime<Utc>) -> Result<String, AppError> {
        for _ in 0..ORDER_NUMBER_ATTEMPTS {
            let candidate = order_number(now, Uuid::new_v4());
            if let Entry::Vacant(slot) = self.store.order_numbers.entry(candidate.clone()) {
                slot.insert(order_id);
                return Ok(candidate);
            }
        }

        Err(AppError::Internal("could not allocate a unique order number".to_string()))
    }

    pub fn order(&self, order_id: Uuid) -> Result<Order, AppError> {
        self.store.order(order_id)
    }

    /// Executes one guarded status change for `order_id`.
    pub async fn transition(
        &self,
        order_id: Uuid,
        actor: Actor,
        target: OrderStatus,
        reason: Option<String>,
    ) -> Result<Order, AppError> {
        let started = Instant::now();
        let result = async {
            let (_guard, order) = self.locks.lock_order(&self.store, order_id).await?;
            self.apply_locked(order, &actor, target, reason)
        }
        .await;

        self.observe(target, started, &result);
        result
    }

    pub async fn accept(&self, order_id: Uuid, actor: Actor) -> Result<Order, AppError> {
        self.transition(order_id, actor, OrderStatus::Accepted, None).await
    }

    pub async fn cancel(&self, order_id: Uuid, actor: Actor, reason: String) -> Result<Order, AppError> {
        self.transition(order_id, actor, OrderStatus::Cancelled, Some(reason))
            .await
    }

    /// Admin rejection is a cancellation before acceptance.
    pub async fn reject(&self, order_id: Uuid, actor: Actor, reason: String) -> Result<Order, AppError> {
        self.cancel(order_id, actor, reason).await
    }

    /// Moves the order one step forward along the kitchen flow.
    pub async fn advance(&self, order_id: Uuid, actor: Actor) -> Result<Order, AppError> {
        let current = self.store.order(order_id)?.status;
        let target = next_step(current).ok_or_else(|| {
            AppError::Conflict(format!("order {order_id} is {current}, nothing to advance"))
        })?;

        self.transition(order_id, actor, target, None).await
    }

    /// Courier picks up the order: READY -> OUT_FOR_DELIVERY as a system edge.
    pub async fn start_delivery(&self, order_id: Uuid, courier: Actor) -> Result<Order, AppError> {
        let started = Instant::now();
        let result = async {
            if courier.role != ActorRole::Courier {
                return Err(AppError::unauthorized(courier.role, "start a delivery"));
            }

            let (_guard, order) = self.locks.lock_order(&self.store, order_id).await?;
            if order.courier_id.is_some() && order.courier_id != courier.id {
                return Err(AppError::unauthorized(
                    courier.role,
                    "start delivery of an order assigned to another courier",
                ));
            }

            self.apply_locked(order, &Actor::system(), OrderStatus::OutForDelivery, None)
        }
        .await;

        self.observe(OrderStatus::OutForDelivery, started, &result);
        result
    }

    pub async fn deliver(&self, order_id: Uuid, courier: Actor) -> Result<Order, AppError> {
        self.transition(order_id, courier, OrderStatus::Delivered, None)
            .await
    }

    /// Stores a payment verifier result. Never changes `status`.
    pub async fn record_payment(&self, order_id: Uuid, payment: PaymentStatus) -> Result<Order, AppError> {
        if payment == PaymentStatus::Pending {
            return Err(AppError::BadRequest(
                "payment reports must be PAID or FAILED".to_string(),
            ));
        }

        let (_guard, mut order) = self.locks.lock_order(&self.store, order_id).await?;
        if order.status.is_terminal() {
            return Err(AppError::Conflict(format!(
                "order {order_id} is {} and no longer takes payment reports",
                order.status
            )));
        }
        if order.payment_method == PaymentMethod::Cod {
            return Err(AppError::BadRequest(
                "cash orders are settled on delivery".to_string(),
            ));
        }
        if order.payment_status == PaymentStatus::Paid && payment != PaymentStatus::Paid {
            return Err(AppError::Conflict(format!("order {order_id} is already paid")));
        }

        order.payment_status = payment;
        self.store.orders.insert(order_id, order.clone());

        if payment == PaymentStatus::Failed {
            warn!(order_id = %order_id, status = %order.status, "online payment failed");
        } else {
            info!(order_id = %order_id, payment = ?payment, "payment recorded");
        }
        Ok(order)
    }

    fn apply_locked(
        &self,
        mut order: Order,
        actor: &Actor,
        target: OrderStatus,
        reason: Option<String>,
    ) -> Result<Order, AppError> {
        authorize(&order, actor, target, reason.as_deref())?;

        let from = order.status;
        let now = Utc::now();

        if target == OrderStatus::OutForDelivery {
            if let Some(courier_id) = order.courier_id {
                self.assignments.activate_locked(&order, courier_id)?;
            }
        }

        if from == OrderStatus::PendingPayment
            && target == OrderStatus::Accepted
            && order.payment_status != PaymentStatus::Paid
        {
            warn!(order_id = %order.id, payment = ?order.payment_status, "accepting order before payment completed");
        }

        order.status = target;
        order.stamp(target, now);
        if target == OrderStatus::Cancelled {
            order.cancel_reason = reason.clone();
        }
        if target == OrderStatus::Delivered && order.payment_method == PaymentMethod::Cod {
            order.payment_status = PaymentStatus::Paid;
        }

        self.store.orders.insert(order.id, order.clone());

        match target {
            OrderStatus::Ready => match order.courier_id {
                Some(courier_id) => self.hooks.order_entered_tracking(&order, courier_id),
                None => self.announce_ready(&order),
            },
            OrderStatus::OutForDelivery => {
                if let Some(courier_id) = order.courier_id {
                    self.hooks.order_entered_tracking(&order, courier_id);
                }
            }
            OrderStatus::Delivered | OrderStatus::Cancelled => {
                self.assignments.release_locked(&order);
                self.hooks.order_left_tracking(order.id);
                self.locks.forget(order.id);
            }
            OrderStatus::Placed
            | OrderStatus::PendingPayment
            | OrderStatus::Accepted
            | OrderStatus::Preparing => {}
        }

        self.events.publish(OrderEvent::StatusChanged {
            order_id: order.id,
            order_number: order.order_number.clone(),
            from,
            to: target,
            reason,
            at: now,
        });

        info!(
            order_id = %order.id,
            from = %from,
            to = %target,
            actor = %actor.role,
            "order transitioned"
        );

        Ok(order)
    }

    fn announce_ready(&self, order: &Order) {
        let candidates: Vec<Uuid> = self
            .assignments
            .candidates_for(order)
            .into_iter()
            .map(|candidate| candidate.courier_id)
            .collect();

        if candidates.is_empty() {
            info!(order_id = %order.id, "order ready, no couriers available");
        }

        self.events.publish(OrderEvent::AwaitingCourier {
            order_id: order.id,
            order_number: order.order_number.clone(),
            candidates,
        });
    }

    fn observe(&self, target: OrderStatus, started: Instant, result: &Result<Order, AppError>) {
        let outcome = match result {
            Ok(_) => "success",
            Err(err) => err.code(),
        };

        self.metrics
            .order_transitions_total
            .with_label_values(&[target.as_str(), outcome])
            .inc();
        self.metrics
            .transition_latency_seconds
            .with_label_values(&[if result.is_ok() { "success" } else { "error" }])
            .observe(started.elapsed().as_secs_f64());
    }
}

/// `ORD` + UTC timestamp + up to four random digits.
fn order_number(now: DateTime<Utc>, entropy: Uuid) -> String {
    format!("ORD{}{}", now.format("%Y%m%d%H%M%S"), entropy.as_u128() % 10_000)
}
