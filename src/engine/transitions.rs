//! The order lifecycle edge table.
//!
//! Every status change in the crate goes through [`authorize`]; there is no other
//! way to set `Order::status` after placement.

use crate::error::AppError;
use crate::models::actor::{Actor, ActorRole};
use crate::models::order::{Order, OrderStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    None,
    /// Caller must supply a non-blank reason.
    ReasonRequired,
    /// The order must already have a courier.
    CourierAssigned,
    /// Only the courier recorded on the order may take the edge.
    AssignedCourierOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub to: OrderStatus,
    pub role: ActorRole,
    pub guard: Guard,
}

const fn edge(to: OrderStatus, role: ActorRole, guard: Guard) -> Edge {
    Edge { to, role, guard }
}

const PRE_ACCEPTANCE: &[Edge] = &[
    edge(OrderStatus::Accepted, ActorRole::Admin, Guard::None),
    edge(OrderStatus::Cancelled, ActorRole::Admin, Guard::ReasonRequired),
];
const FROM_ACCEPTED: &[Edge] = &[edge(OrderStatus::Preparing, ActorRole::Admin, Guard::None)];
const FROM_PREPARING: &[Edge] = &[edge(OrderStatus::Ready, ActorRole::Admin, Guard::None)];
const FROM_READY: &[Edge] = &[edge(
    OrderStatus::OutForDelivery,
    ActorRole::System,
    Guard::CourierAssigned,
)];
const FROM_OUT_FOR_DELIVERY: &[Edge] = &[edge(
    OrderStatus::Delivered,
    ActorRole::Courier,
    Guard::AssignedCourierOnly,
)];

/// Outgoing edges per status. Matched without a wildcard so a new status cannot
/// be added without deciding its edges here.
pub fn edges_from(from: OrderStatus) -> &'static [Edge] {
    match from {
        OrderStatus::Placed | OrderStatus::PendingPayment => PRE_ACCEPTANCE,
        OrderStatus::Accepted => FROM_ACCEPTED,
        OrderStatus::Preparing => FROM_PREPARING,
        OrderStatus::Ready => FROM_READY,
        OrderStatus::OutForDelivery => FROM_OUT_FOR_DELIVERY,
        OrderStatus::Delivered | OrderStatus::Cancelled => &[],
    }
}

/// The forward step along the lifecycle, ignoring who may take it.
pub fn next_step(from: OrderStatus) -> Option<OrderStatus> {
    edges_from(from)
        .iter()
        .map(|edge| edge.to)
        .find(|to| *to != OrderStatus::Cancelled)
}

/// Checks that `actor` may move `order` to `target` right now.
pub fn authorize(
    order: &Order,
    actor: &Actor,
    target: OrderStatus,
    reason: Option<&str>,
) -> Result<Edge, AppError> {
    if order.status == target {
        return Err(AppError::AlreadyInState(target));
    }

    let edge = edges_from(order.status)
        .iter()
        .find(|edge| edge.to == target)
        .copied()
        .ok_or(AppError::InvalidTransition {
            current: order.status,
            requested: target,
        })?;

    if actor.role != edge.role {
        return Err(AppError::unauthorized(
            actor.role,
            format!("move an order to {target}"),
        ));
    }

    match edge.guard {
        Guard::None => {}
        Guard::ReasonRequired => {
            if reason.map_or(true, |r| r.trim().is_empty()) {
                return Err(AppError::BadRequest(format!("a reason is required to move an order to {target}")));
            }
        }
        Guard::CourierAssigned => {
            if order.courier_id.is_none() {
                return Err(AppError::Conflict(format!("order {} has no assigned courier", order.id)));
            }
        }
        Guard::AssignedCourierOnly => {
            if actor.id.is_none() || actor.id != order.courier_id {
                return Err(AppError::unauthorized(
                    actor.role,
                    "complete an order assigned to another courier",
                ));
            }
        }
    }

    Ok(edge)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::{authorize, edges_from, next_step};
    use crate::error::AppError;
    use crate::models::actor::Actor;
    use crate::models::courier::GeoPoint;
    use crate::models::order::{Order, OrderStatus, PaymentMethod, PaymentStatus};

    fn order(status: OrderStatus, courier_id: Option<Uuid>) -> Order {
        Order {
            id: Uuid::new_v4(),
            order_number: "ORD-TEST".to_string(),
            status,
            payment_method: PaymentMethod::Cod,
            payment_status: PaymentStatus::Pending,
            courier_id,
            delivery: GeoPoint::new(28.99, 77.71),
            cancel_reason: None,
            created_at: Utc::now(),
            accepted_at: None,
            ready_at: None,
            out_for_delivery_at: None,
            delivered_at: None,
        }
    }

    #[test]
    fn only_declared_edges_are_allowed() {
        let admin = Actor::admin(Uuid::new_v4());
        let allowed = [
            (OrderStatus::Placed, OrderStatus::Accepted),
            (OrderStatus::PendingPayment, OrderStatus::Accepted),
            (OrderStatus::Accepted, OrderStatus::Preparing),
            (OrderStatus::Preparing, OrderStatus::Ready),
            (OrderStatus::Ready, OrderStatus::OutForDelivery),
            (OrderStatus::OutForDelivery, OrderStatus::Delivered),
            (OrderStatus::Placed, OrderStatus::Cancelled),
            (OrderStatus::PendingPayment, OrderStatus::Cancelled),
        ];

        for from in OrderStatus::ALL {
            for to in OrderStatus::ALL {
                if from == to {
                    continue;
                }
                let declared = edges_from(from).iter().any(|edge| edge.to == to);
                assert_eq!(declared, allowed.contains(&(from, to)), "{from} -> {to}");

                if !declared {
                    let err = authorize(&order(from, None), &admin, to, Some("x")).unwrap_err();
                    assert!(matches!(err, AppError::InvalidTransition { current, requested } if current == from && requested == to));
                }
            }
        }
    }

    #[test]
    fn same_status_is_already_in_state() {
        let err = authorize(
            &order(OrderStatus::Accepted, None),
            &Actor::admin(Uuid::new_v4()),
            OrderStatus::Accepted,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::AlreadyInState(OrderStatus::Accepted)));
    }

    #[test]
    fn cancellation_after_acceptance_is_rejected() {
        let err = authorize(
            &order(OrderStatus::Preparing, None),
            &Actor::admin(Uuid::new_v4()),
            OrderStatus::Cancelled,
            Some("changed my mind"),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[test]
    fn cancellation_needs_a_reason() {
        let admin = Actor::admin(Uuid::new_v4());
        let placed = order(OrderStatus::Placed, None);

        assert!(matches!(
            authorize(&placed, &admin, OrderStatus::Cancelled, Some("   ")),
            Err(AppError::BadRequest(_))
        ));
        assert!(authorize(&placed, &admin, OrderStatus::Cancelled, Some("out of stock")).is_ok());
    }

    #[test]
    fn wrong_role_is_unauthorized() {
        let placed = order(OrderStatus::Placed, None);
        let err = authorize(&placed, &Actor::customer(Uuid::new_v4()), OrderStatus::Accepted, None)
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized { .. }));
    }

    #[test]
    fn delivery_is_limited_to_the_assigned_courier() {
        let assigned = Uuid::new_v4();
        let out = order(OrderStatus::OutForDelivery, Some(assigned));

        assert!(authorize(&out, &Actor::courier(assigned), OrderStatus::Delivered, None).is_ok());
        assert!(matches!(
            authorize(&out, &Actor::courier(Uuid::new_v4()), OrderStatus::Delivered, None),
            Err(AppError::Unauthorized { .. })
        ));
    }

    #[test]
    fn dispatch_requires_a_courier() {
        let ready = order(OrderStatus::Ready, None);
        assert!(matches!(
            authorize(&ready, &Actor::system(), OrderStatus::OutForDelivery, None),
            Err(AppError::Conflict(_))
        ));
    }

    #[test]
    fn next_step_skips_cancellation() {
        assert_eq!(next_step(OrderStatus::Placed), Some(OrderStatus::Accepted));
        assert_eq!(next_step(OrderStatus::Preparing), Some(OrderStatus::Ready));
        assert_eq!(next_step(OrderStatus::Delivered), None);
    }
}
