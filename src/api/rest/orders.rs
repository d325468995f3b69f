use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::rest::actor::{courier_id, require_admin};
use crate::engine::order_machine::PlaceOrder;
use crate::error::AppError;
use crate::geo::Region;
use crate::models::actor::{Actor, ActorRole};
use crate::models::assignment::Assignment;
use crate::models::order::{Order, OrderStatus, PaymentStatus};
use crate::state::AppState;
use crate::tracking::coordinator::LiveLocation;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(place_order))
        .route("/orders/available", get(available_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/accept", post(accept_order))
        .route("/orders/:id/reject", post(reject_order))
        .route("/orders/:id/cancel", post(cancel_order))
        .route("/orders/:id/advance", post(advance_order))
        .route("/orders/:id/transition", post(transition_order))
        .route("/orders/:id/assign", post(assign_order))
        .route("/orders/:id/claim", post(claim_order))
        .route("/orders/:id/start", post(start_delivery))
        .route("/orders/:id/deliver", post(deliver_order))
        .route("/orders/:id/payment", post(record_payment))
        .route("/orders/:id/location", get(live_location))
        .route("/orders/:id/viewport", get(order_viewport))
        .route("/assignments", get(list_assignments))
}

#[derive(Deserialize)]
pub struct ReasonRequest {
    pub reason: String,
}

#[derive(Deserialize)]
pub struct TransitionRequest {
    pub status: OrderStatus,
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct AssignRequest {
    pub courier_id: Uuid,
}

#[derive(Deserialize)]
pub struct PaymentRequest {
    pub status: PaymentStatus,
}

#[derive(Deserialize)]
pub struct LocationQuery {
    #[serde(default)]
    pub require_fresh: bool,
}

async fn place_order(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<PlaceOrder>,
) -> Result<Json<Order>, AppError> {
    if actor.role == ActorRole::Courier {
        return Err(AppError::unauthorized(actor.role, "place an order"));
    }

    Ok(Json(state.orders.place_order(payload)?))
}

async fn available_orders(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> Result<Json<Vec<Order>>, AppError> {
    if actor.role == ActorRole::Customer {
        return Err(AppError::unauthorized(actor.role, "list unassigned orders"));
    }

    Ok(Json(state.assignments.available_orders()))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.orders.order(id)?))
}

/// Admins accept into the kitchen; couriers accept a READY order for delivery.
async fn accept_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
) -> Result<Json<Order>, AppError> {
    match actor.role {
        ActorRole::Courier => {
            let courier = courier_id(&actor, "accept a delivery")?;
            state.assignments.assign(id, courier, &actor).await?;
            Ok(Json(state.orders.order(id)?))
        }
        _ => Ok(Json(state.orders.accept(id, actor).await?)),
    }
}

async fn reject_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
    Json(payload): Json<ReasonRequest>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.orders.reject(id, actor, payload.reason).await?))
}

async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
    Json(payload): Json<ReasonRequest>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.orders.cancel(id, actor, payload.reason).await?))
}

async fn advance_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.orders.advance(id, actor).await?))
}

async fn transition_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
    Json(payload): Json<TransitionRequest>,
) -> Result<Json<Order>, AppError> {
    let order = state
        .orders
        .transition(id, actor, payload.status, payload.reason)
        .await?;
    Ok(Json(order))
}

async fn assign_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
    Json(payload): Json<AssignRequest>,
) -> Result<Json<Assignment>, AppError> {
    require_admin(&actor, "dispatch an order")?;
    Ok(Json(
        state.assignments.assign(id, payload.courier_id, &actor).await?,
    ))
}

async fn claim_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
) -> Result<Json<Assignment>, AppError> {
    let courier = courier_id(&actor, "claim an order")?;
    Ok(Json(state.assignments.assign(id, courier, &actor).await?))
}

async fn start_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.orders.start_delivery(id, actor).await?))
}

async fn deliver_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.orders.deliver(id, actor).await?))
}

async fn record_payment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
    Json(payload): Json<PaymentRequest>,
) -> Result<Json<Order>, AppError> {
    require_admin(&actor, "report a payment result")?;
    Ok(Json(state.orders.record_payment(id, payload.status).await?))
}

async fn live_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<LocationQuery>,
) -> Result<Json<LiveLocation>, AppError> {
    let live = state.tracking.live_location(id).await?;
    let live = if query.require_fresh {
        live.ensure_fresh()?
    } else {
        live
    };
    Ok(Json(live))
}

async fn order_viewport(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Region>, AppError> {
    Ok(Json(state.tracking.compute_viewport(id)?))
}

async fn list_assignments(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> Result<Json<Vec<Assignment>>, AppError> {
    require_admin(&actor, "list assignments")?;
    Ok(Json(state.assignments.assignments()))
}
