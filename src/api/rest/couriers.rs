use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::rest::actor::{courier_id, require_admin};
use crate::error::AppError;
use crate::models::actor::Actor;
use crate::models::courier::Courier;
use crate::models::location::LocationSample;
use crate::state::AppState;
use crate::tracking::coordinator::FleetView;
use crate::tracking::feed::PublishOutcome;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/couriers", post(register_courier).get(list_couriers))
        .route("/couriers/:id/duty", patch(update_duty))
        .route("/couriers/:id/location", post(report_location))
        .route("/fleet/viewport", get(fleet_viewport))
}

#[derive(Deserialize)]
pub struct RegisterCourierRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct DutyRequest {
    pub on_duty: Option<bool>,
    pub available: Option<bool>,
}

#[derive(Deserialize)]
pub struct LocationReport {
    pub order_id: Option<Uuid>,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_meters: Option<f64>,
    pub speed_kmh: Option<f64>,
    pub heading_degrees: Option<f64>,
    /// Device clock; the server clock is used when absent.
    pub captured_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct LocationAck {
    pub courier_id: Uuid,
    pub order_id: Option<Uuid>,
    pub accepted: bool,
    pub outcome: &'static str,
}

async fn register_courier(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<RegisterCourierRequest>,
) -> Result<Json<Courier>, AppError> {
    require_admin(&actor, "register a courier")?;
    Ok(Json(state.assignments.register_courier(&payload.name)?))
}

async fn list_couriers(State(state): State<Arc<AppState>>) -> Json<Vec<Courier>> {
    let mut couriers = state.assignments.couriers();
    couriers.sort_by(|a, b| a.name.cmp(&b.name));
    Json(couriers)
}

async fn update_duty(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
    Json(payload): Json<DutyRequest>,
) -> Result<Json<Courier>, AppError> {
    let courier = state
        .assignments
        .set_duty(id, &actor, payload.on_duty, payload.available)?;
    Ok(Json(courier))
}

async fn report_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    actor: Actor,
    Json(payload): Json<LocationReport>,
) -> Result<Json<LocationAck>, AppError> {
    if courier_id(&actor, "report a location")? != id {
        return Err(AppError::unauthorized(
            actor.role,
            "report another courier's location",
        ));
    }

    let now = Utc::now();
    let sample = LocationSample {
        courier_id: id,
        order_id: payload.order_id,
        latitude: payload.latitude,
        longitude: payload.longitude,
        accuracy_meters: payload.accuracy_meters,
        speed_kmh: payload.speed_kmh,
        heading_degrees: payload.heading_degrees,
        captured_at: payload.captured_at.unwrap_or(now),
        received_at: now,
    };

    let outcome = state
        .tracking
        .publish(id, payload.order_id, sample)
        .await?;

    Ok(Json(LocationAck {
        courier_id: id,
        order_id: payload.order_id,
        accepted: outcome == PublishOutcome::Accepted,
        outcome: outcome.label(),
    }))
}

async fn fleet_viewport(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> Result<Json<FleetView>, AppError> {
    require_admin(&actor, "view the whole fleet")?;
    Ok(Json(state.tracking.fleet_view()))
}
