use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::actor::ActorRole;
use crate::models::order::OrderStatus;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid transition from {current} to {requested}")]
    InvalidTransition {
        current: OrderStatus,
        requested: OrderStatus,
    },

    #[error("order is already {0}")]
    AlreadyInState(OrderStatus),

    #[error("{role} may not {action}")]
    Unauthorized { role: ActorRole, action: String },

    #[error("courier {0} is unavailable")]
    CourierUnavailable(Uuid),

    #[error("order is {0}, expected READY")]
    OrderNotReady(OrderStatus),

    #[error("no location update for order {0} within the staleness window")]
    StaleLocation(Uuid),

    #[error("location channel unavailable: {0}")]
    ChannelUnavailable(String),

    /// A single read or write against a location source ran out of time.
    /// Retryable; the channel itself stays usable.
    #[error("location source timed out: {0}")]
    SourceTimeout(String),

    #[error("tracking ended for order {0}")]
    TrackingEnded(Uuid),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn unauthorized(role: ActorRole, action: impl Into<String>) -> Self {
        AppError::Unauthorized {
            role,
            action: action.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::Conflict(_) => "conflict",
            AppError::InvalidTransition { .. } => "invalid_transition",
            AppError::AlreadyInState(_) => "already_in_state",
            AppError::Unauthorized { .. } => "unauthorized",
            AppError::CourierUnavailable(_) => "courier_unavailable",
            AppError::OrderNotReady(_) => "order_not_ready",
            AppError::StaleLocation(_) => "stale_location",
            AppError::ChannelUnavailable(_) => "channel_unavailable",
            AppError::SourceTimeout(_) => "source_timeout",
            AppError::TrackingEnded(_) => "tracking_ended",
            AppError::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) | AppError::TrackingEnded(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_)
            | AppError::InvalidTransition { .. }
            | AppError::AlreadyInState(_)
            | AppError::CourierUnavailable(_)
            | AppError::OrderNotReady(_)
            | AppError::StaleLocation(_) => StatusCode::CONFLICT,
            AppError::Unauthorized { .. } => StatusCode::FORBIDDEN,
            AppError::ChannelUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::SourceTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": self.to_string(),
            "code": self.code(),
        }));

        (status, body).into_response()
    }
}
