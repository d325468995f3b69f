use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AssignmentOrigin {
    /// Courier pulled an unassigned READY order.
    SelfAccepted,
    /// Admin pushed the order to a courier.
    Dispatched,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub courier_id: Uuid,
    pub origin: AssignmentOrigin,
    pub distance_to_pickup_km: Option<f64>,
    pub assigned_at: DateTime<Utc>,
}
