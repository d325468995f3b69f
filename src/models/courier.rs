use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Courier {
    pub id: Uuid,
    pub name: String,
    pub is_available: bool,
    pub is_on_duty: bool,
    /// Set only while the referenced order is OUT_FOR_DELIVERY.
    pub active_order_id: Option<Uuid>,
    /// Held between assignment and the start of delivery.
    pub reserved_order_id: Option<Uuid>,
    pub completed_deliveries: u32,
    pub updated_at: DateTime<Utc>,
}

impl Courier {
    pub fn new(id: Uuid, name: String) -> Self {
        Self {
            id,
            name,
            is_available: true,
            is_on_duty: false,
            active_order_id: None,
            reserved_order_id: None,
            completed_deliveries: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn can_take_order(&self) -> bool {
        self.is_on_duty
            && self.is_available
            && self.active_order_id.is_none()
            && self.reserved_order_id.is_none()
    }
}
