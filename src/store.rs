use dashmap::DashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::assignment::Assignment;
use crate::models::courier::Courier;
use crate::models::order::Order;

/// Concurrent maps shared by the lifecycle units. Guards handed out by the
/// maps must never be held across an `.await`.
#[derive(Default)]
pub struct Store {
    pub orders: DashMap<Uuid, Order>,
    pub couriers: DashMap<Uuid, Courier>,
    pub order_numbers: DashMap<String, Uuid>,
    /// Assignment history keyed by order id.
    pub assignments: DashMap<Uuid, Assignment>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn order(&self, id: Uuid) -> Result<Order, AppError> {
        self.orders
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))
    }

    pub fn courier(&self, id: Uuid) -> Result<Courier, AppError> {
        self.couriers
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("courier {id} not found")))
    }
}
