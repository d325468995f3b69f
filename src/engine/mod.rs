pub mod assignment;
pub mod locks;
pub mod order_machine;
pub mod scoring;
pub mod transitions;

use uuid::Uuid;

use crate::models::order::Order;

/// Lifecycle notifications the engine sends to the location layer. Called while
/// the order's lock is held, so implementations must not block.
pub trait TrackingHooks: Send + Sync {
    fn order_entered_tracking(&self, order: &Order, courier_id: Uuid);
    fn order_left_tracking(&self, order_id: Uuid);
}
