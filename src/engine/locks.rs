use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::order::Order;
use crate::store::Store;

/// Per-order serialization. Operations on one order queue behind each other;
/// different orders never share a lock.
#[derive(Default)]
pub struct OrderLocks {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

/// Held for the duration of one guarded operation. A retired guard removes the
/// order's lock entry on drop once nobody else is queued on it.
pub struct OrderGuard<'a> {
    locks: &'a OrderLocks,
    order_id: Uuid,
    held: Option<OwnedMutexGuard<()>>,
    retire: bool,
}

impl OrderGuard<'_> {
    pub fn retire(&mut self) {
        self.retire = true;
    }
}

impl Drop for OrderGuard<'_> {
    fn drop(&mut self) {
        self.held.take();
        if self.retire {
            self.locks
                .locks
                .remove_if(&self.order_id, |_, lock| Arc::strong_count(lock) == 1);
        }
    }
}

impl OrderLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, order_id: Uuid) -> OrderGuard<'_> {
        let lock = self.locks.entry(order_id).or_default().clone();
        OrderGuard {
            locks: self,
            order_id,
            held: Some(lock.lock_owned().await),
            retire: false,
        }
    }

    /// Locks `order_id` and loads the order. Unknown and terminal orders never
    /// change again, so their guards are retired and leave no entry behind.
    pub async fn lock_order(
        &self,
        store: &Store,
        order_id: Uuid,
    ) -> Result<(OrderGuard<'_>, Order), AppError> {
        let mut guard = self.acquire(order_id).await;
        match store.order(order_id) {
            Ok(order) => {
                if order.status.is_terminal() {
                    guard.retire();
                }
                Ok((guard, order))
            }
            Err(err) => {
                guard.retire();
                Err(err)
            }
        }
    }

    /// Drops the lock of an order that reached a terminal status. Late waiters
    /// still hold the old mutex and only ever observe the read-only order.
    pub fn forget(&self, order_id: Uuid) {
        self.locks.remove(&order_id);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
