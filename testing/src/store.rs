//! In-memory [`OrderStore`].

use order_saga_core::order::{CustomerId, Order, OrderId};
use order_saga_core::store::{OrderStore, StoreError};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

/// Order store backed by a `HashMap`.
///
/// Cheap to clone; clones share the same orders.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
    failing_saves: Arc<AtomicU32>,
}

impl InMemoryOrderStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` saves fail with [`StoreError::Unavailable`].
    pub fn fail_next_saves(&self, count: u32) {
        self.failing_saves.store(count, Ordering::SeqCst);
    }

    /// Number of stored orders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.orders.read().map_or(0, |orders| orders.len())
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take_failure(&self) -> bool {
        self.failing_saves
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Failed("lock poisoned".to_string())
}

impl OrderStore for InMemoryOrderStore {
    fn save(&self, order: Order) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async move {
            if self.take_failure() {
                return Err(StoreError::Unavailable("injected save failure".to_string()));
            }
            self.orders
                .write()
                .map_err(poisoned)?
                .insert(order.order_id().clone(), order);
            Ok(())
        })
    }

    fn find_by_id(
        &self,
        order_id: &OrderId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Order>, StoreError>> + Send + '_>> {
        let order_id = order_id.clone();
        Box::pin(async move { Ok(self.orders.read().map_err(poisoned)?.get(&order_id).cloned()) })
    }

    fn find_by_customer(
        &self,
        customer_id: &CustomerId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Order>, StoreError>> + Send + '_>> {
        let customer_id = customer_id.clone();
        Box::pin(async move {
            let mut orders: Vec<Order> = self
                .orders
                .read()
                .map_err(poisoned)?
                .values()
                .filter(|o| o.customer_id() == &customer_id)
                .cloned()
                .collect();
            orders.sort_by(|a, b| {
                a.created_at()
                    .cmp(&b.created_at())
                    .then_with(|| a.order_id().cmp(b.order_id()))
            });
            Ok(orders)
        })
    }
}
