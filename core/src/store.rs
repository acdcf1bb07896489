//! Persistence capability for the order aggregate.
//!
//! The order service only needs three operations; the database behind them is
//! somebody else's concern.

use crate::order::{CustomerId, Order, OrderId};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur while reading or writing orders.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// The backing store could not be reached
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The backing store rejected the operation
    #[error("Store operation failed: {0}")]
    Failed(String),
}

/// Trait for order store implementations.
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so it can be held as
/// `Arc<dyn OrderStore>`.
pub trait OrderStore: Send + Sync {
    /// Inserts or replaces an order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    fn save(&self, order: Order) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;

    /// Looks up an order by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn find_by_id(
        &self,
        order_id: &OrderId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Order>, StoreError>> + Send + '_>>;

    /// All orders of a customer, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn find_by_customer(
        &self,
        customer_id: &CustomerId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Order>, StoreError>> + Send + '_>>;
}
