//! # Order Service
//!
//! Owns the order aggregate. Orders are created here, and their status is
//! driven by the events other services publish about them:
//!
//! ```text
//! create_order ──► ORDER_CREATED ──► (inventory, payment, notification)
//!                                          │
//!   INVENTORY_RESERVED / INVENTORY_INSUFFICIENT / PAYMENT_PROCESSED /
//!   PAYMENT_FAILED / ORDER_CANCELLED  ◄────┘
//!        │
//!        ▼
//!   apply_event ──► OrderLifecycle ──► save ──► publish follow-ups
//! ```
//!
//! Mutations of one order are serialised by a striped in-process lock on top
//! of the partition ordering the broker gives per order key.

pub mod handlers;

use order_saga_core::correlation::CorrelationTracker;
use order_saga_core::environment::Clock;
use order_saga_core::event::EventEnvelope;
use order_saga_core::lifecycle::{Decision, OrderLifecycle, Transition};
use order_saga_core::order::{
    CreateOrderRequest, CustomerId, Order, OrderId, OrderStatus, OrderStatusView, ValidationError,
};
use order_saga_core::store::{OrderStore, StoreError};
use order_saga_runtime::{PendingDelivery, Publisher};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Number of lock stripes guarding per-order mutations.
const LOCK_STRIPES: usize = 64;

/// Errors surfaced by [`OrderService`] operations.
#[derive(Error, Debug, Clone)]
pub enum OrderServiceError {
    /// The creation request was rejected
    #[error("Invalid order request: {0}")]
    Validation(#[from] ValidationError),

    /// No order with this id exists
    #[error("Order not found: {0}")]
    NotFound(OrderId),

    /// The order is in a status that does not allow the operation
    #[error("Order {order_id} is {status} and cannot be changed")]
    Terminal {
        /// Order identifier
        order_id: OrderId,
        /// Its current status
        status: OrderStatus,
    },

    /// Reading or writing the order failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of [`OrderService::create_order`].
#[derive(Debug)]
pub struct CreatedOrder {
    /// The stored order, in `CREATED`
    pub order: Order,
    /// Delivery of its `ORDER_CREATED` event
    pub delivery: PendingDelivery,
}

/// Result of applying an event or command to an existing order.
#[derive(Debug)]
pub struct OrderUpdate {
    /// What happened to the order
    pub transition: Transition,
    /// The order after the update; `None` if the order is unknown
    pub order: Option<Order>,
    /// Deliveries of the follow-up events, in publish order
    pub deliveries: Vec<PendingDelivery>,
}

/// The order service.
pub struct OrderService {
    store: Arc<dyn OrderStore>,
    publisher: Publisher,
    clock: Arc<dyn Clock>,
    locks: Vec<Mutex<()>>,
}

impl OrderService {
    /// Creates a service on top of a store and a publisher.
    #[must_use]
    pub fn new(store: Arc<dyn OrderStore>, publisher: Publisher, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            publisher,
            clock,
            locks: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Validates the request, stores the order in `CREATED` and publishes
    /// `ORDER_CREATED`.
    ///
    /// The order is saved before the event is published, so consumers never
    /// see an event for an order that does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`OrderServiceError::Validation`] for an invalid request and
    /// [`OrderServiceError::Store`] if the order cannot be saved (nothing is
    /// published then).
    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<CreatedOrder, OrderServiceError> {
        let order_id = OrderId::generate();
        let correlation_id = CorrelationTracker::for_order(&order_id);
        let (order, event) = OrderLifecycle::create(request, order_id, correlation_id, self.clock.now())?;

        self.store.save(order.clone()).await?;
        let delivery = self.publisher.publish_event(&event);

        Ok(CreatedOrder { order, delivery })
    }

    /// Looks up an order.
    ///
    /// # Errors
    ///
    /// Returns [`OrderServiceError::NotFound`] for an unknown id.
    pub async fn get_order(&self, order_id: &OrderId) -> Result<Order, OrderServiceError> {
        self.store
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| OrderServiceError::NotFound(order_id.clone()))
    }

    /// Status snapshot of an order.
    ///
    /// # Errors
    ///
    /// Returns [`OrderServiceError::NotFound`] for an unknown id.
    pub async fn get_order_status(&self, order_id: &OrderId) -> Result<OrderStatusView, OrderServiceError> {
        Ok(self.get_order(order_id).await?.status_view())
    }

    /// All orders of a customer, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`OrderServiceError::Store`] if the lookup fails.
    pub async fn get_orders_by_customer(&self, customer_id: &CustomerId) -> Result<Vec<Order>, OrderServiceError> {
        Ok(self.store.find_by_customer(customer_id).await?)
    }

    /// Cancels a non-terminal order and publishes `ORDER_CANCELLED`.
    ///
    /// # Errors
    ///
    /// Returns [`OrderServiceError::NotFound`] for an unknown id,
    /// [`OrderServiceError::Terminal`] if the order is already `COMPLETED` or
    /// `CANCELLED`, and [`OrderServiceError::Store`] if saving fails.
    pub async fn cancel_order(&self, order_id: &OrderId, reason: &str) -> Result<OrderUpdate, OrderServiceError> {
        let _guard = self.lock_for(order_id).lock().await;

        let mut order = self.get_order(order_id).await?;
        let decision = OrderLifecycle::cancel(&mut order, reason, self.clock.now());
        if !decision.transition.is_applied() {
            return Err(OrderServiceError::Terminal {
                order_id: order_id.clone(),
                status: order.status(),
            });
        }
        self.commit(order, decision).await
    }

    /// Applies an inbound saga event to the order it names.
    ///
    /// Duplicates, out-of-order events and events for unknown orders leave
    /// everything untouched. Follow-up events are published only after the
    /// updated order has been saved.
    ///
    /// # Errors
    ///
    /// Returns [`OrderServiceError::Store`] if reading or saving fails; the
    /// event can then be redelivered safely.
    pub async fn apply_event(&self, envelope: &EventEnvelope) -> Result<OrderUpdate, OrderServiceError> {
        let order_id = envelope.order_id();
        let _guard = self.lock_for(order_id).lock().await;

        let Some(mut order) = self.store.find_by_id(order_id).await? else {
            tracing::warn!(
                order_id = %order_id,
                event_type = %envelope.event_type(),
                event_id = %envelope.event_id(),
                "Event for unknown order ignored"
            );
            return Ok(OrderUpdate {
                transition: Transition::Ignored {
                    event_type: envelope.event_type(),
                },
                order: None,
                deliveries: Vec::new(),
            });
        };

        let decision = OrderLifecycle::apply(&mut order, envelope, self.clock.now());
        if !decision.transition.is_applied() {
            return Ok(OrderUpdate {
                transition: decision.transition,
                order: Some(order),
                deliveries: Vec::new(),
            });
        }
        self.commit(order, decision).await
    }

    async fn commit(&self, order: Order, decision: Decision) -> Result<OrderUpdate, OrderServiceError> {
        self.store.save(order.clone()).await?;
        let deliveries = decision
            .outbound
            .iter()
            .map(|event| self.publisher.publish_event(event))
            .collect();

        Ok(OrderUpdate {
            transition: decision.transition,
            order: Some(order),
            deliveries,
        })
    }

    fn lock_for(&self, order_id: &OrderId) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        order_id.hash(&mut hasher);
        #[allow(clippy::cast_possible_truncation)]
        let index = (hasher.finish() % self.locks.len() as u64) as usize;
        &self.locks[index]
    }
}
