//! Charging orders once their stock is reserved.
//!
//! Totals are learned from `ORDER_CREATED`; the charge happens on
//! `INVENTORY_RESERVED`. A declined charge becomes `PAYMENT_FAILED`, an
//! unreachable gateway is a handler failure and the event is redelivered.
//!
//! Per-order state is bounded: a total is dropped once its outcome is
//! published, and both totals and outcomes forget their oldest orders past
//! the configured capacity.

use crate::publish_follow_up;
use async_trait::async_trait;
use order_saga_core::environment::Clock;
use order_saga_core::event::{
    EventEnvelope, EventPayload, EventType, PaymentFailed, PaymentProcessed, PaymentStatus,
};
use order_saga_core::order::OrderId;
use order_saga_runtime::processed::DEFAULT_CAPACITY;
use order_saga_runtime::{BoundedMap, EventHandler, HandlerError, ProcessedEvents, Publisher};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Events the payment service consumes.
pub const EVENTS: [EventType; 2] = [EventType::OrderCreated, EventType::InventoryReserved];

/// Why a charge did not go through.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The charge was refused; retrying will not help
    #[error("Payment declined: {0}")]
    Declined(String),

    /// The gateway could not be reached
    #[error("Payment gateway unavailable: {0}")]
    Unavailable(String),
}

/// External payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Charges `amount` for `order_id` and returns the payment id.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] if the charge did not go through.
    async fn charge(&self, order_id: &OrderId, amount: Decimal) -> Result<String, GatewayError>;
}

/// Gateway that approves every charge up to a limit.
#[derive(Debug, Clone)]
pub struct LimitGateway {
    limit: Decimal,
}

impl LimitGateway {
    /// Declines charges above `limit`.
    #[must_use]
    pub const fn new(limit: Decimal) -> Self {
        Self { limit }
    }
}

#[async_trait]
impl PaymentGateway for LimitGateway {
    async fn charge(&self, order_id: &OrderId, amount: Decimal) -> Result<String, GatewayError> {
        if amount > self.limit {
            return Err(GatewayError::Declined(format!(
                "amount {amount} exceeds limit {}",
                self.limit
            )));
        }
        let payment_id = format!("pay-{}", uuid::Uuid::new_v4());
        tracing::debug!(order_id = %order_id, payment_id = %payment_id, amount = %amount, "Charge approved");
        Ok(payment_id)
    }
}

#[derive(Debug, Clone)]
enum Settled {
    Charged { payment_id: String },
    Declined { payment_id: String, reason: String },
}

/// Charges reserved orders through a [`PaymentGateway`].
pub struct PaymentService {
    gateway: Arc<dyn PaymentGateway>,
    publisher: Publisher,
    clock: Arc<dyn Clock>,
    totals: Mutex<BoundedMap<OrderId, Decimal>>,
    settled: Mutex<BoundedMap<OrderId, Settled>>,
    processed: ProcessedEvents,
}

impl PaymentService {
    /// Creates the service.
    #[must_use]
    pub fn new(gateway: Arc<dyn PaymentGateway>, publisher: Publisher, clock: Arc<dyn Clock>) -> Self {
        Self {
            gateway,
            publisher,
            clock,
            totals: Mutex::new(BoundedMap::new(DEFAULT_CAPACITY)),
            settled: Mutex::new(BoundedMap::new(DEFAULT_CAPACITY)),
            processed: ProcessedEvents::default(),
        }
    }

    /// Keeps totals and outcomes for at most `capacity` orders each.
    #[must_use]
    pub fn with_order_capacity(mut self, capacity: usize) -> Self {
        self.totals = Mutex::new(BoundedMap::new(capacity));
        self.settled = Mutex::new(BoundedMap::new(capacity));
        self
    }

    /// Orders whose total is known but not yet charged.
    #[must_use]
    pub fn awaiting_charge(&self) -> usize {
        self.totals.lock().map(|totals| totals.len()).unwrap_or(0)
    }

    fn total_for(&self, order_id: &OrderId) -> Option<Decimal> {
        self.totals.lock().ok()?.get(order_id).copied()
    }

    fn settled_for(&self, order_id: &OrderId) -> Option<Settled> {
        self.settled.lock().ok()?.get(order_id).cloned()
    }

    async fn settle(&self, order_id: &OrderId, amount: Decimal) -> Result<Settled, HandlerError> {
        // A redelivered INVENTORY_RESERVED must not charge twice.
        if let Some(settled) = self.settled_for(order_id) {
            return Ok(settled);
        }

        let settled = match self.gateway.charge(order_id, amount).await {
            Ok(payment_id) => {
                tracing::info!(order_id = %order_id, payment_id = %payment_id, amount = %amount, "Payment processed");
                Settled::Charged { payment_id }
            }
            Err(GatewayError::Declined(reason)) => {
                tracing::warn!(order_id = %order_id, amount = %amount, reason = %reason, "Payment declined");
                Settled::Declined {
                    payment_id: format!("pay-{}", uuid::Uuid::new_v4()),
                    reason,
                }
            }
            Err(e @ GatewayError::Unavailable(_)) => return Err(HandlerError::Failed(e.to_string())),
        };

        if let Ok(mut map) = self.settled.lock() {
            map.insert(order_id.clone(), settled.clone());
        }
        Ok(settled)
    }
}

#[async_trait]
impl EventHandler for PaymentService {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        if self.processed.contains(&envelope.event_id()) {
            tracing::debug!(event_id = %envelope.event_id(), "Duplicate event skipped");
            return Ok(());
        }

        match envelope.payload() {
            EventPayload::OrderCreated(created) => {
                if let Ok(mut totals) = self.totals.lock() {
                    totals.insert(created.order_id.clone(), created.total_amount);
                }
            }
            EventPayload::InventoryReserved(reserved) => {
                let order_id = &reserved.order_id;
                // ORDER_CREATED travels on another topic and may not be here yet.
                let amount = self.total_for(order_id).ok_or_else(|| {
                    HandlerError::Failed(format!("no order total known for {order_id}"))
                })?;

                let payload = match self.settle(order_id, amount).await? {
                    Settled::Charged { payment_id } => EventPayload::PaymentProcessed(PaymentProcessed {
                        order_id: order_id.clone(),
                        payment_id,
                        amount,
                        status: PaymentStatus::Completed,
                    }),
                    Settled::Declined { payment_id, reason } => EventPayload::PaymentFailed(PaymentFailed {
                        order_id: order_id.clone(),
                        payment_id,
                        amount,
                        failure_reason: reason,
                    }),
                };
                publish_follow_up(&self.publisher, self.clock.as_ref(), envelope, payload).await?;
                if let Ok(mut totals) = self.totals.lock() {
                    totals.remove(order_id);
                }
            }
            _ => {}
        }

        self.processed.mark(envelope.event_id());
        Ok(())
    }
}
