//! Customer notifications for the saga steps that concern them.
//!
//! | Inbound event | Notification |
//! |---|---|
//! | `ORDER_CREATED` | `ORDER_CONFIRMATION` |
//! | `PAYMENT_PROCESSED` (`COMPLETED`) | `PAYMENT_CONFIRMATION` |
//! | `PAYMENT_FAILED` | `PAYMENT_FAILURE` |
//! | `INVENTORY_INSUFFICIENT` | `INVENTORY_SHORTAGE` |
//! | `ORDER_CANCELLED` | `ORDER_CANCELLATION` |
//!
//! Every attempt is reported with `NOTIFICATION_SENT`; its `successful` flag
//! carries the notifier's result.
//!
//! Customers are learned from `ORDER_CREATED` and remembered for a bounded
//! number of orders, oldest forgotten first.

use crate::publish_follow_up;
use async_trait::async_trait;
use order_saga_core::environment::Clock;
use order_saga_core::event::{
    EventEnvelope, EventPayload, EventType, NotificationSent, NotificationType, PaymentStatus,
};
use order_saga_core::order::{CustomerId, OrderId};
use order_saga_runtime::processed::DEFAULT_CAPACITY;
use order_saga_runtime::{BoundedMap, EventHandler, HandlerError, ProcessedEvents, Publisher};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Events the notification service consumes.
pub const EVENTS: [EventType; 5] = [
    EventType::OrderCreated,
    EventType::PaymentProcessed,
    EventType::PaymentFailed,
    EventType::InventoryInsufficient,
    EventType::OrderCancelled,
];

/// A notification could not be delivered.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Notification failed: {0}")]
pub struct NotifyError(pub String);

/// Delivery channel to customers (email, SMS, push, ...).
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends `message` to `customer_id`.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] if the message was not delivered.
    async fn send(
        &self,
        customer_id: &CustomerId,
        notification_type: NotificationType,
        message: &str,
    ) -> Result<(), NotifyError>;
}

/// Notifier that only writes a log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn send(
        &self,
        customer_id: &CustomerId,
        notification_type: NotificationType,
        message: &str,
    ) -> Result<(), NotifyError> {
        tracing::info!(
            customer_id = %customer_id,
            notification_type = ?notification_type,
            message,
            "Notification sent"
        );
        Ok(())
    }
}

/// Notifies customers and reports each notification.
pub struct NotificationService {
    notifier: Arc<dyn Notifier>,
    publisher: Publisher,
    clock: Arc<dyn Clock>,
    customers: Mutex<BoundedMap<OrderId, CustomerId>>,
    processed: ProcessedEvents,
}

impl NotificationService {
    /// Creates the service.
    #[must_use]
    pub fn new(notifier: Arc<dyn Notifier>, publisher: Publisher, clock: Arc<dyn Clock>) -> Self {
        Self {
            notifier,
            publisher,
            clock,
            customers: Mutex::new(BoundedMap::new(DEFAULT_CAPACITY)),
            processed: ProcessedEvents::default(),
        }
    }

    /// Remembers customers for at most `capacity` orders.
    #[must_use]
    pub fn with_order_capacity(mut self, capacity: usize) -> Self {
        self.customers = Mutex::new(BoundedMap::new(capacity));
        self
    }

    /// Orders whose customer is currently known.
    #[must_use]
    pub fn known_customers(&self) -> usize {
        self.customers.lock().map(|customers| customers.len()).unwrap_or(0)
    }

    fn customer_of(&self, order_id: &OrderId) -> Result<CustomerId, HandlerError> {
        self.customers
            .lock()
            .ok()
            .and_then(|customers| customers.get(order_id).cloned())
            .ok_or_else(|| HandlerError::Failed(format!("no customer known for {order_id}")))
    }
}

fn notification_for(payload: &EventPayload) -> Option<(NotificationType, String)> {
    let order_id = payload.order_id();
    let notification = match payload {
        EventPayload::OrderCreated(e) => (
            NotificationType::OrderConfirmation,
            format!("Your order {order_id} for {} has been received.", e.total_amount),
        ),
        EventPayload::PaymentProcessed(e) if e.status == PaymentStatus::Completed => (
            NotificationType::PaymentConfirmation,
            format!("Payment of {} for order {order_id} was successful.", e.amount),
        ),
        EventPayload::PaymentFailed(e) => (
            NotificationType::PaymentFailure,
            format!("Payment for order {order_id} failed: {}", e.failure_reason),
        ),
        EventPayload::InventoryInsufficient(_) => (
            NotificationType::InventoryShortage,
            format!("Some items of order {order_id} are out of stock."),
        ),
        EventPayload::OrderCancelled(e) => (
            NotificationType::OrderCancellation,
            format!("Order {order_id} was cancelled: {}", e.reason),
        ),
        _ => return None,
    };
    Some(notification)
}

#[async_trait]
impl EventHandler for NotificationService {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        if self.processed.contains(&envelope.event_id()) {
            tracing::debug!(event_id = %envelope.event_id(), "Duplicate event skipped");
            return Ok(());
        }

        let payload = envelope.payload();
        if let EventPayload::OrderCreated(created) = payload {
            if let Ok(mut customers) = self.customers.lock() {
                customers.insert(created.order_id.clone(), created.customer_id.clone());
            }
        }

        if let Some((notification_type, message)) = notification_for(payload) {
            let customer_id = self.customer_of(payload.order_id())?;
            let successful = match self.notifier.send(&customer_id, notification_type, &message).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(
                        order_id = %payload.order_id(),
                        customer_id = %customer_id,
                        error = %e,
                        "Notification not delivered"
                    );
                    false
                }
            };

            let report = EventPayload::NotificationSent(NotificationSent {
                order_id: payload.order_id().clone(),
                customer_id,
                notification_type,
                message,
                successful,
            });
            publish_follow_up(&self.publisher, self.clock.as_ref(), envelope, report).await?;
        }

        self.processed.mark(envelope.event_id());
        Ok(())
    }
}
