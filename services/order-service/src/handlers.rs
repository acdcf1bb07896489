//! Dispatcher handlers feeding saga events into the [`OrderService`].

use crate::{OrderService, OrderServiceError};
use async_trait::async_trait;
use order_saga_core::broker::DeliveryOutcome;
use order_saga_core::event::{EventEnvelope, EventType};
use order_saga_runtime::{Dispatcher, EventHandler, HandlerError};
use std::sync::Arc;

/// Event types that can move an order's status.
pub const HANDLED_EVENTS: [EventType; 5] = [
    EventType::InventoryReserved,
    EventType::InventoryInsufficient,
    EventType::PaymentProcessed,
    EventType::PaymentFailed,
    EventType::OrderCancelled,
];

/// Applies inbound events through [`OrderService::apply_event`].
///
/// Waits for the follow-up publishes before returning, so the inbound message
/// is acknowledged only once they are settled. A follow-up that failed has
/// already been dead-lettered by the publisher and is not retried here.
pub struct OrderEventHandler {
    service: Arc<OrderService>,
}

impl OrderEventHandler {
    /// Creates a handler for `service`.
    #[must_use]
    pub const fn new(service: Arc<OrderService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl EventHandler for OrderEventHandler {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let update = self.service.apply_event(envelope).await.map_err(|e| match e {
            OrderServiceError::Store(e) => HandlerError::Store(e),
            other => HandlerError::Failed(other.to_string()),
        })?;

        for delivery in update.deliveries {
            if let DeliveryOutcome::Failed { cause } = delivery.outcome().await {
                tracing::warn!(
                    order_id = %envelope.order_id(),
                    trigger = %envelope.event_type(),
                    error = %cause,
                    "Follow-up event was dead-lettered"
                );
            }
        }
        Ok(())
    }
}

/// Registers an [`OrderEventHandler`] for every event in [`HANDLED_EVENTS`].
pub fn register(dispatcher: &mut Dispatcher, service: &Arc<OrderService>) {
    let handler: Arc<dyn EventHandler> = Arc::new(OrderEventHandler::new(Arc::clone(service)));
    for event_type in HANDLED_EVENTS {
        dispatcher.register(event_type, Arc::clone(&handler));
    }
}
