//! # Saga Participants
//!
//! The services that react to an order's saga:
//!
//! - [`inventory::InventoryService`]: reserves stock on `ORDER_CREATED`,
//!   releases it on `ORDER_CANCELLED`
//! - [`payment::PaymentService`]: charges the order total once stock is
//!   reserved
//! - [`notification::NotificationService`]: tells the customer about every
//!   step that concerns them
//!
//! Each one is an [`EventHandler`](order_saga_runtime::EventHandler) meant to
//! run behind its own dispatcher and consumer group. They dedupe inbound
//! events by `eventId` and reuse the inbound correlation id on every event
//! they emit.

pub mod inventory;
pub mod notification;
pub mod payment;

use order_saga_core::broker::DeliveryOutcome;
use order_saga_core::correlation::CorrelationTracker;
use order_saga_core::environment::Clock;
use order_saga_core::event::{EventEnvelope, EventPayload};
use order_saga_runtime::{HandlerError, Publisher};

/// Builds the follow-up of `inbound`, publishes it and waits for the broker.
///
/// A failed delivery has already been dead-lettered by the publisher; it is
/// reported as [`HandlerError::Publish`] so the inbound event is redelivered.
pub(crate) async fn publish_follow_up(
    publisher: &Publisher,
    clock: &dyn Clock,
    inbound: &EventEnvelope,
    payload: EventPayload,
) -> Result<(), HandlerError> {
    let envelope = EventEnvelope::new(
        CorrelationTracker::propagate(inbound.correlation_id()),
        payload,
        clock.now(),
    );
    match publisher.publish_event(&envelope).outcome().await {
        DeliveryOutcome::Acked { .. } => Ok(()),
        DeliveryOutcome::Failed { cause } => Err(HandlerError::Publish(cause)),
    }
}
