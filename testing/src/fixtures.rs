//! Fixture builders for saga tests.

use crate::mocks::test_clock;
use order_saga_core::correlation::CorrelationId;
use order_saga_core::environment::Clock;
use order_saga_core::event::{
    EventEnvelope, EventPayload, InventoryInsufficient, InventoryReserved, OrderCancelled,
    PaymentFailed, PaymentProcessed, PaymentStatus,
};
use order_saga_core::order::{CreateOrderRequest, CustomerId, OrderId, OrderItem};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Parses a decimal literal such as `"10.50"`, keeping its scale.
///
/// # Panics
///
/// Panics on an invalid literal.
#[must_use]
#[allow(clippy::expect_used)]
pub fn dec(literal: &str) -> Decimal {
    Decimal::from_str(literal).expect("valid decimal literal")
}

/// Two widgets at 10.00 and one gadget at 15.00 (total 35.00).
#[must_use]
pub fn sample_items() -> Vec<OrderItem> {
    vec![
        OrderItem::new("p1", "Widget", 2, dec("10.00")),
        OrderItem::new("p2", "Gadget", 1, dec("15.00")),
    ]
}

/// Creation request for `customer-1` with [`sample_items`].
#[must_use]
pub fn sample_request() -> CreateOrderRequest {
    CreateOrderRequest {
        customer_id: CustomerId::new("customer-1"),
        items: sample_items(),
    }
}

/// Envelope stamped by [`test_clock`] with correlation id `correlation`.
#[must_use]
pub fn envelope(correlation: &CorrelationId, payload: EventPayload) -> EventEnvelope {
    EventEnvelope::new(correlation.clone(), payload, test_clock().now())
}

/// `INVENTORY_RESERVED` for every line of [`sample_items`].
#[must_use]
pub fn inventory_reserved(order_id: &OrderId) -> EventPayload {
    EventPayload::InventoryReserved(InventoryReserved {
        order_id: order_id.clone(),
        reserved_items: BTreeMap::from([("p1".to_string(), 2), ("p2".to_string(), 1)]),
    })
}

/// `INVENTORY_INSUFFICIENT` for `p1`.
#[must_use]
pub fn inventory_insufficient(order_id: &OrderId) -> EventPayload {
    EventPayload::InventoryInsufficient(InventoryInsufficient {
        order_id: order_id.clone(),
        unavailable_items: BTreeMap::from([("p1".to_string(), 2)]),
        reason: "Insufficient stock".to_string(),
    })
}

/// `PAYMENT_PROCESSED` with the given status.
#[must_use]
pub fn payment_processed(order_id: &OrderId, amount: Decimal, status: PaymentStatus) -> EventPayload {
    EventPayload::PaymentProcessed(PaymentProcessed {
        order_id: order_id.clone(),
        payment_id: format!("pay-{order_id}"),
        amount,
        status,
    })
}

/// `PAYMENT_FAILED` with `reason`.
#[must_use]
pub fn payment_failed(order_id: &OrderId, amount: Decimal, reason: &str) -> EventPayload {
    EventPayload::PaymentFailed(PaymentFailed {
        order_id: order_id.clone(),
        payment_id: format!("pay-{order_id}"),
        amount,
        failure_reason: reason.to_string(),
    })
}

/// `ORDER_CANCELLED` with `reason`.
#[must_use]
pub fn order_cancelled(order_id: &OrderId, reason: &str) -> EventPayload {
    EventPayload::OrderCancelled(OrderCancelled {
        order_id: order_id.clone(),
        reason: reason.to_string(),
    })
}
