//! Order status state machine.
//!
//! ```text
//! CREATED ──► INVENTORY_RESERVED ──► PAYMENT_PROCESSED ──► COMPLETED
//!    │               │
//!    ▼               ▼
//! INVENTORY_      PAYMENT_FAILED
//! INSUFFICIENT       │
//!    │               │
//!    └──────┬────────┘
//!           ▼
//!       CANCELLED        (also reachable from any non-terminal status)
//! ```
//!
//! [`OrderLifecycle::apply`] is a pure function of the order, the inbound event
//! and the current time. It never fails: events that do not fit the current
//! status are reported as [`Transition::OutOfOrder`] and leave the order
//! untouched. Events whose `eventId` has already been applied are reported as
//! [`Transition::Duplicate`].
//!
//! Decision points produce outbound events in [`Decision::outbound`]; the
//! caller persists the order and then publishes them in order.

use crate::correlation::{CorrelationId, CorrelationTracker};
use crate::event::{
    EventEnvelope, EventPayload, EventType, OrderCancelled, OrderCreated, PaymentStatus,
};
use crate::order::{CreateOrderRequest, Order, OrderId, OrderStatus, ValidationError};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// What applying an event did to the order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    /// The status moved; `to` is the status after any automatic follow-up.
    Applied {
        /// Status before the event
        from: OrderStatus,
        /// Status after the event
        to: OrderStatus,
    },
    /// The event was applied before.
    Duplicate,
    /// The event does not fit the current status; nothing changed.
    OutOfOrder {
        /// Status the order was in
        status: OrderStatus,
        /// Event that did not fit
        event_type: EventType,
    },
    /// The event carries no decision for the order; nothing changed.
    Ignored {
        /// Event that was ignored
        event_type: EventType,
    },
}

impl Transition {
    /// Whether the order was mutated.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// Result of feeding one event (or command) to the lifecycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decision {
    /// What happened to the order
    pub transition: Transition,
    /// Events to publish, in order
    pub outbound: Vec<EventEnvelope>,
}

impl Decision {
    const fn unchanged(transition: Transition) -> Self {
        Self {
            transition,
            outbound: Vec::new(),
        }
    }
}

/// The order state machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderLifecycle;

impl OrderLifecycle {
    /// Validates a creation request and builds the order in `CREATED` together
    /// with its `ORDER_CREATED` event.
    ///
    /// The total is computed from the items; it is never taken from outside.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the request is invalid.
    pub fn create(
        request: CreateOrderRequest,
        order_id: OrderId,
        correlation_id: CorrelationId,
        now: DateTime<Utc>,
    ) -> Result<(Order, EventEnvelope), ValidationError> {
        request.validate()?;
        let total_amount = request.total_amount()?;
        let timestamp = now.naive_utc();

        let order = Order {
            order_id,
            customer_id: request.customer_id,
            items: request.items,
            status: OrderStatus::Created,
            total_amount,
            correlation_id,
            created_at: timestamp,
            updated_at: timestamp,
            applied_events: BTreeSet::new(),
        };

        let event = emit(
            &order,
            EventPayload::OrderCreated(OrderCreated {
                order_id: order.order_id.clone(),
                customer_id: order.customer_id.clone(),
                items: order.items.clone(),
                total_amount,
            }),
            now,
        );

        tracing::info!(
            order_id = %order.order_id,
            customer_id = %order.customer_id,
            total_amount = %total_amount,
            correlation_id = %order.correlation_id,
            "Order created"
        );

        Ok((order, event))
    }

    /// Applies an inbound event to `order`.
    #[must_use]
    pub fn apply(order: &mut Order, envelope: &EventEnvelope, now: DateTime<Utc>) -> Decision {
        let event_type = envelope.event_type();

        if order.has_applied(&envelope.event_id()) {
            metrics::counter!("saga.lifecycle.duplicate").increment(1);
            tracing::debug!(
                order_id = %order.order_id,
                event_id = %envelope.event_id(),
                event_type = %event_type,
                "Duplicate event ignored"
            );
            return Decision::unchanged(Transition::Duplicate);
        }

        if envelope.order_id() != &order.order_id {
            tracing::warn!(
                order_id = %order.order_id,
                event_order_id = %envelope.order_id(),
                event_type = %event_type,
                "Event refers to a different order, ignoring"
            );
            return Decision::unchanged(Transition::Ignored { event_type });
        }

        let from = order.status;
        match (from, envelope.payload()) {
            (_, EventPayload::OrderCreated(_) | EventPayload::NotificationSent(_)) => {
                tracing::debug!(
                    order_id = %order.order_id,
                    event_type = %event_type,
                    "Event carries no order decision"
                );
                Decision::unchanged(Transition::Ignored { event_type })
            }

            (OrderStatus::Created, EventPayload::InventoryReserved(_)) => {
                advance(order, envelope, OrderStatus::InventoryReserved, now);
                Decision {
                    transition: Transition::Applied {
                        from,
                        to: order.status,
                    },
                    outbound: Vec::new(),
                }
            }

            (OrderStatus::Created, EventPayload::InventoryInsufficient(e)) => {
                advance(order, envelope, OrderStatus::InventoryInsufficient, now);
                let reason = format!("Inventory insufficient: {}", e.reason);
                auto_cancel(order, from, reason, now)
            }

            (OrderStatus::InventoryReserved, EventPayload::PaymentProcessed(e)) => match e.status {
                PaymentStatus::Completed => {
                    advance(order, envelope, OrderStatus::PaymentProcessed, now);
                    // No external decision remains on the success path.
                    order.status = OrderStatus::Completed;
                    tracing::info!(order_id = %order.order_id, "Order completed");
                    Decision {
                        transition: Transition::Applied {
                            from,
                            to: order.status,
                        },
                        outbound: Vec::new(),
                    }
                }
                PaymentStatus::Failed => {
                    advance(order, envelope, OrderStatus::PaymentFailed, now);
                    let reason = format!("Payment failed: payment {} reported FAILED", e.payment_id);
                    auto_cancel(order, from, reason, now)
                }
                PaymentStatus::Pending | PaymentStatus::Processing | PaymentStatus::Refunded => {
                    tracing::debug!(
                        order_id = %order.order_id,
                        payment_status = ?e.status,
                        "Payment status is not decisive"
                    );
                    Decision::unchanged(Transition::Ignored { event_type })
                }
            },

            (OrderStatus::InventoryReserved, EventPayload::PaymentFailed(e)) => {
                advance(order, envelope, OrderStatus::PaymentFailed, now);
                let reason = format!("Payment failed: {}", e.failure_reason);
                auto_cancel(order, from, reason, now)
            }

            (status, EventPayload::OrderCancelled(e)) if !status.is_terminal() => {
                advance(order, envelope, OrderStatus::Cancelled, now);
                tracing::info!(
                    order_id = %order.order_id,
                    reason = %e.reason,
                    "Order cancelled"
                );
                Decision {
                    transition: Transition::Applied {
                        from,
                        to: order.status,
                    },
                    outbound: Vec::new(),
                }
            }

            (status, _) => {
                metrics::counter!("saga.lifecycle.out_of_order", "event_type" => event_type.as_str())
                    .increment(1);
                tracing::warn!(
                    order_id = %order.order_id,
                    status = %status,
                    event_type = %event_type,
                    event_id = %envelope.event_id(),
                    "Out-of-order event ignored"
                );
                Decision::unchanged(Transition::OutOfOrder { status, event_type })
            }
        }
    }

    /// Cancels a non-terminal order on request and produces `ORDER_CANCELLED`.
    ///
    /// A terminal order is left alone and reported as
    /// [`Transition::OutOfOrder`].
    #[must_use]
    pub fn cancel(order: &mut Order, reason: impl Into<String>, now: DateTime<Utc>) -> Decision {
        let from = order.status;
        if from.is_terminal() {
            tracing::warn!(
                order_id = %order.order_id,
                status = %from,
                "Cannot cancel order in terminal status"
            );
            return Decision::unchanged(Transition::OutOfOrder {
                status: from,
                event_type: EventType::OrderCancelled,
            });
        }

        let reason = reason.into();
        let event = emit(
            order,
            EventPayload::OrderCancelled(OrderCancelled {
                order_id: order.order_id.clone(),
                reason: reason.clone(),
            }),
            now,
        );
        advance(order, &event, OrderStatus::Cancelled, now);
        tracing::info!(order_id = %order.order_id, reason = %reason, "Order cancelled");

        Decision {
            transition: Transition::Applied {
                from,
                to: order.status,
            },
            outbound: vec![event],
        }
    }
}

fn advance(order: &mut Order, envelope: &EventEnvelope, to: OrderStatus, now: DateTime<Utc>) {
    tracing::info!(
        order_id = %order.order_id,
        from = %order.status,
        to = %to,
        event_type = %envelope.event_type(),
        correlation_id = %envelope.correlation_id(),
        "Order status changed"
    );
    order.status = to;
    order.updated_at = now.naive_utc();
    order.applied_events.insert(envelope.event_id());
}

// The cancellation is applied locally (its event id recorded) so that its
// echo from the topic is a duplicate.
fn auto_cancel(order: &mut Order, from: OrderStatus, reason: String, now: DateTime<Utc>) -> Decision {
    let event = emit(
        order,
        EventPayload::OrderCancelled(OrderCancelled {
            order_id: order.order_id.clone(),
            reason,
        }),
        now,
    );
    advance(order, &event, OrderStatus::Cancelled, now);
    Decision {
        transition: Transition::Applied {
            from,
            to: order.status,
        },
        outbound: vec![event],
    }
}

fn emit(order: &Order, payload: EventPayload, now: DateTime<Utc>) -> EventEnvelope {
    EventEnvelope::new(
        CorrelationTracker::propagate(&order.correlation_id),
        payload,
        now,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{InventoryInsufficient, InventoryReserved, PaymentFailed, PaymentProcessed};
    use crate::order::{CustomerId, OrderItem};
    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;
    use std::collections::BTreeMap;
    use std::str::FromStr;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn new_order() -> (Order, EventEnvelope) {
        OrderLifecycle::create(
            CreateOrderRequest {
                customer_id: CustomerId::new("customer-1"),
                items: vec![
                    OrderItem::new("p1", "Widget", 2, dec("10.00")),
                    OrderItem::new("p2", "Gadget", 1, dec("15.00")),
                ],
            },
            OrderId::new("order-1"),
            CorrelationId::new("saga-1"),
            t0(),
        )
        .unwrap()
    }

    fn inbound(payload: EventPayload) -> EventEnvelope {
        EventEnvelope::new(CorrelationId::new("saga-1"), payload, t0())
    }

    fn reserved() -> EventEnvelope {
        inbound(EventPayload::InventoryReserved(InventoryReserved {
            order_id: OrderId::new("order-1"),
            reserved_items: BTreeMap::from([("p1".to_string(), 2), ("p2".to_string(), 1)]),
        }))
    }

    fn payment(status: PaymentStatus) -> EventEnvelope {
        inbound(EventPayload::PaymentProcessed(PaymentProcessed {
            order_id: OrderId::new("order-1"),
            payment_id: "pay-1".to_string(),
            amount: dec("35.00"),
            status,
        }))
    }

    fn payment_failed() -> EventEnvelope {
        inbound(EventPayload::PaymentFailed(PaymentFailed {
            order_id: OrderId::new("order-1"),
            payment_id: "pay-1".to_string(),
            amount: dec("35.00"),
            failure_reason: "card declined".to_string(),
        }))
    }

    fn cancelled() -> EventEnvelope {
        inbound(EventPayload::OrderCancelled(OrderCancelled {
            order_id: OrderId::new("order-1"),
            reason: "customer request".to_string(),
        }))
    }

    #[test]
    fn create_computes_total_and_emits_order_created() {
        let (order, event) = new_order();
        assert_eq!(order.status(), OrderStatus::Created);
        assert_eq!(order.total_amount().to_string(), "35.00");
        assert_eq!(order.created_at(), order.updated_at());

        assert_eq!(event.event_type(), EventType::OrderCreated);
        assert_eq!(event.correlation_id(), order.correlation_id());
        let EventPayload::OrderCreated(created) = event.payload() else {
            panic!("expected ORDER_CREATED");
        };
        assert_eq!(created.total_amount, dec("35.00"));
        assert_eq!(created.items.len(), 2);
    }

    #[test]
    fn create_rejects_invalid_request() {
        let result = OrderLifecycle::create(
            CreateOrderRequest {
                customer_id: CustomerId::new("c"),
                items: vec![],
            },
            OrderId::new("o"),
            CorrelationId::new("s"),
            t0(),
        );
        assert_eq!(result.unwrap_err(), ValidationError::NoItems);
    }

    #[test]
    fn happy_path_reaches_completed() {
        let (mut order, _) = new_order();

        let d = OrderLifecycle::apply(&mut order, &reserved(), t0() + Duration::seconds(1));
        assert_eq!(
            d.transition,
            Transition::Applied {
                from: OrderStatus::Created,
                to: OrderStatus::InventoryReserved
            }
        );
        assert!(d.outbound.is_empty());

        let later = t0() + Duration::seconds(2);
        let d = OrderLifecycle::apply(&mut order, &payment(PaymentStatus::Completed), later);
        assert_eq!(
            d.transition,
            Transition::Applied {
                from: OrderStatus::InventoryReserved,
                to: OrderStatus::Completed
            }
        );
        assert_eq!(order.status(), OrderStatus::Completed);
        assert_eq!(order.updated_at(), later.naive_utc());
    }

    #[test]
    fn same_event_twice_is_duplicate() {
        let (mut order, _) = new_order();
        let event = reserved();

        let first = OrderLifecycle::apply(&mut order, &event, t0());
        assert!(first.transition.is_applied());
        let snapshot = order.clone();

        let second = OrderLifecycle::apply(&mut order, &event, t0() + Duration::seconds(5));
        assert_eq!(second.transition, Transition::Duplicate);
        assert!(second.outbound.is_empty());
        assert_eq!(order, snapshot);
    }

    #[test]
    fn payment_failed_after_completion_is_out_of_order() {
        let (mut order, _) = new_order();
        let _ = OrderLifecycle::apply(&mut order, &reserved(), t0());
        let _ = OrderLifecycle::apply(&mut order, &payment(PaymentStatus::Completed), t0());
        let snapshot = order.clone();

        let d = OrderLifecycle::apply(&mut order, &payment_failed(), t0() + Duration::seconds(9));
        assert_eq!(
            d.transition,
            Transition::OutOfOrder {
                status: OrderStatus::Completed,
                event_type: EventType::PaymentFailed
            }
        );
        assert_eq!(order, snapshot);
    }

    #[test]
    fn terminal_states_accept_nothing() {
        let (mut completed, _) = new_order();
        let _ = OrderLifecycle::apply(&mut completed, &reserved(), t0());
        let _ = OrderLifecycle::apply(&mut completed, &payment(PaymentStatus::Completed), t0());

        let (mut cancelled_order, _) = new_order();
        let _ = OrderLifecycle::apply(&mut cancelled_order, &cancelled(), t0());
        assert_eq!(cancelled_order.status(), OrderStatus::Cancelled);

        for order in [&mut completed, &mut cancelled_order] {
            let before = order.status();
            for event in [reserved(), payment(PaymentStatus::Completed), payment_failed(), cancelled()] {
                let d = OrderLifecycle::apply(order, &event, t0());
                assert!(!d.transition.is_applied());
                assert!(d.outbound.is_empty());
                assert_eq!(order.status(), before);
            }
            assert!(!OrderLifecycle::cancel(order, "late", t0()).transition.is_applied());
        }
    }

    #[test]
    fn inventory_insufficient_cancels_and_emits() {
        let (mut order, _) = new_order();
        let event = inbound(EventPayload::InventoryInsufficient(InventoryInsufficient {
            order_id: OrderId::new("order-1"),
            unavailable_items: BTreeMap::from([("p1".to_string(), 2)]),
            reason: "Insufficient stock".to_string(),
        }));

        let d = OrderLifecycle::apply(&mut order, &event, t0());
        assert_eq!(
            d.transition,
            Transition::Applied {
                from: OrderStatus::Created,
                to: OrderStatus::Cancelled
            }
        );
        assert_eq!(d.outbound.len(), 1);
        let cancel = &d.outbound[0];
        assert_eq!(cancel.event_type(), EventType::OrderCancelled);
        assert_eq!(cancel.correlation_id(), order.correlation_id());
        let EventPayload::OrderCancelled(c) = cancel.payload() else {
            panic!("expected ORDER_CANCELLED");
        };
        assert!(c.reason.contains("Insufficient stock"));

        // The echo of our own cancellation is a duplicate.
        assert_eq!(
            OrderLifecycle::apply(&mut order, cancel, t0()).transition,
            Transition::Duplicate
        );
    }

    #[test]
    fn payment_failures_cancel() {
        let (mut order, _) = new_order();
        let _ = OrderLifecycle::apply(&mut order, &reserved(), t0());
        let d = OrderLifecycle::apply(&mut order, &payment_failed(), t0());
        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert_eq!(d.outbound.len(), 1);

        let (mut order, _) = new_order();
        let _ = OrderLifecycle::apply(&mut order, &reserved(), t0());
        let d = OrderLifecycle::apply(&mut order, &payment(PaymentStatus::Failed), t0());
        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert_eq!(d.outbound.len(), 1);
    }

    #[test]
    fn non_decisive_payment_status_is_ignored() {
        for status in [PaymentStatus::Pending, PaymentStatus::Processing, PaymentStatus::Refunded] {
            let (mut order, _) = new_order();
            let _ = OrderLifecycle::apply(&mut order, &reserved(), t0());
            let d = OrderLifecycle::apply(&mut order, &payment(status), t0());
            assert_eq!(
                d.transition,
                Transition::Ignored {
                    event_type: EventType::PaymentProcessed
                }
            );
            assert_eq!(order.status(), OrderStatus::InventoryReserved);
        }
    }

    #[test]
    fn payment_before_reservation_is_out_of_order() {
        let (mut order, _) = new_order();
        let d = OrderLifecycle::apply(&mut order, &payment(PaymentStatus::Completed), t0());
        assert_eq!(
            d.transition,
            Transition::OutOfOrder {
                status: OrderStatus::Created,
                event_type: EventType::PaymentProcessed
            }
        );
        assert_eq!(order.status(), OrderStatus::Created);
    }

    #[test]
    fn echo_and_notification_are_ignored() {
        let (mut order, created) = new_order();
        assert_eq!(
            OrderLifecycle::apply(&mut order, &created, t0()).transition,
            Transition::Ignored {
                event_type: EventType::OrderCreated
            }
        );
    }

    #[test]
    fn event_for_other_order_is_ignored() {
        let (mut order, _) = new_order();
        let other = inbound(EventPayload::InventoryReserved(InventoryReserved {
            order_id: OrderId::new("order-2"),
            reserved_items: BTreeMap::new(),
        }));
        assert!(!OrderLifecycle::apply(&mut order, &other, t0()).transition.is_applied());
        assert_eq!(order.status(), OrderStatus::Created);
    }

    #[test]
    fn operator_cancel_emits_order_cancelled() {
        let (mut order, _) = new_order();
        let d = OrderLifecycle::cancel(&mut order, "customer request", t0());
        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert_eq!(d.outbound.len(), 1);
        assert_eq!(d.outbound[0].event_type(), EventType::OrderCancelled);
        assert!(order.has_applied(&d.outbound[0].event_id()));
    }
}
