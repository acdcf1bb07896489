//! Event envelope and payload variants exchanged between saga participants.
//!
//! Every message on a saga topic is an [`EventEnvelope`]: shared metadata
//! (`eventId`, `correlationId`, `timestamp`) plus exactly one [`EventPayload`]
//! variant. The `eventType` discriminator is derived from the payload variant,
//! so an envelope whose discriminator disagrees with its payload cannot be built.
//!
//! # Design
//!
//! Envelopes travel as JSON (see [`EventCodec`](crate::codec::EventCodec)) so that
//! services written against the same wire contract can interoperate. Monetary
//! amounts are [`Decimal`] and keep their exact scale on the wire.
//!
//! # Example
//!
//! ```
//! use order_saga_core::correlation::CorrelationId;
//! use order_saga_core::event::{EventEnvelope, EventPayload, EventType, OrderCancelled};
//! use order_saga_core::order::OrderId;
//!
//! let envelope = EventEnvelope::new(
//!     CorrelationId::new("saga-1"),
//!     EventPayload::OrderCancelled(OrderCancelled {
//!         order_id: OrderId::new("order-1"),
//!         reason: "out of stock".to_string(),
//!     }),
//!     chrono::Utc::now(),
//! );
//!
//! assert_eq!(envelope.event_type(), EventType::OrderCancelled);
//! assert_eq!(envelope.order_id().as_str(), "order-1");
//! ```

use crate::correlation::CorrelationId;
use crate::order::{CustomerId, OrderId, OrderItem};
use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Globally unique identifier of a single envelope, used as the dedup key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Generates a fresh random event id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Discriminator of an envelope's payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// An order was accepted by the order service
    OrderCreated,
    /// Inventory reserved stock for every line of an order
    InventoryReserved,
    /// Inventory could not reserve at least one line
    InventoryInsufficient,
    /// Payment service reported on a charge
    PaymentProcessed,
    /// Payment service could not charge the order
    PaymentFailed,
    /// An order was cancelled
    OrderCancelled,
    /// A customer notification was attempted
    NotificationSent,
}

impl EventType {
    /// All variants, in saga order.
    pub const ALL: [Self; 7] = [
        Self::OrderCreated,
        Self::InventoryReserved,
        Self::InventoryInsufficient,
        Self::PaymentProcessed,
        Self::PaymentFailed,
        Self::OrderCancelled,
        Self::NotificationSent,
    ];

    /// Wire name of the discriminator.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OrderCreated => "ORDER_CREATED",
            Self::InventoryReserved => "INVENTORY_RESERVED",
            Self::InventoryInsufficient => "INVENTORY_INSUFFICIENT",
            Self::PaymentProcessed => "PAYMENT_PROCESSED",
            Self::PaymentFailed => "PAYMENT_FAILED",
            Self::OrderCancelled => "ORDER_CANCELLED",
            Self::NotificationSent => "NOTIFICATION_SENT",
        }
    }

    /// Parses a wire name; `None` for anything unrecognised.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome reported by the payment service for a charge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// Charge accepted but not yet attempted
    Pending,
    /// Charge in flight
    Processing,
    /// Charge captured
    Completed,
    /// Charge declined or errored
    Failed,
    /// Charge was returned to the customer
    Refunded,
}

/// Kind of customer notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    /// Order was received
    OrderConfirmation,
    /// Payment was captured
    PaymentConfirmation,
    /// Payment was declined
    PaymentFailure,
    /// Order was cancelled
    OrderCancellation,
    /// Some items are out of stock
    InventoryShortage,
}

/// Payload of `ORDER_CREATED`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    /// Order identifier
    pub order_id: OrderId,
    /// Customer who placed the order
    pub customer_id: CustomerId,
    /// Ordered line items
    pub items: Vec<OrderItem>,
    /// Order total as computed by the order service
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub total_amount: Decimal,
}

/// Payload of `INVENTORY_RESERVED`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryReserved {
    /// Order identifier
    pub order_id: OrderId,
    /// Product id to reserved quantity
    pub reserved_items: BTreeMap<String, u32>,
}

/// Payload of `INVENTORY_INSUFFICIENT`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryInsufficient {
    /// Order identifier
    pub order_id: OrderId,
    /// Product id to requested quantity that could not be reserved
    pub unavailable_items: BTreeMap<String, u32>,
    /// Human readable reason
    pub reason: String,
}

/// Payload of `PAYMENT_PROCESSED`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProcessed {
    /// Order identifier
    pub order_id: OrderId,
    /// Payment identifier assigned by the payment service
    pub payment_id: String,
    /// Charged amount
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub amount: Decimal,
    /// Charge status
    pub status: PaymentStatus,
}

/// Payload of `PAYMENT_FAILED`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentFailed {
    /// Order identifier
    pub order_id: OrderId,
    /// Payment identifier assigned by the payment service
    pub payment_id: String,
    /// Amount that could not be charged
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub amount: Decimal,
    /// Why the charge failed
    pub failure_reason: String,
}

/// Payload of `ORDER_CANCELLED`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCancelled {
    /// Order identifier
    pub order_id: OrderId,
    /// Why the order was cancelled
    pub reason: String,
}

/// Payload of `NOTIFICATION_SENT`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSent {
    /// Order identifier
    pub order_id: OrderId,
    /// Notified customer
    pub customer_id: CustomerId,
    /// Kind of notification
    pub notification_type: NotificationType,
    /// Rendered message
    pub message: String,
    /// Whether the notifier accepted the message
    pub successful: bool,
}

/// The variant part of an envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventPayload {
    /// `ORDER_CREATED`
    OrderCreated(OrderCreated),
    /// `INVENTORY_RESERVED`
    InventoryReserved(InventoryReserved),
    /// `INVENTORY_INSUFFICIENT`
    InventoryInsufficient(InventoryInsufficient),
    /// `PAYMENT_PROCESSED`
    PaymentProcessed(PaymentProcessed),
    /// `PAYMENT_FAILED`
    PaymentFailed(PaymentFailed),
    /// `ORDER_CANCELLED`
    OrderCancelled(OrderCancelled),
    /// `NOTIFICATION_SENT`
    NotificationSent(NotificationSent),
}

impl EventPayload {
    /// Discriminator matching this variant.
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        match self {
            Self::OrderCreated(_) => EventType::OrderCreated,
            Self::InventoryReserved(_) => EventType::InventoryReserved,
            Self::InventoryInsufficient(_) => EventType::InventoryInsufficient,
            Self::PaymentProcessed(_) => EventType::PaymentProcessed,
            Self::PaymentFailed(_) => EventType::PaymentFailed,
            Self::OrderCancelled(_) => EventType::OrderCancelled,
            Self::NotificationSent(_) => EventType::NotificationSent,
        }
    }

    /// Order the payload refers to; every variant carries one.
    #[must_use]
    pub const fn order_id(&self) -> &OrderId {
        match self {
            Self::OrderCreated(e) => &e.order_id,
            Self::InventoryReserved(e) => &e.order_id,
            Self::InventoryInsufficient(e) => &e.order_id,
            Self::PaymentProcessed(e) => &e.order_id,
            Self::PaymentFailed(e) => &e.order_id,
            Self::OrderCancelled(e) => &e.order_id,
            Self::NotificationSent(e) => &e.order_id,
        }
    }
}

/// A single event as it travels between services.
///
/// Fields are private: once built, an envelope is immutable, and the payload's
/// collections belong to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventEnvelope {
    event_id: EventId,
    correlation_id: CorrelationId,
    timestamp: NaiveDateTime,
    payload: EventPayload,
}

impl EventEnvelope {
    /// Builds a new envelope with a fresh `eventId`.
    ///
    /// The timestamp is taken from `now` as naive UTC, truncated to milliseconds.
    #[must_use]
    pub fn new(correlation_id: CorrelationId, payload: EventPayload, now: DateTime<Utc>) -> Self {
        Self {
            event_id: EventId::generate(),
            correlation_id,
            timestamp: now.naive_utc().trunc_subsecs(3),
            payload,
        }
    }

    /// Reassembles an envelope from decoded parts.
    #[must_use]
    pub const fn from_parts(
        event_id: EventId,
        correlation_id: CorrelationId,
        timestamp: NaiveDateTime,
        payload: EventPayload,
    ) -> Self {
        Self {
            event_id,
            correlation_id,
            timestamp,
            payload,
        }
    }

    /// Dedup key
    #[must_use]
    pub const fn event_id(&self) -> EventId {
        self.event_id
    }

    /// Saga correlation id
    #[must_use]
    pub const fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Creation time (naive UTC, millisecond precision)
    #[must_use]
    pub const fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    /// Discriminator derived from the payload
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    /// Typed payload
    #[must_use]
    pub const fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// Order the event refers to; also the partition key.
    #[must_use]
    pub const fn order_id(&self) -> &OrderId {
        self.payload.order_id()
    }

    /// Consumes the envelope, returning its payload.
    #[must_use]
    pub fn into_payload(self) -> EventPayload {
        self.payload
    }
}
