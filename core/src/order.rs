//! Order aggregate owned by the order service.
//!
//! An [`Order`] is created once from a [`CreateOrderRequest`] and afterwards only
//! mutated through [`OrderLifecycle`](crate::lifecycle::OrderLifecycle). Orders are
//! never deleted; they finish in a terminal [`OrderStatus`] instead.

use crate::correlation::CorrelationId;
use crate::event::EventId;
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Unique identifier for an order
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    /// Creates a new `OrderId` from a string
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random order id.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the inner string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a customer
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomerId(String);

impl CustomerId {
    /// Creates a new `CustomerId` from a string
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CustomerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single line item in an order
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    /// Product identifier
    pub product_id: String,
    /// Product name for display
    pub product_name: String,
    /// Quantity ordered
    pub quantity: u32,
    /// Price per unit
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub unit_price: Decimal,
}

impl OrderItem {
    /// Creates a new line item
    #[must_use]
    pub fn new(
        product_id: impl Into<String>,
        product_name: impl Into<String>,
        quantity: u32,
        unit_price: Decimal,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            product_name: product_name.into(),
            quantity,
            unit_price,
        }
    }

    /// Calculates the total price for this line item.
    ///
    /// `None` if the product does not fit in a [`Decimal`].
    #[must_use]
    pub fn total_price(&self) -> Option<Decimal> {
        self.unit_price.checked_mul(Decimal::from(self.quantity))
    }
}

/// Status of an order in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Order accepted, waiting for inventory
    Created,
    /// Stock has been reserved for every line
    InventoryReserved,
    /// At least one line could not be reserved
    InventoryInsufficient,
    /// Payment captured
    PaymentProcessed,
    /// Payment declined or errored
    PaymentFailed,
    /// Order was cancelled (terminal)
    Cancelled,
    /// Order fulfilled (terminal)
    Completed,
}

impl OrderStatus {
    /// Whether no further transitions are accepted from this status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::InventoryReserved => "INVENTORY_RESERVED",
            Self::InventoryInsufficient => "INVENTORY_INSUFFICIENT",
            Self::PaymentProcessed => "PAYMENT_PROCESSED",
            Self::PaymentFailed => "PAYMENT_FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request to create an order, as handed over by the REST layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    /// Customer placing the order
    pub customer_id: CustomerId,
    /// Requested line items
    pub items: Vec<OrderItem>,
}

/// Validation failures for a [`CreateOrderRequest`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Customer id is blank
    #[error("Customer ID is required")]
    MissingCustomer,

    /// No line items
    #[error("Order must contain at least one item")]
    NoItems,

    /// Product id of a line is blank
    #[error("Item {index}: product ID is required")]
    MissingProductId {
        /// Position of the offending line
        index: usize,
    },

    /// Product name of a line is blank
    #[error("Item {index}: product name is required")]
    MissingProductName {
        /// Position of the offending line
        index: usize,
    },

    /// Quantity is zero
    #[error("Item {index}: quantity must be positive")]
    NonPositiveQuantity {
        /// Position of the offending line
        index: usize,
    },

    /// Unit price is zero or negative
    #[error("Item {index}: unit price must be positive")]
    NonPositiveUnitPrice {
        /// Position of the offending line
        index: usize,
    },

    /// A line total or the order total does not fit in a decimal
    #[error("Order total is too large")]
    AmountOverflow,
}

impl CreateOrderRequest {
    /// Validates the request.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] found, in field order.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.customer_id.as_str().trim().is_empty() {
            return Err(ValidationError::MissingCustomer);
        }
        if self.items.is_empty() {
            return Err(ValidationError::NoItems);
        }
        for (index, item) in self.items.iter().enumerate() {
            if item.product_id.trim().is_empty() {
                return Err(ValidationError::MissingProductId { index });
            }
            if item.product_name.trim().is_empty() {
                return Err(ValidationError::MissingProductName { index });
            }
            if item.quantity == 0 {
                return Err(ValidationError::NonPositiveQuantity { index });
            }
            if item.unit_price <= Decimal::ZERO {
                return Err(ValidationError::NonPositiveUnitPrice { index });
            }
        }
        self.total_amount().map(|_| ())
    }

    /// Sum of `quantity * unit_price` over all lines.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::AmountOverflow`] if a line total or the sum
    /// does not fit in a [`Decimal`].
    pub fn total_amount(&self) -> Result<Decimal, ValidationError> {
        self.items.iter().try_fold(Decimal::ZERO, |total, item| {
            item.total_price()
                .and_then(|line| total.checked_add(line))
                .ok_or(ValidationError::AmountOverflow)
        })
    }
}

/// The order aggregate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub(crate) order_id: OrderId,
    pub(crate) customer_id: CustomerId,
    pub(crate) items: Vec<OrderItem>,
    pub(crate) status: OrderStatus,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub(crate) total_amount: Decimal,
    pub(crate) correlation_id: CorrelationId,
    pub(crate) created_at: NaiveDateTime,
    pub(crate) updated_at: NaiveDateTime,
    pub(crate) applied_events: BTreeSet<EventId>,
}

impl Order {
    /// Order identifier
    #[must_use]
    pub const fn order_id(&self) -> &OrderId {
        &self.order_id
    }

    /// Customer who placed the order
    #[must_use]
    pub const fn customer_id(&self) -> &CustomerId {
        &self.customer_id
    }

    /// Line items, in request order
    #[must_use]
    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    /// Current status
    #[must_use]
    pub const fn status(&self) -> OrderStatus {
        self.status
    }

    /// Total computed at creation
    #[must_use]
    pub const fn total_amount(&self) -> Decimal {
        self.total_amount
    }

    /// Correlation id of this order's saga
    #[must_use]
    pub const fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Creation time
    #[must_use]
    pub const fn created_at(&self) -> NaiveDateTime {
        self.created_at
    }

    /// Time of the last mutation
    #[must_use]
    pub const fn updated_at(&self) -> NaiveDateTime {
        self.updated_at
    }

    /// Whether the inbound event has already been applied to this order.
    #[must_use]
    pub fn has_applied(&self, event_id: &EventId) -> bool {
        self.applied_events.contains(event_id)
    }

    /// Status snapshot for status queries.
    #[must_use]
    pub fn status_view(&self) -> OrderStatusView {
        OrderStatusView {
            order_id: self.order_id.clone(),
            status: self.status,
            updated_at: self.updated_at,
        }
    }
}

/// Response shape of a status query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusView {
    /// Order identifier
    pub order_id: OrderId,
    /// Current status
    pub status: OrderStatus,
    /// Time of the last mutation
    pub updated_at: NaiveDateTime,
}
