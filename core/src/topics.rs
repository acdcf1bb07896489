//! Topic names used by the saga.

use crate::event::EventType;
use serde::{Deserialize, Serialize};

/// Suffix appended to a topic name to get its dead-letter topic.
pub const DLT_SUFFIX: &str = "-dlt";

/// Topic per event type.
///
/// Passed to the publisher, the consumers and the services so that names are
/// never hard-coded at call sites.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicConfig {
    /// `ORDER_CREATED`
    pub order_created: String,
    /// `ORDER_CANCELLED`
    pub order_cancelled: String,
    /// `INVENTORY_RESERVED`
    pub inventory_reserved: String,
    /// `INVENTORY_INSUFFICIENT`
    pub inventory_insufficient: String,
    /// `PAYMENT_PROCESSED`
    pub payment_processed: String,
    /// `PAYMENT_FAILED`
    pub payment_failed: String,
    /// `NOTIFICATION_SENT`
    pub notification_sent: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            order_created: "order-created".to_string(),
            order_cancelled: "order-cancelled".to_string(),
            inventory_reserved: "inventory-reserved".to_string(),
            inventory_insufficient: "inventory-insufficient".to_string(),
            payment_processed: "payment-processed".to_string(),
            payment_failed: "payment-failed".to_string(),
            notification_sent: "notification-sent".to_string(),
        }
    }
}

impl TopicConfig {
    /// Topic events of `event_type` are published to.
    #[must_use]
    pub fn topic_for(&self, event_type: EventType) -> &str {
        match event_type {
            EventType::OrderCreated => &self.order_created,
            EventType::OrderCancelled => &self.order_cancelled,
            EventType::InventoryReserved => &self.inventory_reserved,
            EventType::InventoryInsufficient => &self.inventory_insufficient,
            EventType::PaymentProcessed => &self.payment_processed,
            EventType::PaymentFailed => &self.payment_failed,
            EventType::NotificationSent => &self.notification_sent,
        }
    }

    /// Topics carrying the given event types, in the given order.
    #[must_use]
    pub fn topics_for(&self, event_types: &[EventType]) -> Vec<String> {
        event_types
            .iter()
            .map(|t| self.topic_for(*t).to_string())
            .collect()
    }

    /// Dead-letter topic for `topic`.
    #[must_use]
    pub fn dlt(topic: &str) -> String {
        format!("{topic}{DLT_SUFFIX}")
    }
}
