//! Broker abstraction for saga topics.
//!
//! This module provides the [`Broker`] trait through which every service
//! publishes envelopes and consumes them from other services.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   publish(topic, key=orderId)   ┌──────────────┐
//! │  Publisher   │ ──────────────────────────────► │    Topic     │
//! └──────────────┘         DeliveryOutcome         │ (partitions) │
//!                                                  └──────┬───────┘
//!                                                         │ subscribe
//!                                                         ▼
//!                                                  ┌──────────────┐
//!                                                  │ EventConsumer│──► Dispatcher
//!                                                  └──────────────┘
//! ```
//!
//! # Key Principles
//!
//! - **At-least-once delivery**: A message may be delivered more than once
//! - **Ordered within partition**: Messages with the same key keep their order
//! - **Explicit acknowledgement**: A consumer acks a [`BrokerMessage`] once it is
//!   done with it; unacked messages are redelivered after a restart
//!
//! # Implementations
//!
//! - `InMemoryBroker` in `order-saga-testing` - for tests
//! - `RedpandaBroker` in `order-saga-redpanda` - for production (Kafka-compatible)

use futures::Stream;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during broker operations.
#[derive(Error, Debug, Clone)]
pub enum BrokerError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Failed to receive the next message
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Failed to acknowledge a message
    #[error("Acknowledgement failed for {topic}[{partition}]@{offset}: {reason}")]
    AckFailed {
        /// Topic of the message
        topic: String,
        /// Partition of the message
        partition: i32,
        /// Offset of the message
        offset: i64,
        /// The reason for failure
        reason: String,
    },
}

/// A record handed to [`Broker::publish`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundRecord {
    /// Destination topic
    pub topic: String,
    /// Partition key (always the order id for saga events)
    pub key: String,
    /// Encoded envelope
    pub payload: Vec<u8>,
    /// Transport headers, in insertion order
    pub headers: Vec<(String, String)>,
}

impl OutboundRecord {
    /// Creates a record without headers.
    #[must_use]
    pub fn new(topic: impl Into<String>, key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            payload,
            headers: Vec::new(),
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Result of a single publish round-trip.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The broker stored the record.
    Acked {
        /// Partition the record landed in
        partition: i32,
        /// Offset within the partition
        offset: i64,
    },
    /// The record was not stored.
    Failed {
        /// Why the publish failed
        cause: String,
    },
}

impl DeliveryOutcome {
    /// Whether the broker stored the record.
    #[must_use]
    pub const fn is_acked(&self) -> bool {
        matches!(self, Self::Acked { .. })
    }
}

/// Commits consumption progress for one delivered message.
pub trait Acknowledger: Send + Sync {
    /// Acknowledge the message at `partition`/`offset` of `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AckFailed`] if the broker rejects the commit.
    fn ack(&self, topic: &str, partition: i32, offset: i64) -> Result<(), BrokerError>;
}

/// A message received from a subscription.
#[derive(Clone)]
pub struct BrokerMessage {
    /// Topic the message was read from
    pub topic: String,
    /// Partition the message was read from
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
    /// Partition key, if any
    pub key: Option<String>,
    /// Raw payload bytes
    pub payload: Vec<u8>,
    /// Transport headers
    pub headers: Vec<(String, String)>,
    acker: Arc<dyn Acknowledger>,
}

impl BrokerMessage {
    /// Creates a message bound to the acknowledger that will commit it.
    #[must_use]
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        key: Option<String>,
        payload: Vec<u8>,
        headers: Vec<(String, String)>,
        acker: Arc<dyn Acknowledger>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key,
            payload,
            headers,
            acker,
        }
    }

    /// Acknowledges this message.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::AckFailed`] if the broker rejects the commit.
    pub fn ack(&self) -> Result<(), BrokerError> {
        self.acker.ack(&self.topic, self.partition, self.offset)
    }

    /// Value of the first header named `name`.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Debug for BrokerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerMessage")
            .field("topic", &self.topic)
            .field("partition", &self.partition)
            .field("offset", &self.offset)
            .field("key", &self.key)
            .field("payload_len", &self.payload.len())
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Stream of messages from a subscription.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<BrokerMessage, BrokerError>> + Send>>;

/// Trait for broker implementations.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so that it can be shared as `Arc<dyn Broker>` between the publisher and the
/// consumer loops.
pub trait Broker: Send + Sync {
    /// Publish a record and report the broker's verdict.
    ///
    /// Never returns an error: a failed publish is a [`DeliveryOutcome::Failed`].
    fn publish(
        &self,
        record: OutboundRecord,
    ) -> Pin<Box<dyn Future<Output = DeliveryOutcome> + Send + '_>>;

    /// Subscribe to one or more topics and receive a stream of messages.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::SubscriptionFailed`] if subscription fails.
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, BrokerError>> + Send + '_>>;
}
