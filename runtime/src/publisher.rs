//! Non-blocking envelope publisher with dead-letter routing.
//!
//! [`Publisher::publish`] encodes the envelope, hands the record to the broker
//! on a spawned task and returns a [`PendingDelivery`] right away. When the
//! broker answers (or the publish timeout fires) the completion step runs on
//! that task:
//!
//! - `Acked`: logged and counted
//! - `Failed`: logged, counted, and the original bytes are published once to
//!   `<topic>-dlt` with the failure reason in the record headers
//!
//! The publisher never retries. A failed dead-letter publish is logged and
//! dropped.

use order_saga_core::broker::{Broker, DeliveryOutcome, OutboundRecord};
use order_saga_core::codec::EventCodec;
use order_saga_core::event::EventEnvelope;
use order_saga_core::order::OrderId;
use order_saga_core::topics::TopicConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Header carrying why a record was dead-lettered.
pub const HEADER_FAILURE_REASON: &str = "x-failure-reason";
/// Header carrying the topic a dead-lettered record was meant for.
pub const HEADER_ORIGINAL_TOPIC: &str = "x-original-topic";
/// Header carrying the envelope's `eventType`.
pub const HEADER_EVENT_TYPE: &str = "x-event-type";
/// Header carrying the envelope's `eventId`.
pub const HEADER_EVENT_ID: &str = "x-event-id";
/// Header carrying the envelope's `correlationId`.
pub const HEADER_CORRELATION_ID: &str = "x-correlation-id";

/// Publisher configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherConfig {
    /// How long to wait for the broker before treating a publish as failed
    pub publish_timeout: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            publish_timeout: Duration::from_secs(10),
        }
    }
}

/// A record that could not be delivered or processed, bound for a DLT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    /// Topic the payload was published to or consumed from
    pub original_topic: String,
    /// Partition key of the original record
    pub key: String,
    /// Original bytes, untouched
    pub payload: Vec<u8>,
    /// Why the record is dead-lettered
    pub reason: String,
    /// `eventType`, when known
    pub event_type: Option<String>,
    /// `eventId`, when known
    pub event_id: Option<String>,
    /// `correlationId`, when known
    pub correlation_id: Option<String>,
}

impl DeadLetter {
    fn into_record(self) -> OutboundRecord {
        let mut record = OutboundRecord::new(
            TopicConfig::dlt(&self.original_topic),
            self.key,
            self.payload,
        )
        .with_header(HEADER_FAILURE_REASON, self.reason)
        .with_header(HEADER_ORIGINAL_TOPIC, self.original_topic);

        for (name, value) in [
            (HEADER_EVENT_TYPE, self.event_type),
            (HEADER_EVENT_ID, self.event_id),
            (HEADER_CORRELATION_ID, self.correlation_id),
        ] {
            if let Some(value) = value {
                record = record.with_header(name, value);
            }
        }
        record
    }
}

/// Handle on an in-flight publish.
///
/// Dropping it does not cancel the publish; the completion step still runs.
#[derive(Debug)]
pub struct PendingDelivery {
    receiver: oneshot::Receiver<DeliveryOutcome>,
}

impl PendingDelivery {
    fn ready(outcome: DeliveryOutcome) -> Self {
        let (sender, receiver) = oneshot::channel();
        let _ = sender.send(outcome);
        Self { receiver }
    }

    /// Waits for the final outcome, after any dead-letter routing has run.
    pub async fn outcome(self) -> DeliveryOutcome {
        self.receiver
            .await
            .unwrap_or_else(|_| DeliveryOutcome::Failed {
                cause: "delivery task ended without an outcome".to_string(),
            })
    }
}

/// Sends envelopes to topics keyed by order id.
#[derive(Clone)]
pub struct Publisher {
    broker: Arc<dyn Broker>,
    topics: Arc<TopicConfig>,
    config: PublisherConfig,
}

impl Publisher {
    /// Creates a publisher on top of `broker`.
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>, topics: TopicConfig, config: PublisherConfig) -> Self {
        Self {
            broker,
            topics: Arc::new(topics),
            config,
        }
    }

    /// Topic names this publisher routes to.
    #[must_use]
    pub fn topics(&self) -> &TopicConfig {
        &self.topics
    }

    /// Publishes an envelope to the topic of its event type, keyed by its order id.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn publish_event(&self, envelope: &EventEnvelope) -> PendingDelivery {
        let topic = self.topics.topic_for(envelope.event_type()).to_string();
        self.publish(&topic, envelope.order_id(), envelope)
    }

    /// Publishes an envelope to `topic` with `key` as the partition key.
    ///
    /// Returns immediately; the broker round-trip and the completion step run
    /// on a spawned task. Must be called from within a tokio runtime.
    #[must_use]
    pub fn publish(&self, topic: &str, key: &OrderId, envelope: &EventEnvelope) -> PendingDelivery {
        let payload = match EventCodec::encode(envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                metrics::counter!("saga.publish.failed", "topic" => topic.to_string()).increment(1);
                tracing::error!(
                    topic,
                    event_id = %envelope.event_id(),
                    error = %e,
                    "Failed to encode event, nothing sent"
                );
                return PendingDelivery::ready(DeliveryOutcome::Failed {
                    cause: e.to_string(),
                });
            }
        };

        let record = OutboundRecord::new(topic, key.as_str(), payload)
            .with_header(HEADER_EVENT_TYPE, envelope.event_type().as_str())
            .with_header(HEADER_EVENT_ID, envelope.event_id().to_string())
            .with_header(HEADER_CORRELATION_ID, envelope.correlation_id().as_str());

        let (sender, receiver) = oneshot::channel();
        let publisher = self.clone();
        tokio::spawn(async move {
            let outcome = publisher.send_with_timeout(record.clone()).await;
            publisher.on_complete(record, &outcome).await;
            let _ = sender.send(outcome);
        });

        PendingDelivery { receiver }
    }

    /// Publishes a dead letter to `<original_topic>-dlt`.
    ///
    /// A failure here is logged and returned; nothing is retried.
    pub async fn dead_letter(&self, letter: DeadLetter) -> DeliveryOutcome {
        let record = letter.into_record();
        let dlt = record.topic.clone();
        let outcome = self.send_with_timeout(record).await;
        match &outcome {
            DeliveryOutcome::Acked { partition, offset } => {
                metrics::counter!("saga.dead_letter.routed", "topic" => dlt.clone()).increment(1);
                tracing::warn!(topic = %dlt, partition, offset, "Record routed to dead-letter topic");
            }
            DeliveryOutcome::Failed { cause } => {
                tracing::error!(
                    topic = %dlt,
                    error = %cause,
                    "Failed to publish to dead-letter topic, record dropped"
                );
            }
        }
        outcome
    }

    async fn send_with_timeout(&self, record: OutboundRecord) -> DeliveryOutcome {
        let timeout = self.config.publish_timeout;
        match tokio::time::timeout(timeout, self.broker.publish(record)).await {
            Ok(outcome) => outcome,
            Err(_) => DeliveryOutcome::Failed {
                cause: format!("publish timed out after {timeout:?}"),
            },
        }
    }

    async fn on_complete(&self, record: OutboundRecord, outcome: &DeliveryOutcome) {
        let header = |name: &str| {
            record
                .headers
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
        };
        let event_type = header(HEADER_EVENT_TYPE);
        let event_id = header(HEADER_EVENT_ID);

        match outcome {
            DeliveryOutcome::Acked { partition, offset } => {
                metrics::counter!("saga.publish.acked", "topic" => record.topic.clone()).increment(1);
                tracing::info!(
                    topic = %record.topic,
                    key = %record.key,
                    event_type = ?event_type,
                    event_id = ?event_id,
                    partition,
                    offset,
                    "Event published"
                );
            }
            DeliveryOutcome::Failed { cause } => {
                metrics::counter!("saga.publish.failed", "topic" => record.topic.clone()).increment(1);
                tracing::error!(
                    topic = %record.topic,
                    key = %record.key,
                    event_type = ?event_type,
                    event_id = ?event_id,
                    error = %cause,
                    "Event delivery failed, routing to dead-letter topic"
                );

                let correlation_id = header(HEADER_CORRELATION_ID);
                let _ = self
                    .dead_letter(DeadLetter {
                        original_topic: record.topic,
                        key: record.key,
                        payload: record.payload,
                        reason: cause.clone(),
                        event_type,
                        event_id,
                        correlation_id,
                    })
                    .await;
            }
        }
    }
}
