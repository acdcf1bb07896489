//! Redpanda broker implementation for the order saga.
//!
//! This crate provides [`RedpandaBroker`], the production implementation of the
//! [`Broker`] trait from `order-saga-core`. It uses rdkafka, so any
//! Kafka-compatible cluster works (Redpanda, Apache Kafka, MSK, ...).
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - Auto-commit is disabled; a message's offset is committed only after the
//!   consumer acknowledges it through [`BrokerMessage::ack`]
//! - Acks may arrive out of order across workers; the broker commits the
//!   highest contiguous acknowledged offset per partition
//! - Partition state is dropped when a rebalance revokes or reassigns the
//!   partition; late acks for it commit nothing
//! - If the process crashes before commit, messages are redelivered, so
//!   handlers MUST be idempotent (dedupe by `eventId`)
//! - Ordering is guaranteed within a partition; saga records are keyed by
//!   order id, so one order's events stay in order
//!
//! # Example
//!
//! ```no_run
//! use order_saga_redpanda::RedpandaBroker;
//! use order_saga_core::broker::{Broker, OutboundRecord};
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = RedpandaBroker::builder()
//!     .brokers("localhost:9092")
//!     .consumer_group("order-service")
//!     .build()?;
//!
//! let outcome = broker
//!     .publish(OutboundRecord::new("order-created", "order-1", b"{}".to_vec()))
//!     .await;
//! println!("{outcome:?}");
//!
//! let mut stream = broker.subscribe(&["order-created"]).await?;
//! while let Some(Ok(message)) = stream.next().await {
//!     println!("{}@{}", message.topic, message.offset);
//!     message.ack()?;
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod offsets;

pub use offsets::OffsetTracker;

use order_saga_core::broker::{
    Acknowledger, Broker, BrokerError, BrokerMessage, DeliveryOutcome, MessageStream,
    OutboundRecord,
};
use rdkafka::ClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Redpanda (Kafka protocol) broker.
///
/// Publishes with an rdkafka [`FutureProducer`]; every [`Broker::subscribe`]
/// call creates its own [`StreamConsumer`] in the configured consumer group.
///
/// # Example
///
/// ```no_run
/// use order_saga_redpanda::RedpandaBroker;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let broker = RedpandaBroker::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .producer_acks("all")
///     .compression("lz4")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaBroker {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    consumer_group: String,
    buffer_size: usize,
    auto_offset_reset: String,
    session_timeout: Duration,
}

impl RedpandaBroker {
    /// Create a broker client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if the producer cannot be
    /// created.
    pub fn new(brokers: &str) -> Result<Self, BrokerError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the broker.
    #[must_use]
    pub fn builder() -> RedpandaBrokerBuilder {
        RedpandaBrokerBuilder::default()
    }

    /// Bootstrap servers.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Consumer group shared by every subscription of this client.
    #[must_use]
    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }
}

/// Builder for configuring a [`RedpandaBroker`].
#[derive(Default)]
pub struct RedpandaBrokerBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
    session_timeout: Option<Duration>,
}

impl RedpandaBrokerBuilder {
    /// Comma-separated bootstrap servers (e.g. `"localhost:9092"`).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Producer acknowledgment mode: `"0"`, `"1"` or `"all"`.
    ///
    /// Default: `"all"`
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Compression codec: `"none"`, `"gzip"`, `"snappy"`, `"lz4"`, `"zstd"`.
    ///
    /// Default: `"none"`
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Producer delivery timeout (`message.timeout.ms`).
    ///
    /// Default: 10 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Consumer group for subscriptions.
    ///
    /// Instances of one service share a group so partitions are spread
    /// across them. Default: `"order-saga"`
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Messages buffered between the Kafka consumer and the subscriber.
    ///
    /// Default: 1000. Zero is treated as 1.
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size.max(1));
        self
    }

    /// Where a new consumer group starts reading: `"earliest"` or `"latest"`.
    ///
    /// Default: `"earliest"`, so records published before the first
    /// subscription are not skipped.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Consumer session timeout. Default: 10 seconds
    #[must_use]
    pub const fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = Some(timeout);
        self
    }

    /// Build the [`RedpandaBroker`].
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::ConnectionFailed`] if brokers are not set or the
    /// producer cannot be created.
    pub fn build(self) -> Result<RedpandaBroker, BrokerError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BrokerError::ConnectionFailed("Brokers not configured".to_string()))?;
        let timeout = self.timeout.unwrap_or(Duration::from_secs(10));
        let acks = self.producer_acks.as_deref().unwrap_or("all");
        let compression = self.compression.as_deref().unwrap_or("none");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", acks)
            .set("compression.type", compression)
            .create()
            .map_err(|e| BrokerError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        let consumer_group = self.consumer_group.unwrap_or_else(|| "order-saga".to_string());
        let buffer_size = self.buffer_size.unwrap_or(1000);
        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| "earliest".to_string());

        tracing::info!(
            brokers = %brokers,
            acks,
            compression,
            consumer_group = %consumer_group,
            buffer_size,
            auto_offset_reset = %auto_offset_reset,
            "RedpandaBroker created"
        );

        Ok(RedpandaBroker {
            producer,
            brokers,
            timeout,
            consumer_group,
            buffer_size,
            auto_offset_reset,
            session_timeout: self.session_timeout.unwrap_or(Duration::from_secs(10)),
        })
    }
}

/// Consumer callbacks of one subscription.
///
/// Keeps the offset tracker in step with the group's partition assignment.
struct RebalanceContext {
    tracker: Arc<Mutex<OffsetTracker>>,
}

impl RebalanceContext {
    fn forget_all(&self, list: &TopicPartitionList) {
        let Ok(mut tracker) = self.tracker.lock() else {
            tracing::error!("Offset tracker poisoned during rebalance");
            return;
        };
        for elem in list.elements() {
            tracker.forget(elem.topic(), elem.partition());
        }
        tracing::debug!(in_flight = tracker.in_flight(), "Offset tracker reset for rebalanced partitions");
    }
}

impl ClientContext for RebalanceContext {}

impl ConsumerContext for RebalanceContext {
    fn pre_rebalance(&self, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Revoke(list) => {
                tracing::info!(partitions = list.count(), "Partitions revoked");
                self.forget_all(list);
            }
            // Reading restarts from the committed position.
            Rebalance::Assign(list) => {
                tracing::info!(partitions = list.count(), "Partitions assigned");
                self.forget_all(list);
            }
            Rebalance::Error(e) => tracing::warn!(error = %e, "Rebalance failed"),
        }
    }
}

type SagaConsumer = StreamConsumer<RebalanceContext>;

/// Commits acknowledged offsets of one subscription.
struct RedpandaAcker {
    consumer: Arc<SagaConsumer>,
    tracker: Arc<Mutex<OffsetTracker>>,
}

impl Acknowledger for RedpandaAcker {
    fn ack(&self, topic: &str, partition: i32, offset: i64) -> Result<(), BrokerError> {
        let ack_failed = |reason: String| BrokerError::AckFailed {
            topic: topic.to_string(),
            partition,
            offset,
            reason,
        };

        let position = self
            .tracker
            .lock()
            .map_err(|_| ack_failed("offset tracker poisoned".to_string()))?
            .acked(topic, partition, offset);
        let Some(position) = position else {
            return Ok(());
        };

        let mut list = TopicPartitionList::new();
        list.add_partition_offset(topic, partition, Offset::Offset(position))
            .map_err(|e| ack_failed(e.to_string()))?;
        self.consumer
            .commit(&list, CommitMode::Async)
            .map_err(|e| ack_failed(e.to_string()))?;

        tracing::trace!(topic, partition, position, "Committed offset");
        Ok(())
    }
}

fn to_broker_message(message: &BorrowedMessage<'_>, acker: Arc<dyn Acknowledger>) -> BrokerMessage {
    let headers = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|header| {
                    let value = header
                        .value
                        .map(|v| String::from_utf8_lossy(v).into_owned())
                        .unwrap_or_default();
                    (header.key.to_string(), value)
                })
                .collect()
        })
        .unwrap_or_default();

    BrokerMessage::new(
        message.topic().to_string(),
        message.partition(),
        message.offset(),
        message
            .key()
            .map(|k| String::from_utf8_lossy(k).into_owned()),
        message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        headers,
        acker,
    )
}

impl Broker for RedpandaBroker {
    fn publish(
        &self,
        record: OutboundRecord,
    ) -> Pin<Box<dyn Future<Output = DeliveryOutcome> + Send + '_>> {
        Box::pin(async move {
            let headers = record
                .headers
                .iter()
                .fold(OwnedHeaders::new(), |headers, (name, value)| {
                    headers.insert(Header {
                        key: name.as_str(),
                        value: Some(value.as_str()),
                    })
                });

            let future_record = FutureRecord::to(&record.topic)
                .key(&record.key)
                .payload(&record.payload)
                .headers(headers);

            match self
                .producer
                .send(future_record, Timeout::After(self.timeout))
                .await
            {
                Ok((partition, offset)) => {
                    tracing::debug!(topic = %record.topic, key = %record.key, partition, offset, "Record stored");
                    DeliveryOutcome::Acked { partition, offset }
                }
                Err((kafka_error, _)) => {
                    tracing::debug!(topic = %record.topic, key = %record.key, error = %kafka_error, "Record not stored");
                    DeliveryOutcome::Failed {
                        cause: kafka_error.to_string(),
                    }
                }
            }
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, BrokerError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();

        Box::pin(async move {
            let subscription_failed = |reason: String| BrokerError::SubscriptionFailed {
                topics: topics.clone(),
                reason,
            };
            if topics.is_empty() {
                return Err(subscription_failed("no topics given".to_string()));
            }

            let tracker = Arc::new(Mutex::new(OffsetTracker::new()));
            let context = RebalanceContext {
                tracker: Arc::clone(&tracker),
            };
            let consumer: SagaConsumer = ClientConfig::new()
                .set("bootstrap.servers", &self.brokers)
                .set("group.id", &self.consumer_group)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &self.auto_offset_reset)
                .set("session.timeout.ms", self.session_timeout.as_millis().to_string())
                .set("enable.partition.eof", "false")
                .create_with_context(context)
                .map_err(|e| subscription_failed(format!("Failed to create consumer: {e}")))?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| subscription_failed(format!("Failed to subscribe to topics: {e}")))?;

            tracing::info!(
                topics = ?topics,
                consumer_group = %self.consumer_group,
                buffer_size = self.buffer_size,
                auto_offset_reset = %self.auto_offset_reset,
                "Subscribed to topics"
            );

            let consumer = Arc::new(consumer);
            let acker: Arc<dyn Acknowledger> = Arc::new(RedpandaAcker {
                consumer: Arc::clone(&consumer),
                tracker: Arc::clone(&tracker),
            });
            let (tx, mut rx) = tokio::sync::mpsc::channel(self.buffer_size);

            // The task owns the consumer stream; it ends when the subscriber drops.
            tokio::spawn(async move {
                use futures::StreamExt;

                let mut stream = consumer.stream();
                loop {
                    let next = tokio::select! {
                        () = tx.closed() => break,
                        next = stream.next() => next,
                    };
                    let Some(next) = next else {
                        break;
                    };
                    let item = match next {
                        Ok(message) => {
                            if let Ok(mut tracker) = tracker.lock() {
                                tracker.delivered(message.topic(), message.partition(), message.offset());
                            }
                            Ok(to_broker_message(&message, Arc::clone(&acker)))
                        }
                        Err(e) => Err(BrokerError::ReceiveFailed(e.to_string())),
                    };
                    if tx.send(item).await.is_err() {
                        tracing::debug!("Subscriber dropped, exiting consumer task");
                        break;
                    }
                }
                tracing::debug!("Consumer task exiting");
            });

            let stream = async_stream::stream! {
                while let Some(item) = rx.recv().await {
                    yield item;
                }
            };
            Ok(Box::pin(stream) as MessageStream)
        })
    }
}
