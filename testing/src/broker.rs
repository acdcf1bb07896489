//! In-memory implementation of the [`Broker`] trait for tests.
//!
//! Behaves like a single-node Kafka cluster in the ways the saga cares about:
//!
//! - every topic has a fixed number of partitions; a record's partition is
//!   `hash(key) % partitions`, so one key always lands in one partition
//! - offsets are assigned per partition, starting at 0
//! - a new subscription first replays every stored record of its topics
//!   (earliest offset, partition order preserved), then receives live records
//! - acknowledgements are recorded for inspection
//!
//! Failure injection: [`fail_topic`](InMemoryBroker::fail_topic) makes publishes
//! to a topic fail, [`stall_topic`](InMemoryBroker::stall_topic) makes them hang
//! forever (to exercise publish timeouts).

use futures::future;
use order_saga_core::broker::{
    Acknowledger, Broker, BrokerError, BrokerMessage, DeliveryOutcome, MessageStream,
    OutboundRecord,
};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::mpsc;

/// Default partitions per topic.
pub const DEFAULT_PARTITIONS: i32 = 3;

/// A record stored by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    /// Topic
    pub topic: String,
    /// Partition
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
    /// Partition key
    pub key: String,
    /// Payload bytes
    pub payload: Vec<u8>,
    /// Headers
    pub headers: Vec<(String, String)>,
    sequence: u64,
}

impl StoredRecord {
    /// Value of the first header named `name`.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Default)]
struct State {
    logs: HashMap<String, Vec<Vec<StoredRecord>>>,
    subscribers: Vec<Subscriber>,
    failing: HashMap<String, String>,
    stalled: HashSet<String>,
    acked: Vec<(String, i32, i64)>,
    sequence: u64,
}

struct Subscriber {
    topics: HashSet<String>,
    sender: mpsc::UnboundedSender<BrokerMessage>,
}

struct Inner {
    partitions: i32,
    state: Mutex<State>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

struct InMemoryAcker {
    inner: Weak<Inner>,
}

impl Acknowledger for InMemoryAcker {
    fn ack(&self, topic: &str, partition: i32, offset: i64) -> Result<(), BrokerError> {
        let inner = self.inner.upgrade().ok_or_else(|| BrokerError::AckFailed {
            topic: topic.to_string(),
            partition,
            offset,
            reason: "broker dropped".to_string(),
        })?;
        inner
            .lock()
            .acked
            .push((topic.to_string(), partition, offset));
        Ok(())
    }
}

/// In-memory, partitioned broker.
///
/// Cheap to clone; clones share the same topics.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Broker with [`DEFAULT_PARTITIONS`] partitions per topic.
    #[must_use]
    pub fn new() -> Self {
        Self::with_partitions(DEFAULT_PARTITIONS)
    }

    /// Broker with `partitions` partitions per topic (at least 1).
    #[must_use]
    pub fn with_partitions(partitions: i32) -> Self {
        Self {
            inner: Arc::new(Inner {
                partitions: partitions.max(1),
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Partition a key maps to.
    #[must_use]
    pub fn partition_for(&self, key: &str) -> i32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_possible_wrap)]
        let partition = (hasher.finish() % self.inner.partitions as u64) as i32;
        partition
    }

    /// Makes every publish to `topic` fail with `cause`.
    pub fn fail_topic(&self, topic: &str, cause: &str) {
        self.inner
            .lock()
            .failing
            .insert(topic.to_string(), cause.to_string());
    }

    /// Makes every publish to `topic` hang until the caller gives up.
    pub fn stall_topic(&self, topic: &str) {
        self.inner.lock().stalled.insert(topic.to_string());
    }

    /// Undoes [`fail_topic`](Self::fail_topic) and [`stall_topic`](Self::stall_topic).
    pub fn heal_topic(&self, topic: &str) {
        let mut state = self.inner.lock();
        state.failing.remove(topic);
        state.stalled.remove(topic);
    }

    /// Every record stored on `topic`, in publish order.
    #[must_use]
    pub fn records(&self, topic: &str) -> Vec<StoredRecord> {
        let state = self.inner.lock();
        let mut records: Vec<StoredRecord> = state
            .logs
            .get(topic)
            .map(|partitions| partitions.iter().flatten().cloned().collect())
            .unwrap_or_default();
        records.sort_by_key(|r| r.sequence);
        records
    }

    /// Every record stored on `topic` with partition key `key`, in publish order.
    #[must_use]
    pub fn records_for_key(&self, topic: &str, key: &str) -> Vec<StoredRecord> {
        self.records(topic)
            .into_iter()
            .filter(|r| r.key == key)
            .collect()
    }

    /// `(topic, partition, offset)` of every acknowledgement, in order.
    #[must_use]
    pub fn acked(&self) -> Vec<(String, i32, i64)> {
        self.inner.lock().acked.clone()
    }

    /// Whether the record at the given coordinates was acknowledged.
    #[must_use]
    pub fn is_acked(&self, topic: &str, partition: i32, offset: i64) -> bool {
        self.inner
            .lock()
            .acked
            .iter()
            .any(|(t, p, o)| t == topic && *p == partition && *o == offset)
    }

    /// Polls until `topic` holds at least `count` records or `timeout` elapses,
    /// then returns what is there.
    pub async fn wait_for_records(&self, topic: &str, count: usize, timeout: Duration) -> Vec<StoredRecord> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let records = self.records(topic);
            if records.len() >= count || tokio::time::Instant::now() >= deadline {
                return records;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Polls until `count` acknowledgements were recorded or `timeout` elapses.
    pub async fn wait_for_acks(&self, count: usize, timeout: Duration) -> Vec<(String, i32, i64)> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let acked = self.acked();
            if acked.len() >= count || tokio::time::Instant::now() >= deadline {
                return acked;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn message(&self, record: &StoredRecord) -> BrokerMessage {
        BrokerMessage::new(
            record.topic.clone(),
            record.partition,
            record.offset,
            Some(record.key.clone()),
            record.payload.clone(),
            record.headers.clone(),
            Arc::new(InMemoryAcker {
                inner: Arc::downgrade(&self.inner),
            }),
        )
    }

    fn append(&self, record: OutboundRecord) -> DeliveryOutcome {
        let partition = self.partition_for(&record.key);
        let mut state = self.inner.lock();

        if let Some(cause) = state.failing.get(&record.topic) {
            return DeliveryOutcome::Failed {
                cause: cause.clone(),
            };
        }

        state.sequence += 1;
        let sequence = state.sequence;
        let partitions = usize::try_from(self.inner.partitions).unwrap_or(1);
        let log = state
            .logs
            .entry(record.topic.clone())
            .or_insert_with(|| vec![Vec::new(); partitions]);
        let slot = usize::try_from(partition).unwrap_or(0);
        let offset = i64::try_from(log[slot].len()).unwrap_or(i64::MAX);

        let stored = StoredRecord {
            topic: record.topic,
            partition,
            offset,
            key: record.key,
            payload: record.payload,
            headers: record.headers,
            sequence,
        };
        log[slot].push(stored.clone());

        let message = self.message(&stored);
        state.subscribers.retain(|subscriber| {
            !subscriber.topics.contains(&stored.topic) || subscriber.sender.send(message.clone()).is_ok()
        });

        DeliveryOutcome::Acked { partition, offset }
    }
}

impl Broker for InMemoryBroker {
    fn publish(
        &self,
        record: OutboundRecord,
    ) -> Pin<Box<dyn Future<Output = DeliveryOutcome> + Send + '_>> {
        Box::pin(async move {
            let stalled = self.inner.lock().stalled.contains(&record.topic);
            if stalled {
                future::pending::<()>().await;
            }
            self.append(record)
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, BrokerError>> + Send + '_>> {
        let topics: HashSet<String> = topics.iter().map(|t| (*t).to_string()).collect();
        Box::pin(async move {
            if topics.is_empty() {
                return Err(BrokerError::SubscriptionFailed {
                    topics: Vec::new(),
                    reason: "no topics given".to_string(),
                });
            }

            let (sender, mut receiver) = mpsc::unbounded_channel();
            {
                let mut state = self.inner.lock();
                let mut backlog: Vec<&StoredRecord> = state
                    .logs
                    .iter()
                    .filter(|(topic, _)| topics.contains(*topic))
                    .flat_map(|(_, partitions)| partitions.iter().flatten())
                    .collect();
                backlog.sort_by_key(|r| r.sequence);
                for record in backlog {
                    let _ = sender.send(self.message(record));
                }
                state.subscribers.push(Subscriber { topics, sender });
            }

            let stream = async_stream::stream! {
                while let Some(message) = receiver.recv().await {
                    yield Ok::<_, BrokerError>(message);
                }
            };
            Ok(Box::pin(stream) as MessageStream)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn same_key_same_partition_sequential_offsets() {
        let broker = InMemoryBroker::new();
        let first = broker
            .publish(OutboundRecord::new("t", "order-1", b"a".to_vec()))
            .await;
        let second = broker
            .publish(OutboundRecord::new("t", "order-1", b"b".to_vec()))
            .await;

        let partition = broker.partition_for("order-1");
        assert_eq!(first, DeliveryOutcome::Acked { partition, offset: 0 });
        assert_eq!(second, DeliveryOutcome::Acked { partition, offset: 1 });
        assert_eq!(broker.records("t").len(), 2);
    }

    #[tokio::test]
    async fn failing_topic_stores_nothing() {
        let broker = InMemoryBroker::new();
        broker.fail_topic("t", "leader not available");
        let outcome = broker.publish(OutboundRecord::new("t", "k", vec![])).await;
        assert_eq!(
            outcome,
            DeliveryOutcome::Failed {
                cause: "leader not available".to_string()
            }
        );
        assert!(broker.records("t").is_empty());

        broker.heal_topic("t");
        assert!(broker.publish(OutboundRecord::new("t", "k", vec![])).await.is_acked());
    }

    #[tokio::test]
    async fn subscription_replays_then_streams_live() {
        let broker = InMemoryBroker::new();
        let _ = broker.publish(OutboundRecord::new("a", "k", b"1".to_vec())).await;
        let _ = broker.publish(OutboundRecord::new("b", "k", b"x".to_vec())).await;

        let mut stream = broker.subscribe(&["a"]).await.unwrap();
        let _ = broker.publish(OutboundRecord::new("a", "k", b"2".to_vec())).await;

        let first = stream.next().await.unwrap().unwrap();
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(first.payload, b"1".to_vec());
        assert_eq!(second.payload, b"2".to_vec());

        second.ack().unwrap();
        assert!(broker.is_acked("a", second.partition, second.offset));
        assert!(!broker.is_acked("a", first.partition, first.offset));
    }

    #[test]
    fn stalled_topic_never_completes() {
        let broker = InMemoryBroker::new();
        broker.stall_topic("t");

        let mut publish = tokio_test::task::spawn(broker.publish(OutboundRecord::new("t", "k", vec![])));
        tokio_test::assert_pending!(publish.poll());
        tokio_test::assert_pending!(publish.poll());
        drop(publish);

        assert!(broker.records("t").is_empty());
    }
}
