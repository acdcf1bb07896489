//! Partitioned broker consumer with automatic reconnection.
//!
//! `EventConsumer` owns the subscribe-process-reconnect loop for one set of
//! topics and feeds every received message to a [`Dispatcher`] running on a
//! fixed pool of worker tasks.
//!
//! # Pattern: Subscribe-Process-Reconnect Loop
//!
//! ```text
//! loop {
//!     try_subscribe:
//!         loop {
//!             next message ─► worker[hash(topic, partition) % workers]
//!             check shutdown signal
//!         }
//!         if stream ended or subscribe failed:
//!             wait retry_delay and subscribe again
//! }
//! drain workers
//! ```
//!
//! # Ordering
//!
//! All messages of one `(topic, partition)` go to the same worker, which runs
//! them one at a time in arrival order. Since saga events are keyed by order
//! id, the events of one order on one topic are processed strictly in order
//! while other partitions proceed concurrently.
//!
//! # Example
//!
//! ```rust,ignore
//! let consumer = EventConsumer::new(
//!     "order-service",
//!     dispatcher.topics(),
//!     broker.clone(),
//!     Arc::new(dispatcher),
//!     shutdown_tx.subscribe(),
//! )
//! .with_workers(4);
//!
//! let handle = consumer.spawn();
//! ```

use crate::dispatcher::Dispatcher;
use futures::StreamExt;
use order_saga_core::broker::{Broker, BrokerMessage, MessageStream};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Per-worker queue depth.
const WORKER_QUEUE_DEPTH: usize = 64;

/// Broker consumer feeding a [`Dispatcher`].
///
/// # Configuration
///
/// - `name`: Human-readable consumer name (for logging)
/// - `topics`: Topics to subscribe to
/// - `broker`: Broker to consume from
/// - `dispatcher`: Decides and runs the fate of each message
/// - `shutdown`: Broadcast receiver for graceful shutdown coordination
/// - `retry_delay`: Wait before resubscribing (default: 5s)
/// - `workers`: Size of the worker pool (default: 4)
pub struct EventConsumer {
    name: String,
    topics: Vec<String>,
    broker: Arc<dyn Broker>,
    dispatcher: Arc<Dispatcher>,
    shutdown: broadcast::Receiver<()>,
    retry_delay: Duration,
    workers: usize,
}

impl EventConsumer {
    /// Create a new consumer with default retry delay and worker count.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        topics: Vec<String>,
        broker: Arc<dyn Broker>,
        dispatcher: Arc<Dispatcher>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            name: name.into(),
            topics,
            broker,
            dispatcher,
            shutdown,
            retry_delay: Duration::from_secs(5),
            workers: 4,
        }
    }

    /// Set custom retry delay.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set worker pool size (at least 1).
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Spawn the consumer as a background task.
    ///
    /// The task ends after a shutdown signal, once every message already
    /// handed to a worker has been processed.
    #[must_use]
    pub fn spawn(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&mut self) {
        info!(consumer = %self.name, topics = ?self.topics, workers = self.workers, "Event consumer started");

        let (senders, handles): (Vec<_>, Vec<_>) = (0..self.workers)
            .map(|index| spawn_worker(&self.name, index, Arc::clone(&self.dispatcher)))
            .unzip();

        loop {
            let topics: Vec<&str> = self.topics.iter().map(String::as_str).collect();

            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Event consumer received shutdown signal");
                    break;
                }
                subscribe_result = self.broker.subscribe(&topics) => {
                    match subscribe_result {
                        Ok(mut stream) => {
                            info!(consumer = %self.name, topics = ?self.topics, "Subscribed to broker");

                            if self.process_stream(&mut stream, &senders).await {
                                break;
                            }

                            warn!(consumer = %self.name, "Message stream ended, reconnecting in {:?}", self.retry_delay);
                            tokio::time::sleep(self.retry_delay).await;
                        }
                        Err(e) => {
                            error!(
                                consumer = %self.name,
                                error = %e,
                                "Failed to subscribe to broker, retrying in {:?}",
                                self.retry_delay
                            );
                            tokio::time::sleep(self.retry_delay).await;
                        }
                    }
                }
            }
        }

        drop(senders);
        for handle in handles {
            if let Err(e) = handle.await {
                error!(consumer = %self.name, error = %e, "Worker task failed");
            }
        }

        info!(consumer = %self.name, "Event consumer stopped");
    }

    /// Routes messages to workers until the stream ends (`false`) or a
    /// shutdown signal arrives (`true`).
    async fn process_stream(
        &mut self,
        stream: &mut MessageStream,
        senders: &[mpsc::Sender<BrokerMessage>],
    ) -> bool {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Event consumer received shutdown signal during processing");
                    return true;
                }
                next = stream.next() => {
                    match next {
                        Some(Ok(message)) => {
                            let index = worker_for(&message.topic, message.partition, senders.len());
                            if senders[index].send(message).await.is_err() {
                                error!(consumer = %self.name, worker = index, "Worker stopped, message dropped");
                            }
                        }
                        Some(Err(e)) => {
                            error!(consumer = %self.name, error = %e, "Error receiving message from stream");
                        }
                        None => {
                            warn!(consumer = %self.name, "Message stream ended");
                            return false;
                        }
                    }
                }
            }
        }
    }
}

fn spawn_worker(
    consumer: &str,
    index: usize,
    dispatcher: Arc<Dispatcher>,
) -> (mpsc::Sender<BrokerMessage>, JoinHandle<()>) {
    let (sender, mut receiver) = mpsc::channel::<BrokerMessage>(WORKER_QUEUE_DEPTH);
    let consumer = consumer.to_string();
    let handle = tokio::spawn(async move {
        while let Some(message) = receiver.recv().await {
            let _ = dispatcher.deliver(message).await;
        }
        tracing::debug!(consumer = %consumer, worker = index, "Worker drained");
    });
    (sender, handle)
}

/// Worker index for a `(topic, partition)` pair.
#[must_use]
pub fn worker_for(topic: &str, partition: i32, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    topic.hash(&mut hasher);
    partition.hash(&mut hasher);
    #[allow(clippy::cast_possible_truncation)]
    let index = (hasher.finish() % workers.max(1) as u64) as usize;
    index
}
