//! # Order Saga Runtime
//!
//! The imperative shell around `order-saga-core`: everything that talks to a
//! broker and runs concurrently.
//!
//! - [`publisher::Publisher`]: non-blocking publish with timeout and dead-letter routing
//! - [`dispatcher::Dispatcher`]: decode, route by `eventType`, ack/nack/dead-letter
//! - [`consumer::EventConsumer`]: subscribe-process-reconnect loop over a worker pool
//! - [`redelivery::RedeliveryPolicy`]: bounded redelivery with exponential backoff
//! - [`processed::ProcessedEvents`]: idempotency helper for stateless consumers
//! - [`bounded::BoundedMap`]: capacity-bounded per-order state for participants
//! - [`metrics::MetricsServer`]: Prometheus exporter for the saga counters
//! - [`config::ServiceConfig`]: environment-driven settings for service binaries
//!
//! # Example
//!
//! ```rust,ignore
//! let publisher = Publisher::new(broker.clone(), TopicConfig::default(), PublisherConfig::default());
//!
//! let mut dispatcher = Dispatcher::new(publisher.clone(), RedeliveryPolicy::default());
//! dispatcher.register(EventType::InventoryReserved, handler);
//!
//! let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
//! let topics = dispatcher.topics();
//! let consumer = EventConsumer::new("orders", topics, broker, Arc::new(dispatcher), shutdown_tx.subscribe());
//! let handle = consumer.spawn();
//! ```

pub mod bounded;
pub mod config;
pub mod consumer;
pub mod dispatcher;
pub mod metrics;
pub mod processed;
pub mod publisher;
pub mod redelivery;

pub use bounded::BoundedMap;
pub use config::ServiceConfig;
pub use consumer::EventConsumer;
pub use dispatcher::{Dispatcher, Disposition, EventHandler, HandlerError};
pub use processed::ProcessedEvents;
pub use publisher::{DeadLetter, PendingDelivery, Publisher, PublisherConfig};
pub use redelivery::RedeliveryPolicy;
