//! Service configuration loaded from environment variables.
//!
//! Binaries call `dotenvy::dotenv()` first so a `.env` file can supply any of
//! these variables:
//!
//! | Variable | Default |
//! |---|---|
//! | `KAFKA_BROKERS` | `localhost:9092` |
//! | `CONSUMER_GROUP` | the service name |
//! | `TOPIC_ORDER_CREATED`, `TOPIC_ORDER_CANCELLED`, `TOPIC_INVENTORY_RESERVED`, `TOPIC_INVENTORY_INSUFFICIENT`, `TOPIC_PAYMENT_PROCESSED`, `TOPIC_PAYMENT_FAILED`, `TOPIC_NOTIFICATION_SENT` | see [`TopicConfig`] |
//! | `PUBLISH_TIMEOUT_MS` | `10000` |
//! | `MAX_DELIVERY_ATTEMPTS` | `3` |
//! | `REDELIVERY_INITIAL_DELAY_MS` | `100` |
//! | `WORKER_COUNT` | `4` |
//! | `LOG_LEVEL` | `info` |
//! | `METRICS_ADDR` | unset (no exporter) |

use crate::publisher::PublisherConfig;
use crate::redelivery::RedeliveryPolicy;
use order_saga_core::topics::TopicConfig;
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

/// Configuration shared by the saga service binaries.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Service name, used for logging and as the default consumer group
    pub service_name: String,
    /// Comma-separated broker addresses
    pub brokers: String,
    /// Consumer group
    pub consumer_group: String,
    /// Topic names
    pub topics: TopicConfig,
    /// Publisher settings
    pub publisher: PublisherConfig,
    /// Inbound redelivery settings
    pub redelivery: RedeliveryPolicy,
    /// Worker tasks per consumer
    pub worker_count: usize,
    /// Default tracing filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Prometheus exporter address
    pub metrics_addr: Option<SocketAddr>,
}

impl ServiceConfig {
    /// Load configuration for `service_name` from the process environment.
    ///
    /// Unparseable values fall back to their defaults.
    #[must_use]
    pub fn from_env(service_name: &str) -> Self {
        Self::from_lookup(service_name, |name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    #[must_use]
    pub fn from_lookup(service_name: &str, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |name: &str| lookup(name).and_then(|s| s.parse::<u64>().ok());
        let defaults = TopicConfig::default();
        let topic = |name: &str, default: String| lookup(name).unwrap_or(default);

        let publish_timeout = parsed("PUBLISH_TIMEOUT_MS").map_or(
            PublisherConfig::default().publish_timeout,
            Duration::from_millis,
        );
        let mut redelivery = RedeliveryPolicy::builder();
        if let Some(attempts) = parsed("MAX_DELIVERY_ATTEMPTS").and_then(|n| u32::try_from(n).ok()) {
            redelivery = redelivery.max_attempts(attempts);
        }
        if let Some(millis) = parsed("REDELIVERY_INITIAL_DELAY_MS") {
            redelivery = redelivery.initial_delay(Duration::from_millis(millis));
        }

        Self {
            service_name: service_name.to_string(),
            brokers: lookup("KAFKA_BROKERS").unwrap_or_else(|| "localhost:9092".to_string()),
            consumer_group: lookup("CONSUMER_GROUP").unwrap_or_else(|| service_name.to_string()),
            topics: TopicConfig {
                order_created: topic("TOPIC_ORDER_CREATED", defaults.order_created),
                order_cancelled: topic("TOPIC_ORDER_CANCELLED", defaults.order_cancelled),
                inventory_reserved: topic("TOPIC_INVENTORY_RESERVED", defaults.inventory_reserved),
                inventory_insufficient: topic(
                    "TOPIC_INVENTORY_INSUFFICIENT",
                    defaults.inventory_insufficient,
                ),
                payment_processed: topic("TOPIC_PAYMENT_PROCESSED", defaults.payment_processed),
                payment_failed: topic("TOPIC_PAYMENT_FAILED", defaults.payment_failed),
                notification_sent: topic("TOPIC_NOTIFICATION_SENT", defaults.notification_sent),
            },
            publisher: PublisherConfig { publish_timeout },
            redelivery: redelivery.build(),
            worker_count: parsed("WORKER_COUNT")
                .and_then(|n| usize::try_from(n).ok())
                .filter(|n| *n > 0)
                .unwrap_or(4),
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            metrics_addr: lookup("METRICS_ADDR").and_then(|s| s.parse().ok()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> ServiceConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServiceConfig::from_lookup("order-service", |name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_without_variables() {
        let config = config(&[]);
        assert_eq!(config.brokers, "localhost:9092");
        assert_eq!(config.consumer_group, "order-service");
        assert_eq!(config.topics, TopicConfig::default());
        assert_eq!(config.publisher, PublisherConfig::default());
        assert_eq!(config.redelivery.max_attempts, 3);
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.log_level, "info");
        assert!(config.metrics_addr.is_none());
    }

    #[test]
    fn variables_override_defaults() {
        let config = config(&[
            ("KAFKA_BROKERS", "redpanda:29092"),
            ("CONSUMER_GROUP", "orders-v2"),
            ("TOPIC_PAYMENT_FAILED", "payments.failed"),
            ("PUBLISH_TIMEOUT_MS", "2500"),
            ("MAX_DELIVERY_ATTEMPTS", "5"),
            ("WORKER_COUNT", "8"),
            ("METRICS_ADDR", "0.0.0.0:9100"),
        ]);
        assert_eq!(config.brokers, "redpanda:29092");
        assert_eq!(config.consumer_group, "orders-v2");
        assert_eq!(config.topics.payment_failed, "payments.failed");
        assert_eq!(config.topics.order_created, "order-created");
        assert_eq!(config.publisher.publish_timeout, Duration::from_millis(2500));
        assert_eq!(config.redelivery.max_attempts, 5);
        assert_eq!(config.worker_count, 8);
        assert_eq!(config.metrics_addr, Some("0.0.0.0:9100".parse().unwrap()));
    }

    #[test]
    fn invalid_numbers_fall_back() {
        let config = config(&[("WORKER_COUNT", "0"), ("PUBLISH_TIMEOUT_MS", "soon")]);
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.publisher.publish_timeout, Duration::from_secs(10));
    }
}
