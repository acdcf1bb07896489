//! # Order Saga Testing
//!
//! Testing utilities for the order saga workspace.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], [`test_clock`])
//! - [`InMemoryBroker`]: partitioned topics with offsets, failure injection,
//!   ack tracking and dead-letter inspection
//! - [`InMemoryOrderStore`]
//! - [`RecordingHandler`] for dispatcher tests
//! - Fixture builders in [`fixtures`]
//!
//! ## Example
//!
//! ```ignore
//! use order_saga_testing::{InMemoryBroker, fixtures};
//!
//! #[tokio::test]
//! async fn publishes_inventory_reserved() {
//!     let broker = Arc::new(InMemoryBroker::new());
//!     let publisher = Publisher::new(broker.clone(), TopicConfig::default(), PublisherConfig::default());
//!
//!     let order_id = OrderId::new("order-1");
//!     let event = fixtures::envelope(&CorrelationId::new("saga-1"), fixtures::inventory_reserved(&order_id));
//!     assert!(publisher.publish_event(&event).outcome().await.is_acked());
//!     assert_eq!(broker.records("inventory-reserved").len(), 1);
//! }
//! ```

use chrono::{DateTime, Utc};
use order_saga_core::environment::Clock;

pub mod broker;
pub mod fixtures;
pub mod handlers;
pub mod store;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex};

    /// Fixed clock for deterministic tests
    ///
    /// Returns the same time until explicitly advanced.
    ///
    /// # Example
    ///
    /// ```
    /// use order_saga_testing::mocks::FixedClock;
    /// use order_saga_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// assert_eq!(time1, clock.now());
    ///
    /// clock.advance(Duration::seconds(5));
    /// assert_eq!(clock.now(), time1 + Duration::seconds(5));
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Moves the clock forward; clones share the same time.
        pub fn advance(&self, by: chrono::Duration) {
            if let Ok(mut time) = self.time.lock() {
                *time += by;
            }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
                .lock()
                .map_or_else(|poisoned| *poisoned.into_inner(), |time| *time)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Installs a `tracing` subscriber that writes through the test harness.
///
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "order_saga=debug,warn".into()),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use broker::{InMemoryBroker, StoredRecord};
pub use handlers::RecordingHandler;
pub use mocks::{FixedClock, test_clock};
pub use store::InMemoryOrderStore;
