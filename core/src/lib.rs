//! # Order Saga Core
//!
//! Core types for choreographing an order's lifecycle across independent
//! services that only talk to each other through events on named topics.
//!
//! ## Core Concepts
//!
//! - **Envelope**: [`event::EventEnvelope`], the wire record carrying metadata plus
//!   exactly one typed payload variant
//! - **Codec**: [`codec::EventCodec`], lossless JSON encoding of envelopes
//! - **Correlation**: [`correlation::CorrelationTracker`], saga id plumbing
//! - **Broker**: [`broker::Broker`], the publish/subscribe capability
//! - **Lifecycle**: [`lifecycle::OrderLifecycle`], the per-order status state machine
//! - **Store**: [`store::OrderStore`], persistence capability for the order aggregate
//!
//! ## Architecture Principles
//!
//! - Functional core: the lifecycle is a pure function of `(Order, Event, now)`
//! - Imperative shell: publishing, persistence and consumption live in the runtime
//! - At-least-once delivery with idempotent consumers
//! - Ordering is only relied upon per order key
//!
//! ## Example
//!
//! ```
//! use order_saga_core::codec::EventCodec;
//! use order_saga_core::correlation::CorrelationTracker;
//! use order_saga_core::event::{EventEnvelope, EventPayload, OrderCancelled};
//! use order_saga_core::order::OrderId;
//!
//! let envelope = EventEnvelope::new(
//!     CorrelationTracker::new_saga(),
//!     EventPayload::OrderCancelled(OrderCancelled {
//!         order_id: OrderId::new("order-1"),
//!         reason: "customer request".to_string(),
//!     }),
//!     chrono::Utc::now(),
//! );
//!
//! let bytes = EventCodec::encode(&envelope).unwrap();
//! assert_eq!(EventCodec::decode(&bytes).unwrap(), envelope);
//! ```

pub mod broker;
pub mod codec;
pub mod correlation;
pub mod event;
pub mod lifecycle;
pub mod order;
pub mod store;
pub mod topics;

// Re-export commonly used types
pub use chrono::{DateTime, NaiveDateTime, Utc};
pub use rust_decimal::Decimal;

/// Environment module - Dependency injection traits
///
/// All ambient dependencies the core needs (currently only time) are
/// abstracted behind traits so tests can pin them.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::environment::{Clock, SystemClock};

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
