//! Correlation id plumbing for sagas.
//!
//! A correlation id is assigned once, when the saga starts, and is then copied
//! verbatim into every event any participant emits in reaction.

use crate::order::OrderId;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier shared by all events of one saga.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Creates a new `CorrelationId` from a string
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stateless generator/propagator of correlation ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct CorrelationTracker;

impl CorrelationTracker {
    /// Starts a new saga with a fresh UUID-based id.
    #[must_use]
    pub fn new_saga() -> CorrelationId {
        CorrelationId(Uuid::new_v4().to_string())
    }

    /// Id to stamp on an event emitted in reaction to `inbound`.
    #[must_use]
    pub fn propagate(inbound: &CorrelationId) -> CorrelationId {
        inbound.clone()
    }

    /// Starts a saga whose id embeds the order id: `order-<id>-<8 hex chars>`.
    #[must_use]
    pub fn for_order(order_id: &OrderId) -> CorrelationId {
        let suffix = Uuid::new_v4().simple().to_string();
        CorrelationId(format!("order-{order_id}-{}", &suffix[..8]))
    }
}
