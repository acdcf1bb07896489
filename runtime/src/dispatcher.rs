//! Routes inbound messages to typed handlers and decides their fate.
//!
//! # Flow
//!
//! ```text
//! BrokerMessage ─► decode ─┬─ UnknownVariant / MalformedPayload ─► DeadLetter
//!                          └─ EventEnvelope ─► handler(eventType) ─┬─ Ok  ─► Ack
//!                                                                  └─ Err ─► Nack
//!                                                                     (DeadLetter once
//!                                                                      attempts run out)
//! ```
//!
//! [`Dispatcher::deliver`] drives the whole redelivery loop for one message and
//! acknowledges it with the broker only at the very end.

use crate::publisher::{
    DeadLetter, HEADER_CORRELATION_ID, HEADER_EVENT_ID, HEADER_EVENT_TYPE, Publisher,
};
use crate::redelivery::RedeliveryPolicy;
use async_trait::async_trait;
use order_saga_core::broker::{BrokerMessage, DeliveryOutcome};
use order_saga_core::codec::EventCodec;
use order_saga_core::event::{EventEnvelope, EventType};
use order_saga_core::store::StoreError;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors a handler can report. Every variant leads to a nack.
#[derive(Error, Debug, Clone)]
pub enum HandlerError {
    /// Reading or writing state failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// An outbound event the handler depends on was not delivered
    #[error("Outbound publish failed: {0}")]
    Publish(String),

    /// Any other processing failure
    #[error("Handler failed: {0}")]
    Failed(String),
}

/// Processes one kind of event.
///
/// Handlers must be idempotent: the same envelope may arrive more than once.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Handle a decoded envelope.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError`] if processing failed and the message should be
    /// redelivered.
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError>;
}

/// What to do with a message after one processing attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Done; commit the message
    Ack,
    /// Failed; process it again
    Nack {
        /// Why processing failed
        reason: String,
    },
    /// Give up; route it to the dead-letter topic
    DeadLetter {
        /// Why the message is dead-lettered
        reason: String,
    },
}

/// Decodes inbound messages and routes them by `eventType`.
pub struct Dispatcher {
    handlers: HashMap<EventType, Arc<dyn EventHandler>>,
    publisher: Publisher,
    policy: RedeliveryPolicy,
}

impl Dispatcher {
    /// Creates a dispatcher with no handlers.
    #[must_use]
    pub fn new(publisher: Publisher, policy: RedeliveryPolicy) -> Self {
        Self {
            handlers: HashMap::new(),
            publisher,
            policy,
        }
    }

    /// Registers the handler for `event_type`, replacing any previous one.
    pub fn register(&mut self, event_type: EventType, handler: Arc<dyn EventHandler>) -> &mut Self {
        if self.handlers.insert(event_type, handler).is_some() {
            tracing::warn!(event_type = %event_type, "Replaced existing handler");
        }
        self
    }

    /// Event types with a registered handler, in saga order.
    #[must_use]
    pub fn registered(&self) -> Vec<EventType> {
        EventType::ALL
            .into_iter()
            .filter(|t| self.handlers.contains_key(t))
            .collect()
    }

    /// Topics carrying the registered event types.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        self.publisher.topics().topics_for(&self.registered())
    }

    /// Redelivery policy in force.
    #[must_use]
    pub const fn policy(&self) -> &RedeliveryPolicy {
        &self.policy
    }

    /// Processes one attempt (1-based) of `message` and decides its fate.
    ///
    /// Never fails: undecodable input is dead-lettered rather than returned as
    /// an error.
    pub async fn on_message(&self, message: &BrokerMessage, attempt: u32) -> Disposition {
        let envelope = match EventCodec::decode(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    error = %e,
                    "Undecodable message"
                );
                return Disposition::DeadLetter {
                    reason: e.to_string(),
                };
            }
        };

        let event_type = envelope.event_type();
        let Some(handler) = self.handlers.get(&event_type) else {
            tracing::debug!(
                topic = %message.topic,
                event_type = %event_type,
                "No handler registered, acknowledging"
            );
            return Disposition::Ack;
        };

        match handler.handle(&envelope).await {
            Ok(()) => Disposition::Ack,
            Err(e) => {
                metrics::counter!("saga.dispatch.nacked", "event_type" => event_type.as_str())
                    .increment(1);
                tracing::warn!(
                    topic = %message.topic,
                    event_type = %event_type,
                    event_id = %envelope.event_id(),
                    order_id = %envelope.order_id(),
                    attempt,
                    max_attempts = self.policy.max_attempts,
                    error = %e,
                    "Handler failed"
                );
                if self.policy.is_exhausted(attempt) {
                    Disposition::DeadLetter {
                        reason: format!("handler failed after {attempt} attempts: {e}"),
                    }
                } else {
                    Disposition::Nack {
                        reason: e.to_string(),
                    }
                }
            }
        }
    }

    /// Runs `message` to completion: redelivers on nack with backoff,
    /// dead-letters when attempts run out, then acknowledges it.
    ///
    /// Returns the final disposition (`Ack` or `DeadLetter`).
    pub async fn deliver(&self, message: BrokerMessage) -> Disposition {
        let mut attempt = 1;
        let disposition = loop {
            match self.on_message(&message, attempt).await {
                Disposition::Nack { reason } => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    tracing::debug!(
                        topic = %message.topic,
                        offset = message.offset,
                        attempt,
                        delay_ms = delay.as_millis(),
                        reason = %reason,
                        "Redelivering"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                final_disposition => break final_disposition,
            }
        };

        if let Disposition::DeadLetter { reason } = &disposition {
            let outcome = self.publisher.dead_letter(dead_letter_for(&message, reason)).await;
            if let DeliveryOutcome::Failed { cause } = outcome {
                tracing::error!(
                    topic = %message.topic,
                    offset = message.offset,
                    error = %cause,
                    "Dead-letter publish failed, acknowledging anyway"
                );
            }
        }

        if let Err(e) = message.ack() {
            tracing::warn!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                error = %e,
                "Failed to acknowledge message"
            );
        }

        disposition
    }
}

fn dead_letter_for(message: &BrokerMessage, reason: &str) -> DeadLetter {
    let decoded = EventCodec::decode(&message.payload).ok();
    let from_header = |name: &str| message.header(name).map(str::to_string);

    DeadLetter {
        original_topic: message.topic.clone(),
        key: message.key.clone().unwrap_or_default(),
        payload: message.payload.clone(),
        reason: reason.to_string(),
        event_type: decoded
            .as_ref()
            .map(|e| e.event_type().as_str().to_string())
            .or_else(|| from_header(HEADER_EVENT_TYPE)),
        event_id: decoded
            .as_ref()
            .map(|e| e.event_id().to_string())
            .or_else(|| from_header(HEADER_EVENT_ID)),
        correlation_id: decoded
            .as_ref()
            .map(|e| e.correlation_id().to_string())
            .or_else(|| from_header(HEADER_CORRELATION_ID)),
    }
}
