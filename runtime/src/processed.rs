//! Bounded record of already-processed event ids.
//!
//! Consumers that keep no per-event state of their own use this to skip
//! redelivered envelopes. Mark an event only after its effects are done, so a
//! failed attempt is retried on redelivery.

use crate::bounded::BoundedMap;
use order_saga_core::event::EventId;
use std::sync::Mutex;

/// Default number of ids remembered.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Set of processed event ids; the oldest are forgotten past the capacity.
#[derive(Debug)]
pub struct ProcessedEvents {
    seen: Mutex<BoundedMap<EventId, ()>>,
}

impl Default for ProcessedEvents {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl ProcessedEvents {
    /// Remembers at most `capacity` ids (at least 1).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            seen: Mutex::new(BoundedMap::new(capacity)),
        }
    }

    /// Whether `event_id` was marked.
    #[must_use]
    pub fn contains(&self, event_id: &EventId) -> bool {
        self.seen
            .lock()
            .map(|seen| seen.contains_key(event_id))
            .unwrap_or(false)
    }

    /// Marks `event_id` as processed.
    pub fn mark(&self, event_id: EventId) {
        let Ok(mut seen) = self.seen.lock() else {
            tracing::error!(event_id = %event_id, "Processed-events lock poisoned");
            return;
        };
        seen.insert(event_id, ());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marks_and_forgets_oldest() {
        let processed = ProcessedEvents::with_capacity(2);
        let (a, b, c) = (EventId::generate(), EventId::generate(), EventId::generate());

        processed.mark(a);
        processed.mark(b);
        assert!(processed.contains(&a));
        assert!(processed.contains(&b));

        processed.mark(c);
        assert!(!processed.contains(&a));
        assert!(processed.contains(&b));
        assert!(processed.contains(&c));
    }

    #[test]
    fn marking_twice_does_not_evict() {
        let processed = ProcessedEvents::with_capacity(2);
        let (a, b) = (EventId::generate(), EventId::generate());
        processed.mark(a);
        processed.mark(a);
        processed.mark(b);
        assert!(processed.contains(&a));
        assert!(processed.contains(&b));
    }
}
