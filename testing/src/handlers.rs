//! Event handlers for dispatcher and consumer tests.

use async_trait::async_trait;
use order_saga_core::event::EventEnvelope;
use order_saga_runtime::dispatcher::{EventHandler, HandlerError};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

/// Records every envelope it is handed.
///
/// Can be told to fail its first calls and to take a while per call.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    handled: Mutex<Vec<EventEnvelope>>,
    calls: AtomicUsize,
    failures_left: AtomicU32,
    delay: Option<Duration>,
}

impl RecordingHandler {
    /// Handler that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handler whose first `count` calls fail.
    #[must_use]
    pub fn failing_first(count: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(count),
            ..Self::default()
        }
    }

    /// Handler that always fails.
    #[must_use]
    pub fn always_failing() -> Self {
        Self::failing_first(u32::MAX)
    }

    /// Sleeps `delay` inside every call.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Envelopes handled successfully, in order.
    #[must_use]
    pub fn handled(&self) -> Vec<EventEnvelope> {
        self.handled
            .lock()
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    /// Number of calls, failed ones included.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(HandlerError::Failed("injected failure".to_string()));
        }

        if let Ok(mut handled) = self.handled.lock() {
            handled.push(envelope.clone());
        }
        Ok(())
    }
}
