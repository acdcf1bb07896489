//! Per-partition commit bookkeeping for out-of-order acknowledgements.
//!
//! Messages of one partition are handed out in offset order but may be
//! acknowledged in any order. Kafka commits are a single position per
//! partition, so only the highest contiguous acknowledged offset may be
//! committed: committing past an unacknowledged message would lose it on
//! restart.

use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Default)]
struct PartitionOffsets {
    in_flight: BTreeSet<i64>,
    acked: BTreeSet<i64>,
    committed: Option<i64>,
}

/// Tracks delivered and acknowledged offsets per `(topic, partition)`.
#[derive(Debug, Default)]
pub struct OffsetTracker {
    partitions: HashMap<(String, i32), PartitionOffsets>,
}

impl OffsetTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `offset` was handed to a consumer and awaits its ack.
    pub fn delivered(&mut self, topic: &str, partition: i32, offset: i64) {
        self.partitions
            .entry((topic.to_string(), partition))
            .or_default()
            .in_flight
            .insert(offset);
    }

    /// Records the ack of `offset`.
    ///
    /// Returns the position to commit (next offset to read) when the ack
    /// moves the committable position forward, `None` otherwise.
    pub fn acked(&mut self, topic: &str, partition: i32, offset: i64) -> Option<i64> {
        let state = self.partitions.get_mut(&(topic.to_string(), partition))?;
        if !state.in_flight.remove(&offset) {
            return None;
        }
        state.acked.insert(offset);

        let floor = state.in_flight.first().copied();
        let committable = state
            .acked
            .iter()
            .copied()
            .take_while(|acked| floor.is_none_or(|f| *acked < f))
            .last()?;
        let position = committable + 1;

        state.acked.retain(|acked| *acked > committable);
        if state.committed.is_some_and(|c| c >= position) {
            return None;
        }
        state.committed = Some(position);
        Some(position)
    }

    /// Forgets a partition, e.g. after it was revoked.
    pub fn forget(&mut self, topic: &str, partition: i32) {
        self.partitions.remove(&(topic.to_string(), partition));
    }

    /// Number of delivered but unacknowledged messages across partitions.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.partitions.values().map(|p| p.in_flight.len()).sum()
    }
}
