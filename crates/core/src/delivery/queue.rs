use std::collections::VecDeque;

use serde::Serialize;
use tokio::time::Instant;

use crate::domain::outbound::{OutboundEnvelope, Priority};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepth {
    pub high: usize,
    pub normal: usize,
    pub low: usize,
}

impl QueueDepth {
    pub fn total(&self) -> usize {
        self.high + self.normal + self.low
    }
}

/// Strict-priority queue with FIFO order inside each class. Envelopes that are
/// backing off (`next_eligible_at` in the future) are skipped, not reordered.
#[derive(Debug, Default)]
pub struct PriorityQueue {
    lanes: [VecDeque<OutboundEnvelope>; 3],
}

impl PriorityQueue {
    pub fn push(&mut self, envelope: OutboundEnvelope) {
        self.lanes[envelope.priority.rank()].push_back(envelope);
    }

    pub fn pop_eligible(&mut self, now: Instant) -> Option<OutboundEnvelope> {
        for lane in &mut self.lanes {
            if let Some(position) = lane.iter().position(|envelope| envelope.is_eligible(now)) {
                return lane.remove(position);
            }
        }
        None
    }

    /// Whether something at `priority` or above is waiting and could go now.
    pub fn has_eligible_at_or_above(&self, priority: Priority, now: Instant) -> bool {
        self.lanes[..=priority.rank()]
            .iter()
            .any(|lane| lane.iter().any(|envelope| envelope.is_eligible(now)))
    }

    /// Earliest moment any queued envelope becomes eligible.
    pub fn next_eligible_at(&self, now: Instant) -> Option<Instant> {
        self.lanes
            .iter()
            .flat_map(|lane| lane.iter())
            .map(|envelope| envelope.next_eligible_at.map_or(now, |at| at.max(now)))
            .min()
    }

    pub fn depth(&self) -> QueueDepth {
        QueueDepth {
            high: self.lanes[Priority::High.rank()].len(),
            normal: self.lanes[Priority::Normal.rank()].len(),
            low: self.lanes[Priority::Low.rank()].len(),
        }
    }

    pub fn len(&self) -> usize {
        self.lanes.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.iter().all(VecDeque::is_empty)
    }
}
