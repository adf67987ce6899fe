//! Pending input queue for the Authoritative Track.
//!
//! - One queue per actor entity, owned by its track
//! - One input consumed per tick when non-empty
//! - Bounded: at capacity the oldest pending input is evicted
//!
//! Two consumption policies:
//! - `Fifo`: arrival order. A reordered or duplicated channel is
//!   mis-attributed (an input may be applied for the wrong tick, twice).
//! - `TickOrdered`: indexed by input tick. Duplicates and inputs at or
//!   below the last consumed tick are dropped; consumption is ascending.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use tideline_sim::{DrivingInput, Tick};

/// Default number of pending inputs per entity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Consumption order for pending inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuePolicy {
    #[default]
    Fifo,
    TickOrdered,
}

/// Result of attempting to enqueue an input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueResult {
    Queued,
    /// Queued, but the queue was full and the oldest input was dropped.
    QueuedEvictedOldest { evicted_tick: Tick },
    /// Dropped: an input for this tick is already pending (tick-ordered only).
    Duplicate,
    /// Dropped: tick already consumed (tick-ordered only).
    Stale { tick: Tick, last_consumed: Tick },
}

/// FIFO (or tick-indexed) queue of driving inputs awaiting consumption.
#[derive(Debug, Clone)]
pub struct InputQueue {
    policy: QueuePolicy,
    capacity: usize,
    fifo: VecDeque<DrivingInput>,
    ordered: BTreeMap<Tick, DrivingInput>,
    /// Tick of the most recently consumed input.
    last_consumed: Option<Tick>,
    /// Inputs evicted because the queue was full.
    evicted: u64,
}

impl InputQueue {
    /// Create a queue. A capacity of zero is treated as one.
    pub fn new(policy: QueuePolicy, capacity: usize) -> Self {
        Self {
            policy,
            capacity: capacity.max(1),
            fifo: VecDeque::new(),
            ordered: BTreeMap::new(),
            last_consumed: None,
            evicted: 0,
        }
    }

    pub fn policy(&self) -> QueuePolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        match self.policy {
            QueuePolicy::Fifo => self.fifo.len(),
            QueuePolicy::TickOrdered => self.ordered.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn evicted_count(&self) -> u64 {
        self.evicted
    }

    pub fn last_consumed(&self) -> Option<Tick> {
        self.last_consumed
    }

    /// Enqueue an input according to the queue policy.
    pub fn push(&mut self, input: DrivingInput) -> EnqueueResult {
        match self.policy {
            QueuePolicy::Fifo => {
                self.fifo.push_back(input);
                if self.fifo.len() > self.capacity
                    && let Some(oldest) = self.fifo.pop_front()
                {
                    self.evicted += 1;
                    return EnqueueResult::QueuedEvictedOldest {
                        evicted_tick: oldest.tick,
                    };
                }
                EnqueueResult::Queued
            }
            QueuePolicy::TickOrdered => {
                if let Some(last_consumed) = self.last_consumed
                    && input.tick <= last_consumed
                {
                    return EnqueueResult::Stale {
                        tick: input.tick,
                        last_consumed,
                    };
                }
                if self.ordered.contains_key(&input.tick) {
                    return EnqueueResult::Duplicate;
                }

                self.ordered.insert(input.tick, input);
                if self.ordered.len() > self.capacity
                    && let Some((evicted_tick, _)) = self.ordered.pop_first()
                {
                    self.evicted += 1;
                    return EnqueueResult::QueuedEvictedOldest { evicted_tick };
                }
                EnqueueResult::Queued
            }
        }
    }

    /// Take the next input to apply, if any.
    pub fn pop(&mut self) -> Option<DrivingInput> {
        let input = match self.policy {
            QueuePolicy::Fifo => self.fifo.pop_front(),
            QueuePolicy::TickOrdered => self.ordered.pop_first().map(|(_, input)| input),
        }?;
        self.last_consumed = Some(input.tick);
        Some(input)
    }

    /// Drop all pending inputs.
    pub fn clear(&mut self) {
        self.fifo.clear();
        self.ordered.clear();
    }
}

impl Default for InputQueue {
    fn default() -> Self {
        Self::new(QueuePolicy::default(), DEFAULT_QUEUE_CAPACITY)
    }
}
