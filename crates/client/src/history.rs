//! Prediction History: ordered `(tick, input, state)` records awaiting
//! confirmation.
//!
//! Invariant: ticks are strictly increasing with no duplicates. Every mutation
//! preserves it; `push` and `replace` reject records that would break it.

use std::collections::VecDeque;

use thiserror::Error;
use tideline_sim::{Tick, TickRecord};

/// Default record cap; bounds memory when authoritative updates stop.
pub const DEFAULT_HISTORY_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("tick {tick} does not follow last recorded tick {last}")]
    NonMonotonic { last: Tick, tick: Tick },
}

/// Bounded, tick-ordered log of prediction steps.
#[derive(Debug, Clone, PartialEq)]
pub struct History {
    records: VecDeque<TickRecord>,
    capacity: usize,
    evicted: u64,
}

impl History {
    /// Create an empty history. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::new(),
            capacity: capacity.max(1),
            evicted: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records dropped from the front because the cap was reached.
    pub fn evicted_count(&self) -> u64 {
        self.evicted
    }

    pub fn front(&self) -> Option<&TickRecord> {
        self.records.front()
    }

    pub fn back(&self) -> Option<&TickRecord> {
        self.records.back()
    }

    pub fn last_tick(&self) -> Option<Tick> {
        self.records.back().map(|r| r.tick)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TickRecord> {
        self.records.iter()
    }

    /// Append a record. At capacity the oldest record is evicted and returned.
    pub fn push(&mut self, record: TickRecord) -> Result<Option<TickRecord>, HistoryError> {
        if let Some(last) = self.last_tick()
            && record.tick <= last
        {
            return Err(HistoryError::NonMonotonic {
                last,
                tick: record.tick,
            });
        }

        self.records.push_back(record);
        if self.records.len() > self.capacity {
            self.evicted += 1;
            return Ok(self.records.pop_front());
        }
        Ok(None)
    }

    /// Drop every record with a tick strictly less than `tick`.
    /// Returns the number of records removed.
    pub fn prune_before(&mut self, tick: Tick) -> usize {
        let keep_from = self.records.partition_point(|r| r.tick < tick);
        self.records.drain(..keep_from);
        keep_from
    }

    pub fn pop_front(&mut self) -> Option<TickRecord> {
        self.records.pop_front()
    }

    /// Replace all records. Keeps only the newest `capacity` records.
    pub fn replace(&mut self, records: Vec<TickRecord>) -> Result<(), HistoryError> {
        if let Some(pair) = records.windows(2).find(|w| w[1].tick <= w[0].tick) {
            return Err(HistoryError::NonMonotonic {
                last: pair[0].tick,
                tick: pair[1].tick,
            });
        }

        let overflow = records.len().saturating_sub(self.capacity);
        self.evicted += overflow as u64;
        self.records = records.into_iter().skip(overflow).collect();
        Ok(())
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Copy of the records in tick order.
    pub fn to_vec(&self) -> Vec<TickRecord> {
        self.records.iter().copied().collect()
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
