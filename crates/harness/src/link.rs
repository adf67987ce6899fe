//! Simulated one-way network path carrying encoded messages.
//!
//! Delay is measured in ticks: `latency_ticks` plus a uniform
//! `0..=jitter_ticks`. Jitter reorders messages; `duplicate_rate` delivers an
//! extra copy with its own delay. Nothing is lost.

use std::collections::BTreeMap;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use serde::{Deserialize, Serialize};
use tideline_sim::Tick;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub latency_ticks: Tick,
    pub jitter_ticks: Tick,
    /// Probability in `[0, 1]` that a message is delivered twice.
    pub duplicate_rate: f64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            latency_ticks: 3,
            jitter_ticks: 0,
            duplicate_rate: 0.0,
        }
    }
}

impl LinkConfig {
    /// Mean round trip over a pair of links with this config.
    pub fn round_trip(&self, tick_rate_hz: u32) -> Duration {
        let ticks = 2 * self.latency_ticks + self.jitter_ticks;
        Duration::from_secs_f64(ticks as f64 / f64::from(tick_rate_hz))
    }
}

/// Counters for one link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub sent: u64,
    pub delivered: u64,
    pub duplicated: u64,
}

#[derive(Debug)]
pub struct Link {
    config: LinkConfig,
    rng: Pcg32,
    /// Keyed by (due tick, send order) so delivery is deterministic.
    in_flight: BTreeMap<(Tick, u64), Vec<u8>>,
    seq: u64,
    stats: LinkStats,
}

impl Link {
    pub fn new(config: LinkConfig, seed: u64) -> Self {
        Self {
            config,
            rng: Pcg32::seed_from_u64(seed),
            in_flight: BTreeMap::new(),
            seq: 0,
            stats: LinkStats::default(),
        }
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Queue `payload` sent at tick `now`.
    pub fn send(&mut self, now: Tick, payload: Vec<u8>) {
        self.stats.sent += 1;
        let duplicate = self.config.duplicate_rate > 0.0
            && self.rng.random_bool(self.config.duplicate_rate);
        if duplicate {
            self.stats.duplicated += 1;
            let due = now + self.delay();
            self.schedule(due, payload.clone());
        }
        let due = now + self.delay();
        self.schedule(due, payload);
    }

    /// Every message due at or before `now`, in delivery order.
    pub fn deliver(&mut self, now: Tick) -> Vec<Vec<u8>> {
        let pending = self.in_flight.split_off(&(now + 1, 0));
        let due = std::mem::replace(&mut self.in_flight, pending);
        self.stats.delivered += due.len() as u64;
        due.into_values().collect()
    }

    fn delay(&mut self) -> Tick {
        let jitter = if self.config.jitter_ticks > 0 {
            self.rng.random_range(0..=self.config.jitter_ticks)
        } else {
            0
        };
        self.config.latency_ticks + jitter
    }

    fn schedule(&mut self, due: Tick, payload: Vec<u8>) {
        self.in_flight.insert((due, self.seq), payload);
        self.seq += 1;
    }
}
