//! Tick / RTT provider consumed by the prediction side.

use std::time::Duration;

use tideline_sim::Tick;

/// Network-synchronised tick counter plus latency estimate.
///
/// Implemented by the host engine; the prediction side only reads it.
pub trait TickSource {
    /// Current shared tick. Monotonically non-decreasing.
    fn current_tick(&self) -> Tick;

    fn tick_rate_hz(&self) -> u32;

    /// Round-trip time estimate to the authority.
    fn rtt_to_authority(&self) -> Duration;

    /// Ticks an authoritative snapshot is behind by the time it arrives.
    fn estimated_lag_ticks(&self) -> Tick {
        lag_ticks(self.rtt_to_authority(), self.tick_rate_hz())
    }
}

/// One-way latency in ticks: `ceil(rtt / 2 * tick_rate)`.
pub fn lag_ticks(rtt: Duration, tick_rate_hz: u32) -> Tick {
    let one_way_ticks = rtt.as_secs_f64() * f64::from(tick_rate_hz) / 2.0;
    one_way_ticks.ceil() as Tick
}

/// Tick source driven explicitly by its owner (tests, harness).
#[derive(Debug, Clone, PartialEq)]
pub struct ManualTickSource {
    tick: Tick,
    tick_rate_hz: u32,
    rtt: Duration,
}

impl ManualTickSource {
    pub fn new(tick_rate_hz: u32) -> Self {
        Self {
            tick: 0,
            tick_rate_hz,
            rtt: Duration::ZERO,
        }
    }

    pub fn with_rtt(mut self, rtt: Duration) -> Self {
        self.rtt = rtt;
        self
    }

    /// Move to the next tick and return it.
    pub fn advance(&mut self) -> Tick {
        self.tick += 1;
        self.tick
    }

    pub fn set_tick(&mut self, tick: Tick) {
        self.tick = self.tick.max(tick);
    }

    pub fn set_rtt(&mut self, rtt: Duration) {
        self.rtt = rtt;
    }
}

impl TickSource for ManualTickSource {
    fn current_tick(&self) -> Tick {
        self.tick
    }

    fn tick_rate_hz(&self) -> u32 {
        self.tick_rate_hz
    }

    fn rtt_to_authority(&self) -> Duration {
        self.rtt
    }
}
