//! Prediction Track: the local copy of an entity's state, advanced every tick
//! ahead of authoritative confirmation.
//!
//! Three modes share the track:
//! - `Owned`: real local input, also sent to the authority.
//! - `Ghost`: an actor owned elsewhere; the latest snapshot's input is reused
//!   as an estimate of the remote owner's intent.
//! - `Projectile`: free-runs its own velocity and periodically jumps to the
//!   authority's latency-adjusted horizon.

use tideline_sim::{
    AuthoritativeSnapshot, Body, EntityState, SimContext, Tick, TickRecord, Vec2, ZERO, step,
};
use tracing::trace;

use crate::history::{History, HistoryError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PredictionMode {
    Owned,
    Ghost,
    Projectile,
}

/// Result of one prediction tick.
#[derive(Debug, Clone, PartialEq)]
pub enum Advance {
    /// One step appended to History.
    Stepped(TickRecord),
    /// Projectile restarted from the snapshot at `from_tick` and fast-forwarded.
    CaughtUp { from_tick: Tick, steps: u64 },
    /// `tick` was already predicted; nothing changed.
    AlreadyStepped { tick: Tick },
}

/// Local predicted state plus the History that supports replay.
#[derive(Debug, Clone)]
pub struct PredictionTrack {
    mode: PredictionMode,
    state: EntityState,
    /// Tick `state` corresponds to; `None` before the first step.
    tick: Option<Tick>,
    history: History,
}

impl PredictionTrack {
    pub fn new(
        mode: PredictionMode,
        initial: EntityState,
        initial_tick: Option<Tick>,
        history_capacity: usize,
    ) -> Self {
        Self {
            mode,
            state: initial,
            tick: initial_tick,
            history: History::new(history_capacity),
        }
    }

    pub fn mode(&self) -> PredictionMode {
        self.mode
    }

    /// Current predicted state.
    pub fn state(&self) -> &EntityState {
        &self.state
    }

    pub fn tick(&self) -> Option<Tick> {
        self.tick
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub(crate) fn history_mut(&mut self) -> &mut History {
        &mut self.history
    }

    /// Step once at `tick` with `input` and record it.
    ///
    /// Ticks at or below the current one are ignored so a tick source that
    /// has not moved cannot produce duplicate records.
    pub fn advance(
        &mut self,
        tick: Tick,
        input: Vec2,
        body: &Body,
        ctx: &SimContext,
    ) -> Result<Advance, HistoryError> {
        if let Some(current) = self.tick
            && tick <= current
        {
            return Ok(Advance::AlreadyStepped { tick });
        }

        let next = step(body, ctx, &self.state, input);
        let record = TickRecord {
            tick,
            input,
            state: next,
        };
        self.history.push(record)?;
        self.state = next;
        self.tick = Some(tick);

        Ok(Advance::Stepped(record))
    }

    /// Projectile tick: catch up to `latest.tick + lag_ticks` if the local
    /// horizon is more than one step behind it, else advance one step.
    pub fn advance_projectile(
        &mut self,
        latest: &AuthoritativeSnapshot,
        lag_ticks: Tick,
        body: &Body,
        ctx: &SimContext,
    ) -> Result<Advance, HistoryError> {
        let local = self.tick.unwrap_or(latest.tick);

        if latest.tick + lag_ticks > local + 1 {
            let records = fast_forward(body, ctx, latest.tick, latest.state, lag_ticks);
            trace!(
                from_tick = latest.tick,
                local_tick = local,
                steps = lag_ticks,
                "projectile catching up"
            );
            self.rebase(latest.tick, latest.state, records)?;
            return Ok(Advance::CaughtUp {
                from_tick: latest.tick,
                steps: lag_ticks,
            });
        }

        let input = body.driving_input(&self.state, ZERO);
        self.advance(local + 1, input, body, ctx)
    }

    /// Replace History with `records` replayed from `baseline` at
    /// `baseline_tick`. The predicted state becomes the last replayed state.
    pub(crate) fn rebase(
        &mut self,
        baseline_tick: Tick,
        baseline: EntityState,
        records: Vec<TickRecord>,
    ) -> Result<(), HistoryError> {
        let (tick, state) = records
            .last()
            .map_or((baseline_tick, baseline), |r| (r.tick, r.state));
        self.history.replace(records)?;
        self.state = state;
        self.tick = Some(tick);
        Ok(())
    }
}

/// Free-run a projectile `steps` ticks from `baseline`, recording each step.
pub fn fast_forward(
    body: &Body,
    ctx: &SimContext,
    baseline_tick: Tick,
    baseline: EntityState,
    steps: Tick,
) -> Vec<TickRecord> {
    let mut state = baseline;
    (1..=steps)
        .map(|offset| {
            let input = body.driving_input(&state, ZERO);
            state = step(body, ctx, &state, input);
            TickRecord {
                tick: baseline_tick + offset,
                input,
                state,
            }
        })
        .collect()
}
