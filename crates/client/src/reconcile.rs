//! Reconciler: corrects a Prediction Track against authoritative snapshots.
//!
//! Runs once per snapshot change:
//! 1. Prune History records older than the snapshot tick.
//! 2. If the front record is not at the snapshot tick, the snapshot is stale
//!    for this track and nothing happens.
//! 3. Otherwise pop it and compare it with the snapshot under the configured
//!    [`DivergencePolicy`].
//! 4. On divergence, restart from the authoritative state and replay the
//!    remaining History (actors) or a single step (projectiles).

use serde::{Deserialize, Serialize};
use tideline_sim::{
    AuthoritativeSnapshot, Body, EntityState, SimContext, Tick, TickRecord, Vec2, distance, step,
};
use tracing::{debug, trace};

use crate::history::HistoryError;
use crate::prediction::{PredictionMode, PredictionTrack, fast_forward};

/// Default tolerance of [`DivergencePolicy::Threshold`].
pub const DEFAULT_DIVERGENCE_EPSILON: f64 = 1e-6;

/// How a verification record is compared with the authoritative snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DivergencePolicy {
    /// Bit-for-bit equality of position and velocity.
    Exact,
    /// Position and velocity each within `epsilon` (euclidean distance).
    Threshold { epsilon: f64 },
}

impl Default for DivergencePolicy {
    fn default() -> Self {
        DivergencePolicy::Threshold {
            epsilon: DEFAULT_DIVERGENCE_EPSILON,
        }
    }
}

impl DivergencePolicy {
    pub fn states_match(&self, predicted: &EntityState, authoritative: &EntityState) -> bool {
        match *self {
            DivergencePolicy::Exact => predicted == authoritative,
            DivergencePolicy::Threshold { epsilon } => {
                distance(predicted.position, authoritative.position) <= epsilon
                    && distance(predicted.velocity, authoritative.velocity) <= epsilon
            }
        }
    }

    pub fn inputs_match(&self, predicted: Vec2, authoritative: Vec2) -> bool {
        match *self {
            DivergencePolicy::Exact => predicted == authoritative,
            DivergencePolicy::Threshold { epsilon } => distance(predicted, authoritative) <= epsilon,
        }
    }
}

/// Result of one reconciliation cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// No History record at the snapshot tick yet; nothing changed.
    Stale {
        snapshot_tick: Tick,
        front_tick: Option<Tick>,
    },
    /// Prediction at `tick` matched the authority.
    Confirmed { tick: Tick },
    /// Prediction was corrected; `replayed` records were recomputed.
    Diverged {
        tick: Tick,
        replayed: usize,
        /// Position error of the discarded prediction.
        error: f64,
    },
    /// No simulation context; the snapshot was not examined.
    Skipped,
}

/// Running reconciliation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ReconcileStats {
    pub confirmed: u64,
    pub diverged: u64,
    pub stale: u64,
    pub skipped: u64,
    /// Records recomputed across all corrections.
    pub replayed: u64,
    /// Largest position error corrected so far.
    pub max_error: f64,
}

/// Per-entity reconciliation state machine.
#[derive(Debug, Clone)]
pub struct Reconciler {
    policy: DivergencePolicy,
    /// Ghosts also compare the driving input they estimated.
    compare_inputs: bool,
    stats: ReconcileStats,
}

impl Reconciler {
    pub fn new(policy: DivergencePolicy, mode: PredictionMode) -> Self {
        Self {
            policy,
            compare_inputs: mode == PredictionMode::Ghost,
            stats: ReconcileStats::default(),
        }
    }

    pub fn policy(&self) -> DivergencePolicy {
        self.policy
    }

    pub fn stats(&self) -> &ReconcileStats {
        &self.stats
    }

    /// Reconcile `track` against `snapshot`.
    ///
    /// Never fails on a stale or divergent snapshot; an error means the
    /// corrected History could not be installed.
    pub fn reconcile(
        &mut self,
        snapshot: &AuthoritativeSnapshot,
        track: &mut PredictionTrack,
        body: &Body,
        ctx: Option<&SimContext>,
    ) -> Result<ReconcileOutcome, HistoryError> {
        let Some(ctx) = ctx else {
            self.stats.skipped += 1;
            return Ok(ReconcileOutcome::Skipped);
        };

        let history = track.history_mut();
        history.prune_before(snapshot.tick);

        let front_tick = history.front().map(|r| r.tick);
        let verification = if front_tick == Some(snapshot.tick) {
            history.pop_front()
        } else {
            None
        };
        let Some(verification) = verification else {
            self.stats.stale += 1;
            trace!(
                snapshot_tick = snapshot.tick,
                ?front_tick,
                "no history record at snapshot tick"
            );
            return Ok(ReconcileOutcome::Stale {
                snapshot_tick: snapshot.tick,
                front_tick,
            });
        };

        let states_match = self.policy.states_match(&verification.state, &snapshot.state);
        let inputs_match =
            !self.compare_inputs || self.policy.inputs_match(verification.input, snapshot.input);
        if states_match && inputs_match {
            self.stats.confirmed += 1;
            return Ok(ReconcileOutcome::Confirmed {
                tick: snapshot.tick,
            });
        }

        let error = distance(verification.state.position, snapshot.state.position);
        let corrected = match track.mode() {
            PredictionMode::Projectile => fast_forward(body, ctx, snapshot.tick, snapshot.state, 1),
            PredictionMode::Owned | PredictionMode::Ghost => {
                replay(body, ctx, snapshot.state, track.history().iter())
            }
        };
        let replayed = corrected.len();
        track.rebase(snapshot.tick, snapshot.state, corrected)?;

        self.stats.diverged += 1;
        self.stats.replayed += replayed as u64;
        self.stats.max_error = self.stats.max_error.max(error);
        debug!(
            tick = snapshot.tick,
            error,
            replayed,
            inputs_match,
            "prediction corrected"
        );

        Ok(ReconcileOutcome::Diverged {
            tick: snapshot.tick,
            replayed,
            error,
        })
    }
}

/// Re-run `step` over `records` from `baseline`, keeping each record's tick
/// and input and recomputing its resulting state.
pub fn replay<'a>(
    body: &Body,
    ctx: &SimContext,
    baseline: EntityState,
    records: impl IntoIterator<Item = &'a TickRecord>,
) -> Vec<TickRecord> {
    let mut state = baseline;
    records
        .into_iter()
        .map(|record| {
            state = step(body, ctx, &state, record.input);
            TickRecord {
                state,
                ..*record
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tideline_sim::Arena;

    fn ctx() -> SimContext {
        SimContext::new(Arena::new([10.0, 10.0]), 50).unwrap()
    }

    fn actor() -> Body {
        Body::actor(5.0, 0.5)
    }

    fn track_with(mode: PredictionMode, inputs: &[(Tick, Vec2)]) -> PredictionTrack {
        let mut track = PredictionTrack::new(mode, EntityState::default(), None, 64);
        for &(tick, input) in inputs {
            track.advance(tick, input, &actor(), &ctx()).unwrap();
        }
        track
    }

    fn snapshot_of(track: &PredictionTrack, tick: Tick) -> AuthoritativeSnapshot {
        let record = track.history().iter().find(|r| r.tick == tick).unwrap();
        AuthoritativeSnapshot {
            tick,
            state: record.state,
            input: record.input,
        }
    }

    #[test]
    fn test_matching_snapshot_confirms_and_pops() {
        let mut track = track_with(
            PredictionMode::Owned,
            &[(1, [1.0, 0.0]), (2, [1.0, 0.0]), (3, [0.0, 1.0])],
        );
        let predicted = *track.state();
        let snapshot = snapshot_of(&track, 2);
        let mut reconciler = Reconciler::new(DivergencePolicy::Exact, PredictionMode::Owned);

        let outcome = reconciler
            .reconcile(&snapshot, &mut track, &actor(), Some(&ctx()))
            .unwrap();

        assert_eq!(reconciler.policy(), DivergencePolicy::Exact);
        assert_eq!(outcome, ReconcileOutcome::Confirmed { tick: 2 });
        let ticks: Vec<_> = track.history().iter().map(|r| r.tick).collect();
        assert_eq!(ticks, vec![3]);
        assert_eq!(*track.state(), predicted);
        assert_eq!(reconciler.stats().confirmed, 1);
    }

    #[test]
    fn test_divergence_replays_from_authoritative_state() {
        // Local prediction moved right; the authority applied (0,1) at tick 1
        let mut track = track_with(PredictionMode::Owned, &[(1, [1.0, 0.0]), (2, [1.0, 0.0])]);
        assert_eq!(track.state().position, [0.2, 0.0]);
        let snapshot = AuthoritativeSnapshot {
            tick: 1,
            state: EntityState::moving([0.0, 0.1], [0.0, 5.0]),
            input: [0.0, 1.0],
        };
        let mut reconciler = Reconciler::new(DivergencePolicy::default(), PredictionMode::Owned);

        let outcome = reconciler
            .reconcile(&snapshot, &mut track, &actor(), Some(&ctx()))
            .unwrap();

        let ReconcileOutcome::Diverged {
            tick,
            replayed,
            error,
        } = outcome
        else {
            panic!("expected divergence, got {outcome:?}");
        };
        assert_eq!(tick, 1);
        assert_eq!(replayed, 1);
        assert!((error - 0.02f64.sqrt()).abs() < 1e-12);

        // Tick 2's input (1,0) re-applied on top of (0, 0.1)
        assert_eq!(track.state().position, [0.1, 0.1]);
        let records = track.history().to_vec();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tick, 2);
        assert_eq!(records[0].input, [1.0, 0.0]);
        assert_eq!(records[0].state, *track.state());
    }

    #[test]
    fn test_divergence_with_empty_remainder_adopts_snapshot() {
        let mut track = track_with(PredictionMode::Owned, &[(1, [1.0, 0.0])]);
        let snapshot = AuthoritativeSnapshot {
            tick: 1,
            state: EntityState::moving([0.0, 0.1], [0.0, 5.0]),
            input: [0.0, 1.0],
        };
        let mut reconciler = Reconciler::new(DivergencePolicy::Exact, PredictionMode::Owned);

        reconciler
            .reconcile(&snapshot, &mut track, &actor(), Some(&ctx()))
            .unwrap();

        assert_eq!(*track.state(), snapshot.state);
        assert!(track.history().is_empty());
        assert_eq!(track.tick(), Some(1));
    }

    #[test]
    fn test_stale_snapshot_leaves_track_untouched() {
        let mut track = track_with(PredictionMode::Owned, &[(5, [1.0, 0.0]), (6, [1.0, 0.0])]);
        let before = track.history().to_vec();
        let mut reconciler = Reconciler::new(DivergencePolicy::Exact, PredictionMode::Owned);

        // Older than anything recorded: prune removes nothing, front is 5
        let old = AuthoritativeSnapshot::spawned(3, EntityState::default());
        let outcome = reconciler
            .reconcile(&old, &mut track, &actor(), Some(&ctx()))
            .unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Stale {
                snapshot_tick: 3,
                front_tick: Some(5)
            }
        );
        assert_eq!(track.history().to_vec(), before);
        assert_eq!(reconciler.stats().stale, 1);
    }

    #[test]
    fn test_snapshot_ahead_of_history_prunes_everything() {
        let mut track = track_with(PredictionMode::Owned, &[(1, [1.0, 0.0]), (2, [1.0, 0.0])]);
        let predicted = *track.state();
        let mut reconciler = Reconciler::new(DivergencePolicy::Exact, PredictionMode::Owned);

        let ahead = AuthoritativeSnapshot::spawned(9, EntityState::default());
        let outcome = reconciler
            .reconcile(&ahead, &mut track, &actor(), Some(&ctx()))
            .unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Stale {
                snapshot_tick: 9,
                front_tick: None
            }
        );
        assert!(track.history().is_empty());
        assert_eq!(*track.state(), predicted);
    }

    #[test]
    fn test_missing_context_skips() {
        let mut track = track_with(PredictionMode::Owned, &[(1, [1.0, 0.0])]);
        let snapshot = AuthoritativeSnapshot::spawned(1, EntityState::at_rest([4.0, 4.0]));
        let mut reconciler = Reconciler::new(DivergencePolicy::Exact, PredictionMode::Owned);

        let outcome = reconciler
            .reconcile(&snapshot, &mut track, &actor(), None)
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Skipped);
        assert_eq!(track.history().len(), 1);
    }

    #[test]
    fn test_ghost_diverges_on_input_mismatch() {
        let mut track = track_with(PredictionMode::Ghost, &[(1, [0.0, 0.0]), (2, [0.0, 0.0])]);
        // Same resulting state, different input: the estimate was wrong
        let mut snapshot = snapshot_of(&track, 1);
        snapshot.input = [0.5, 0.0];

        let mut ghost = Reconciler::new(DivergencePolicy::Exact, PredictionMode::Ghost);
        let outcome = ghost
            .reconcile(&snapshot, &mut track.clone(), &actor(), Some(&ctx()))
            .unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Diverged { .. }));

        let mut owned = Reconciler::new(DivergencePolicy::Exact, PredictionMode::Owned);
        let outcome = owned
            .reconcile(&snapshot, &mut track, &actor(), Some(&ctx()))
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Confirmed { tick: 1 });
    }

    #[test]
    fn test_threshold_tolerates_small_error() {
        let mut track = track_with(PredictionMode::Owned, &[(1, [1.0, 0.0])]);
        let mut snapshot = snapshot_of(&track, 1);
        snapshot.state.position[0] += 1e-9;

        let mut exact = Reconciler::new(DivergencePolicy::Exact, PredictionMode::Owned);
        let outcome = exact
            .reconcile(&snapshot, &mut track.clone(), &actor(), Some(&ctx()))
            .unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Diverged { .. }));

        let mut tolerant = Reconciler::new(DivergencePolicy::default(), PredictionMode::Owned);
        let outcome = tolerant
            .reconcile(&snapshot, &mut track, &actor(), Some(&ctx()))
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Confirmed { tick: 1 });
    }

    #[test]
    fn test_projectile_divergence_steps_once() {
        let body = Body::projectile(0.5);
        let start = EntityState::moving([0.0, 0.0], [5.0, 0.0]);
        let mut track = PredictionTrack::new(PredictionMode::Projectile, start, Some(0), 16);
        track.rebase(0, start, fast_forward(&body, &ctx(), 0, start, 5)).unwrap();

        let snapshot = AuthoritativeSnapshot {
            tick: 2,
            state: EntityState::moving([1.0, 1.0], [5.0, 0.0]),
            input: [5.0, 0.0],
        };
        let mut reconciler =
            Reconciler::new(DivergencePolicy::default(), PredictionMode::Projectile);

        let outcome = reconciler
            .reconcile(&snapshot, &mut track, &body, Some(&ctx()))
            .unwrap();

        assert!(matches!(
            outcome,
            ReconcileOutcome::Diverged { replayed: 1, .. }
        ));
        let records = track.history().to_vec();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].tick, 3);
        assert_eq!(track.state().position, [1.1, 1.0]);
        assert_eq!(track.tick(), Some(3));
    }

    #[test]
    fn test_replay_of_confirmed_history_is_idempotent() {
        let track = track_with(
            PredictionMode::Owned,
            &[(1, [1.0, 0.0]), (2, [0.6, 0.8]), (3, [-1.0, 0.0]), (4, [0.0, -1.0])],
        );

        let replayed = replay(&actor(), &ctx(), EntityState::default(), track.history().iter());

        assert_eq!(replayed, track.history().to_vec());
    }

    #[test]
    fn test_policy_serde_names() {
        let json = serde_json::to_string(&DivergencePolicy::Exact).unwrap();
        assert_eq!(json, "\"exact\"");

        let parsed: DivergencePolicy =
            serde_json::from_str(r#"{"threshold":{"epsilon":0.01}}"#).unwrap();
        assert_eq!(parsed, DivergencePolicy::Threshold { epsilon: 0.01 });
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Advance(Vec2),
            /// Snapshot `back` ticks behind the newest, position nudged by `nudge`.
            Reconcile { back: u64, nudge: f64 },
        }

        fn input() -> impl Strategy<Value = Vec2> {
            (-1.5..1.5f64, -1.5..1.5f64).prop_map(|(x, y)| [x, y])
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                3 => input().prop_map(Op::Advance),
                1 => (0..8u64, prop_oneof![Just(0.0), -0.5..0.5f64])
                    .prop_map(|(back, nudge)| Op::Reconcile { back, nudge }),
            ]
        }

        proptest! {
            #[test]
            fn test_history_stays_strictly_increasing(ops in prop::collection::vec(op(), 1..60)) {
                let mut track = PredictionTrack::new(PredictionMode::Owned, EntityState::default(), None, 64);
                let mut reconciler = Reconciler::new(DivergencePolicy::Exact, PredictionMode::Owned);
                let mut tick: Tick = 0;

                for op in ops {
                    match op {
                        Op::Advance(dir) => {
                            tick += 1;
                            track.advance(tick, dir, &actor(), &ctx()).unwrap();
                        }
                        Op::Reconcile { back, nudge } => {
                            let target = tick.saturating_sub(back);
                            let mut snapshot = match track.history().iter().find(|r| r.tick == target) {
                                Some(_) => snapshot_of(&track, target),
                                None => AuthoritativeSnapshot::spawned(target, EntityState::default()),
                            };
                            snapshot.state.position[0] += nudge;

                            let outcome = reconciler
                                .reconcile(&snapshot, &mut track, &actor(), Some(&ctx()))
                                .unwrap();
                            if let ReconcileOutcome::Confirmed { tick: at }
                            | ReconcileOutcome::Diverged { tick: at, .. } = outcome
                            {
                                prop_assert!(track.history().iter().all(|r| r.tick > at));
                            }
                        }
                    }

                    let ticks: Vec<Tick> = track.history().iter().map(|r| r.tick).collect();
                    prop_assert!(ticks.windows(2).all(|w| w[0] < w[1]), "ticks {:?}", ticks);
                    if let Some(newest) = track.history().back() {
                        prop_assert_eq!(newest.state, *track.state());
                    }
                }
            }

            #[test]
            fn test_replay_reproduces_any_input_script(script in prop::collection::vec(input(), 1..40)) {
                let inputs: Vec<(Tick, Vec2)> = script
                    .into_iter()
                    .enumerate()
                    .map(|(i, dir)| (i as Tick + 1, dir))
                    .collect();
                let track = track_with(PredictionMode::Owned, &inputs);

                let replayed = replay(&actor(), &ctx(), EntityState::default(), track.history().iter());

                prop_assert_eq!(replayed, track.history().to_vec());
            }
        }
    }
}
