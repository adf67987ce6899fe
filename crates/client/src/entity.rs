//! Client-side entity: spawn/despawn hooks, per-tick prediction, snapshot
//! handling and the render query surface.

use std::mem;

use tideline_sim::{
    AuthoritativeSnapshot, Body, DrivingInput, EntityId, SimContext, Vec2, ZERO, is_finite,
};
use tideline_wire::{InputCmdProto, Subscription};
use tracing::{debug, trace};

use crate::ReconcilerConfig;
use crate::history::{History, HistoryError};
use crate::prediction::{Advance, PredictionMode, PredictionTrack};
use crate::reconcile::{ReconcileOutcome, ReconcileStats, Reconciler};
use crate::tick_source::TickSource;

/// How this participant relates to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityRole {
    /// Local participant owns this actor and supplies its input.
    Owner,
    /// Actor owned by another participant.
    Ghost,
    /// Replicated projectile.
    ProjectileObserver,
}

impl EntityRole {
    pub fn mode(self) -> PredictionMode {
        match self {
            EntityRole::Owner => PredictionMode::Owned,
            EntityRole::Ghost => PredictionMode::Ghost,
            EntityRole::ProjectileObserver => PredictionMode::Projectile,
        }
    }
}

/// What `on_tick` did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Predicted(Advance),
    /// No simulation context; the entity is frozen this tick.
    Skipped,
    Despawned,
}

/// One replicated entity as seen by a non-authoritative participant.
#[derive(Debug)]
pub struct ClientEntity {
    entity_id: EntityId,
    role: EntityRole,
    body: Body,
    context: Option<SimContext>,
    track: PredictionTrack,
    reconciler: Reconciler,
    /// Newest authoritative snapshot seen, by tick.
    latest: AuthoritativeSnapshot,
    subscription: Option<Subscription<AuthoritativeSnapshot>>,
    /// Owner inputs awaiting transmission.
    outbox: Vec<DrivingInput>,
    /// A snapshot arrived while the context was missing.
    deferred: bool,
    despawned: bool,
}

impl ClientEntity {
    /// Spawn hook. Prediction starts from `initial`, with an empty History.
    pub fn spawn(
        entity_id: EntityId,
        role: EntityRole,
        body: Body,
        initial: AuthoritativeSnapshot,
        context: Option<SimContext>,
        config: &ReconcilerConfig,
    ) -> Self {
        debug!(entity_id, ?role, tick = initial.tick, "client entity spawned");
        Self {
            entity_id,
            role,
            body,
            context,
            track: PredictionTrack::new(
                role.mode(),
                initial.state,
                Some(initial.tick),
                config.history_capacity,
            ),
            reconciler: Reconciler::new(config.divergence, role.mode()),
            latest: initial,
            subscription: None,
            outbox: Vec::new(),
            deferred: false,
            despawned: false,
        }
    }

    /// Spawn from a subscription; its current value is the initial snapshot
    /// and later changes are consumed by [`ClientEntity::pump`].
    pub fn spawn_subscribed(
        entity_id: EntityId,
        role: EntityRole,
        body: Body,
        subscription: Subscription<AuthoritativeSnapshot>,
        context: Option<SimContext>,
        config: &ReconcilerConfig,
    ) -> Self {
        let initial = *subscription.current();
        let mut entity = Self::spawn(entity_id, role, body, initial, context, config);
        entity.subscription = Some(subscription);
        entity
    }

    /// Despawn hook: drops History and the subscription. Later calls are no-ops.
    pub fn despawn(&mut self) {
        if self.despawned {
            return;
        }
        self.despawned = true;
        self.subscription = None;
        self.outbox.clear();
        self.track.history_mut().clear();
        debug!(entity_id = self.entity_id, "client entity despawned");
    }

    pub fn is_despawned(&self) -> bool {
        self.despawned
    }

    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    pub fn role(&self) -> EntityRole {
        self.role
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn context(&self) -> Option<&SimContext> {
        self.context.as_ref()
    }

    /// Install or remove the simulation context. A snapshot that arrived
    /// while it was missing is reconciled now.
    pub fn set_context(
        &mut self,
        context: Option<SimContext>,
    ) -> Result<Option<ReconcileOutcome>, HistoryError> {
        self.context = context;
        if self.context.is_none() || !mem::take(&mut self.deferred) {
            return Ok(None);
        }
        let latest = self.latest;
        self.reconcile(&latest).map(Some)
    }

    /// Predict one tick at the tick source's current tick.
    ///
    /// `local_input` is only read for the owner; ghosts reuse the latest
    /// snapshot's input and projectiles drive themselves.
    pub fn on_tick(
        &mut self,
        clock: &impl TickSource,
        local_input: Vec2,
    ) -> Result<TickOutcome, HistoryError> {
        if self.despawned {
            return Ok(TickOutcome::Despawned);
        }
        let Some(ctx) = self.context else {
            trace!(entity_id = self.entity_id, "no simulation context, frozen");
            return Ok(TickOutcome::Skipped);
        };

        let tick = clock.current_tick();
        let advance = match self.role {
            EntityRole::Owner => {
                // Non-finite input would poison history and be rejected upstream
                let local_input = if is_finite(local_input) {
                    local_input
                } else {
                    debug!(entity_id = self.entity_id, tick, "non-finite local input, using zero");
                    ZERO
                };
                let input = self.body.driving_input(self.track.state(), local_input);
                let advance = self.track.advance(tick, input, &self.body, &ctx)?;
                if matches!(advance, Advance::Stepped(_)) {
                    self.outbox.push(DrivingInput::new(tick, input));
                }
                advance
            }
            EntityRole::Ghost => {
                let input = self.body.driving_input(self.track.state(), self.latest.input);
                self.track.advance(tick, input, &self.body, &ctx)?
            }
            EntityRole::ProjectileObserver => self.track.advance_projectile(
                &self.latest,
                clock.estimated_lag_ticks(),
                &self.body,
                &ctx,
            )?,
        };

        Ok(TickOutcome::Predicted(advance))
    }

    /// Change callback for the replicated snapshot.
    ///
    /// Returns `None` for a repeat of the newest snapshot or after despawn.
    pub fn on_authoritative(
        &mut self,
        snapshot: AuthoritativeSnapshot,
    ) -> Result<Option<ReconcileOutcome>, HistoryError> {
        if self.despawned || snapshot == self.latest {
            return Ok(None);
        }
        if snapshot.tick >= self.latest.tick {
            self.latest = snapshot;
        }
        if self.context.is_none() {
            self.deferred = true;
        }
        self.reconcile(&snapshot).map(Some)
    }

    /// Drain the attached subscription, reconciling each change in order.
    pub fn pump(&mut self) -> Result<Vec<ReconcileOutcome>, HistoryError> {
        let changes = match self.subscription.as_mut() {
            Some(subscription) => subscription.drain(),
            None => return Ok(Vec::new()),
        };

        let mut outcomes = Vec::with_capacity(changes.len());
        for change in changes {
            if let Some(outcome) = self.on_authoritative(change.current)? {
                outcomes.push(outcome);
            }
        }
        Ok(outcomes)
    }

    fn reconcile(
        &mut self,
        snapshot: &AuthoritativeSnapshot,
    ) -> Result<ReconcileOutcome, HistoryError> {
        self.reconciler
            .reconcile(snapshot, &mut self.track, &self.body, self.context.as_ref())
    }

    /// Inputs captured since the last call, ready for transmission.
    pub fn take_input_commands(&mut self) -> Vec<InputCmdProto> {
        mem::take(&mut self.outbox)
            .iter()
            .map(|input| InputCmdProto::new(self.entity_id, input))
            .collect()
    }

    /// Position to render: the authoritative snapshot for actors, the local
    /// extrapolation for projectiles.
    pub fn position(&self) -> Vec2 {
        match self.role {
            EntityRole::Owner | EntityRole::Ghost => self.latest.state.position,
            EntityRole::ProjectileObserver => self.track.state().position,
        }
    }

    /// Locally predicted position, regardless of role.
    pub fn predicted_position(&self) -> Vec2 {
        self.track.state().position
    }

    pub fn latest_snapshot(&self) -> &AuthoritativeSnapshot {
        &self.latest
    }

    pub fn track(&self) -> &PredictionTrack {
        &self.track
    }

    pub fn history(&self) -> &History {
        self.track.history()
    }

    pub fn stats(&self) -> &ReconcileStats {
        self.reconciler.stats()
    }
}
