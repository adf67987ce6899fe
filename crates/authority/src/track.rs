//! Authoritative Track: the single writer of an entity's snapshot.

use tideline_sim::{
    AuthoritativeSnapshot, Body, EntityId, EntityKind, EntityState, SimContext, Tick, ZERO, step,
};
use tideline_wire::{Publisher, Subscription, replicated};
use tracing::trace;

use crate::input_queue::InputQueue;
use crate::session::SessionId;

/// What one authoritative tick did for an entity.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// State advanced and a new snapshot was published.
    Published(AuthoritativeSnapshot),
    /// Actor had no pending input; state held static.
    Starved,
    /// Stepped, but the snapshot equals the previous one (nothing published).
    Unchanged,
}

/// Per-entity authoritative simulation.
#[derive(Debug)]
pub struct AuthoritativeTrack {
    entity_id: EntityId,
    body: Body,
    state: EntityState,
    /// Pending inputs; present for actors only.
    queue: Option<InputQueue>,
    owner: Option<SessionId>,
    publisher: Publisher<AuthoritativeSnapshot>,
}

impl AuthoritativeTrack {
    /// Input-driven actor owned by `owner`.
    pub fn actor(
        entity_id: EntityId,
        body: Body,
        initial: EntityState,
        spawn_tick: Tick,
        owner: SessionId,
        queue: InputQueue,
    ) -> Self {
        debug_assert_eq!(body.kind, EntityKind::Actor);
        Self {
            entity_id,
            body,
            state: initial,
            queue: Some(queue),
            owner: Some(owner),
            publisher: replicated(AuthoritativeSnapshot::spawned(spawn_tick, initial)),
        }
    }

    /// Free-running projectile; no owner, no queue.
    pub fn projectile(
        entity_id: EntityId,
        body: Body,
        initial: EntityState,
        spawn_tick: Tick,
    ) -> Self {
        debug_assert_eq!(body.kind, EntityKind::Projectile);
        Self {
            entity_id,
            body,
            state: initial,
            queue: None,
            owner: None,
            publisher: replicated(AuthoritativeSnapshot {
                tick: spawn_tick,
                state: initial,
                input: initial.velocity,
            }),
        }
    }

    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn state(&self) -> &EntityState {
        &self.state
    }

    pub fn owner(&self) -> Option<SessionId> {
        self.owner
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> &AuthoritativeSnapshot {
        self.publisher.get()
    }

    pub fn queue_mut(&mut self) -> Option<&mut InputQueue> {
        self.queue.as_mut()
    }

    pub fn pending_inputs(&self) -> usize {
        self.queue.as_ref().map_or(0, InputQueue::len)
    }

    /// Open a read handle on this entity's snapshot.
    pub fn subscribe(&mut self) -> Subscription<AuthoritativeSnapshot> {
        self.publisher.subscribe()
    }

    /// Run one authoritative tick.
    ///
    /// Actors consume exactly one pending input and publish under the input's
    /// tick; with an empty queue they hold still. Projectiles always step with
    /// their own velocity and publish under `tick`.
    pub fn advance(&mut self, tick: Tick, ctx: &SimContext) -> StepOutcome {
        let snapshot = match self.queue.as_mut() {
            Some(queue) => {
                let Some(input) = queue.pop() else {
                    trace!(entity_id = self.entity_id, tick, "input queue starved");
                    return StepOutcome::Starved;
                };
                let next = step(&self.body, ctx, &self.state, input.vector);
                AuthoritativeSnapshot {
                    tick: input.tick,
                    state: next,
                    input: input.vector,
                }
            }
            None => {
                let input = self.body.driving_input(&self.state, ZERO);
                AuthoritativeSnapshot {
                    tick,
                    state: step(&self.body, ctx, &self.state, input),
                    input,
                }
            }
        };

        self.state = snapshot.state;
        if self.publisher.publish(snapshot) {
            StepOutcome::Published(snapshot)
        } else {
            StepOutcome::Unchanged
        }
    }
}
