//! Tideline Authority
//!
//! The authority is the single participant whose computed state is ground
//! truth. It owns:
//! - Participant sessions and entity ownership
//! - Input validation and per-entity pending input queues
//! - One [`AuthoritativeTrack`] per entity, stepped once per tick
//! - The only write handle of every entity's replicated snapshot
//!
//! Clients never mutate a snapshot; they read it through a
//! [`Subscription`] or receive encoded [`SnapshotProto`] bytes.

#![deny(unsafe_code)]

pub mod input_queue;
pub mod session;
pub mod track;
pub mod validation;

use std::collections::{BTreeMap, HashMap};

use prost::Message;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tideline_sim::{
    AuthoritativeSnapshot, Body, EntityId, EntityKind, EntityState, ParticipantId, SimContext,
    Tick,
};
use tideline_wire::{InputCmdProto, SnapshotProto, Subscription};
use tracing::{debug, info, warn};

use input_queue::{DEFAULT_QUEUE_CAPACITY, InputQueue, QueuePolicy};
use session::{Session, SessionId};
use track::{AuthoritativeTrack, StepOutcome};
use validation::{ValidationResult, validate_input};

/// Participant id of the authority itself; clients are numbered from 1.
pub const AUTHORITY_PARTICIPANT: ParticipantId = 0;

// ============================================================================
// Configuration & Errors
// ============================================================================

/// Authority configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorityConfig {
    /// Pending inputs kept per actor before the oldest is dropped.
    pub queue_capacity: usize,
    pub queue_policy: QueuePolicy,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            queue_policy: QueuePolicy::Fifo,
        }
    }
}

/// API misuse at the authority.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorityError {
    #[error("unknown session {0}")]
    UnknownSession(SessionId),
    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),
    #[error("body kind {kind:?} cannot be spawned as {expected:?}")]
    WrongBodyKind {
        kind: EntityKind,
        expected: EntityKind,
    },
    #[error("{kind:?} body does not fit inside the arena")]
    BodyDoesNotFit { kind: EntityKind },
    #[error("participant ids exhausted")]
    ParticipantsExhausted,
}

// ============================================================================
// Tick Report
// ============================================================================

/// Everything one authoritative tick produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub tick: Tick,
    /// Snapshots published this tick, by entity id ascending.
    pub published: Vec<(EntityId, AuthoritativeSnapshot)>,
    /// Actors whose queue was empty.
    pub starved: Vec<EntityId>,
    /// True if the tick was skipped for lack of a simulation context.
    pub skipped: bool,
}

impl TickReport {
    /// Encode every published snapshot for delivery.
    pub fn encode(&self) -> Vec<Vec<u8>> {
        self.published
            .iter()
            .map(|(entity_id, snapshot)| SnapshotProto::new(*entity_id, snapshot).encode_to_vec())
            .collect()
    }
}

// ============================================================================
// Authority
// ============================================================================

/// Authoritative side of every replicated entity.
pub struct Authority {
    config: AuthorityConfig,
    /// Missing context freezes every entity until it is provided.
    context: Option<SimContext>,
    tick: Tick,
    sessions: HashMap<SessionId, Session>,
    next_session_id: SessionId,
    /// `None` once every participant id has been handed out.
    next_participant_id: Option<ParticipantId>,
    /// Tracks by entity id; BTreeMap keeps stepping order deterministic.
    tracks: BTreeMap<EntityId, AuthoritativeTrack>,
    next_entity_id: EntityId,
}

impl Authority {
    pub fn new(config: AuthorityConfig, context: Option<SimContext>) -> Self {
        Self {
            config,
            context,
            tick: 0,
            sessions: HashMap::new(),
            next_session_id: 1,
            next_participant_id: AUTHORITY_PARTICIPANT.checked_add(1),
            tracks: BTreeMap::new(),
            next_entity_id: 1,
        }
    }

    pub fn config(&self) -> &AuthorityConfig {
        &self.config
    }

    pub fn current_tick(&self) -> Tick {
        self.tick
    }

    pub fn context(&self) -> Option<&SimContext> {
        self.context.as_ref()
    }

    pub fn set_context(&mut self, context: Option<SimContext>) {
        self.context = context;
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn entity_count(&self) -> usize {
        self.tracks.len()
    }

    /// Accept a participant. Returns `(session_id, participant_id)`.
    ///
    /// Participant ids are never reused and never collide with the authority's
    /// own id, so acceptance fails once the id space is used up.
    pub fn accept_session(&mut self) -> Result<(SessionId, ParticipantId), AuthorityError> {
        let participant_id = self
            .next_participant_id
            .ok_or(AuthorityError::ParticipantsExhausted)?;
        self.next_participant_id = participant_id.checked_add(1);
        let session_id = self.next_session_id;
        self.next_session_id += 1;

        self.sessions
            .insert(session_id, Session::new(session_id, participant_id));
        info!(session_id, participant_id, "session accepted");

        Ok((session_id, participant_id))
    }

    /// Drop a session. Entities it owned stay alive and starve.
    pub fn disconnect_session(&mut self, session_id: SessionId) -> Result<(), AuthorityError> {
        self.sessions
            .remove(&session_id)
            .ok_or(AuthorityError::UnknownSession(session_id))?;
        info!(session_id, "session disconnected");
        Ok(())
    }

    pub fn session(&self, session_id: SessionId) -> Option<&Session> {
        self.sessions.get(&session_id)
    }

    /// Spawn an actor owned by `owner`.
    pub fn spawn_actor(
        &mut self,
        owner: SessionId,
        body: Body,
        initial: EntityState,
    ) -> Result<EntityId, AuthorityError> {
        if body.kind != EntityKind::Actor {
            return Err(AuthorityError::WrongBodyKind {
                kind: body.kind,
                expected: EntityKind::Actor,
            });
        }
        self.check_fits(&body)?;
        let session = self
            .sessions
            .get_mut(&owner)
            .ok_or(AuthorityError::UnknownSession(owner))?;

        let entity_id = self.next_entity_id;
        self.next_entity_id += 1;
        session.grant(entity_id);

        let queue = InputQueue::new(self.config.queue_policy, self.config.queue_capacity);
        let track = AuthoritativeTrack::actor(entity_id, body, initial, self.tick, owner, queue);
        self.tracks.insert(entity_id, track);
        debug!(entity_id, owner, tick = self.tick, "actor spawned");

        Ok(entity_id)
    }

    /// Spawn an unowned projectile.
    pub fn spawn_projectile(
        &mut self,
        body: Body,
        initial: EntityState,
    ) -> Result<EntityId, AuthorityError> {
        if body.kind != EntityKind::Projectile {
            return Err(AuthorityError::WrongBodyKind {
                kind: body.kind,
                expected: EntityKind::Projectile,
            });
        }
        self.check_fits(&body)?;

        let entity_id = self.next_entity_id;
        self.next_entity_id += 1;

        let track = AuthoritativeTrack::projectile(entity_id, body, initial, self.tick);
        self.tracks.insert(entity_id, track);
        debug!(entity_id, tick = self.tick, "projectile spawned");

        Ok(entity_id)
    }

    /// Without a context the arena is unknown and any body is accepted.
    fn check_fits(&self, body: &Body) -> Result<(), AuthorityError> {
        match &self.context {
            Some(ctx) if !ctx.arena.fits(body.radius) => {
                Err(AuthorityError::BodyDoesNotFit { kind: body.kind })
            }
            _ => Ok(()),
        }
    }

    /// Remove an entity. Its subscriptions observe closure.
    pub fn despawn(&mut self, entity_id: EntityId) -> Result<(), AuthorityError> {
        let track = self
            .tracks
            .remove(&entity_id)
            .ok_or(AuthorityError::UnknownEntity(entity_id))?;
        if let Some(owner) = track.owner()
            && let Some(session) = self.sessions.get_mut(&owner)
        {
            session.revoke(entity_id);
        }
        debug!(entity_id, "entity despawned");
        Ok(())
    }

    /// Open a read handle on an entity's snapshot.
    pub fn subscribe(
        &mut self,
        entity_id: EntityId,
    ) -> Result<Subscription<AuthoritativeSnapshot>, AuthorityError> {
        self.tracks
            .get_mut(&entity_id)
            .map(AuthoritativeTrack::subscribe)
            .ok_or(AuthorityError::UnknownEntity(entity_id))
    }

    pub fn snapshot(&self, entity_id: EntityId) -> Option<AuthoritativeSnapshot> {
        self.tracks.get(&entity_id).map(|t| *t.snapshot())
    }

    pub fn track(&self, entity_id: EntityId) -> Option<&AuthoritativeTrack> {
        self.tracks.get(&entity_id)
    }

    /// Receive encoded input bytes from a session.
    pub fn receive_input(&mut self, session_id: SessionId, bytes: &[u8]) -> ValidationResult {
        match InputCmdProto::from_bytes(bytes) {
            Ok(cmd) => self.receive_input_cmd(session_id, &cmd),
            Err(e) => {
                warn!(session_id, error = %e, "dropping undecodable input");
                ValidationResult::DroppedMalformed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Receive a decoded input from a session.
    pub fn receive_input_cmd(
        &mut self,
        session_id: SessionId,
        cmd: &InputCmdProto,
    ) -> ValidationResult {
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return ValidationResult::DroppedUnknownSession;
        };
        let Some(track) = self.tracks.get_mut(&cmd.entity_id) else {
            return ValidationResult::DroppedUnknownEntity {
                entity_id: cmd.entity_id,
            };
        };
        let Some(queue) = track.queue_mut() else {
            return ValidationResult::DroppedNotInputDriven {
                entity_id: cmd.entity_id,
            };
        };
        if !session.owns(cmd.entity_id) {
            warn!(
                session_id,
                entity_id = cmd.entity_id,
                "dropping input for entity not owned by session"
            );
            return ValidationResult::DroppedNotOwner {
                entity_id: cmd.entity_id,
            };
        }

        let result = validate_input(cmd, queue);
        if result.is_accepted() {
            session.last_input_tick = Some(cmd.tick);
        }
        result
    }

    /// Run one authoritative tick for every entity.
    pub fn step(&mut self) -> TickReport {
        self.tick += 1;
        let tick = self.tick;

        let Some(ctx) = self.context else {
            debug!(tick, "no simulation context, skipping tick");
            return TickReport {
                tick,
                skipped: true,
                ..Default::default()
            };
        };

        let mut report = TickReport {
            tick,
            ..Default::default()
        };
        for (&entity_id, track) in self.tracks.iter_mut() {
            match track.advance(tick, &ctx) {
                StepOutcome::Published(snapshot) => report.published.push((entity_id, snapshot)),
                StepOutcome::Starved => report.starved.push(entity_id),
                StepOutcome::Unchanged => {}
            }
        }
        report
    }
}

// ============================================================================
// Tests
// ============================================================================
