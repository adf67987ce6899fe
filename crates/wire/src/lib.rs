//! Tideline Wire Protocol Types
//!
//! This crate defines the Protobuf messages exchanged between owning clients
//! and the authority, and the replication primitive through which the
//! authority publishes snapshots. Both client and authority MUST depend on
//! this crate so they agree on the schema.
//!
//! # Message Categories
//!
//! - **Input channel** (at-least-once, unordered): [`InputCmdProto`] from an
//!   owning client to the authority.
//! - **Snapshot delivery**: [`SnapshotProto`], one per authoritative change.
//!
//! In-process hosts skip the byte encoding and use [`replicated`] directly.

#![deny(unsafe_code)]

pub mod replicated;

use prost::Message;
use thiserror::Error;

use tideline_sim::{AuthoritativeSnapshot, DrivingInput, EntityId, EntityState, Tick, Vec2};

pub use replicated::{Change, Publisher, Subscription, replicated};

// ============================================================================
// Errors
// ============================================================================

/// Malformed wire data.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WireError {
    #[error("failed to decode {message}: {reason}")]
    Decode {
        message: &'static str,
        reason: String,
    },
    #[error("{field} must have exactly 2 elements, got {len}")]
    BadArity { field: &'static str, len: usize },
    #[error("snapshot is missing its state")]
    MissingState,
}

impl WireError {
    fn decode(message: &'static str, err: prost::DecodeError) -> Self {
        Self::Decode {
            message,
            reason: err.to_string(),
        }
    }
}

fn vec2(field: &'static str, values: &[f64]) -> Result<Vec2, WireError> {
    match values {
        [x, y] => Ok([*x, *y]),
        _ => Err(WireError::BadArity {
            field,
            len: values.len(),
        }),
    }
}

// ============================================================================
// Input Channel
// ============================================================================

/// Driving input sent by the owning client.
///
/// Note: the sending participant is NOT included; the authority binds it from
/// the session the bytes arrived on.
#[derive(Clone, PartialEq, Message)]
pub struct InputCmdProto {
    /// Entity this input drives.
    #[prost(uint64, tag = "1")]
    pub entity_id: EntityId,

    /// Tick the input was captured for.
    #[prost(uint64, tag = "2")]
    pub tick: Tick,

    /// Movement direction [x, y], magnitude <= 1.0.
    #[prost(double, repeated, tag = "3")]
    pub move_dir: Vec<f64>,
}

impl InputCmdProto {
    pub fn new(entity_id: EntityId, input: &DrivingInput) -> Self {
        Self {
            entity_id,
            tick: input.tick,
            move_dir: input.vector.to_vec(),
        }
    }

    /// Decode from bytes received on the input channel.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        Self::decode(bytes).map_err(|e| WireError::decode("InputCmdProto", e))
    }

    /// The driving input, rejecting a `move_dir` of the wrong arity.
    pub fn driving_input(&self) -> Result<DrivingInput, WireError> {
        Ok(DrivingInput {
            tick: self.tick,
            vector: vec2("move_dir", &self.move_dir)?,
        })
    }
}

// ============================================================================
// Snapshot Delivery
// ============================================================================

/// Entity state embedded in [`SnapshotProto`].
#[derive(Clone, PartialEq, Message)]
pub struct EntityStateProto {
    /// Position [x, y].
    #[prost(double, repeated, tag = "1")]
    pub position: Vec<f64>,

    /// Velocity [vx, vy].
    #[prost(double, repeated, tag = "2")]
    pub velocity: Vec<f64>,
}

/// Authoritative snapshot for one entity.
#[derive(Clone, PartialEq, Message)]
pub struct SnapshotProto {
    #[prost(uint64, tag = "1")]
    pub entity_id: EntityId,

    /// Tick the state corresponds to.
    #[prost(uint64, tag = "2")]
    pub tick: Tick,

    #[prost(message, optional, tag = "3")]
    pub state: Option<EntityStateProto>,

    /// Driving input the authority consumed to produce `state`.
    #[prost(double, repeated, tag = "4")]
    pub driving_input: Vec<f64>,
}

impl SnapshotProto {
    pub fn new(entity_id: EntityId, snapshot: &AuthoritativeSnapshot) -> Self {
        Self {
            entity_id,
            tick: snapshot.tick,
            state: Some(snapshot.state.into()),
            driving_input: snapshot.input.to_vec(),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        Self::decode(bytes).map_err(|e| WireError::decode("SnapshotProto", e))
    }

    /// Split into the entity id and the domain snapshot.
    pub fn into_parts(self) -> Result<(EntityId, AuthoritativeSnapshot), WireError> {
        let state = self.state.ok_or(WireError::MissingState)?.try_into()?;
        let input = vec2("driving_input", &self.driving_input)?;
        Ok((
            self.entity_id,
            AuthoritativeSnapshot {
                tick: self.tick,
                state,
                input,
            },
        ))
    }
}

// ============================================================================
// Conversion Traits
// ============================================================================

impl From<EntityState> for EntityStateProto {
    fn from(s: EntityState) -> Self {
        Self {
            position: s.position.to_vec(),
            velocity: s.velocity.to_vec(),
        }
    }
}

impl TryFrom<EntityStateProto> for EntityState {
    type Error = WireError;

    fn try_from(s: EntityStateProto) -> Result<Self, Self::Error> {
        Ok(Self {
            position: vec2("position", &s.position)?,
            velocity: vec2("velocity", &s.velocity)?,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
