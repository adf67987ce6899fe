//! Input validation for the authority.
//!
//! Rules applied to every received input before it reaches a track's queue:
//! - Undecodable bytes or wrong arity: DROP + LOG
//! - NaN/Inf in move_dir: DROP + LOG
//! - Magnitude > 1.0: CLAMP
//! - Duplicate or stale tick (tick-ordered queues only): DROP
//!
//! Session and ownership checks happen in [`crate::Authority::receive_input`].

use tideline_sim::{DrivingInput, EntityId, Tick, clamp_magnitude, is_finite};
use tideline_wire::InputCmdProto;
use tracing::{debug, warn};

use crate::input_queue::{EnqueueResult, InputQueue};

/// Result of input validation.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    /// Input accepted and queued.
    Accepted,
    /// Input accepted with magnitude clamped.
    AcceptedWithClamp,
    /// Input accepted; the queue was full and dropped its oldest entry.
    AcceptedEvictedOldest { evicted_tick: Tick },
    /// Dropped: bytes did not decode or move_dir had the wrong arity.
    DroppedMalformed { reason: String },
    /// Dropped: NaN or Inf in move_dir.
    DroppedNanInf,
    /// Dropped: unknown session.
    DroppedUnknownSession,
    /// Dropped: no such entity.
    DroppedUnknownEntity { entity_id: EntityId },
    /// Dropped: the session does not own this entity.
    DroppedNotOwner { entity_id: EntityId },
    /// Dropped: entity does not consume inputs (projectile).
    DroppedNotInputDriven { entity_id: EntityId },
    /// Dropped: an input for this tick is already pending.
    DroppedDuplicate { tick: Tick },
    /// Dropped: tick already consumed.
    DroppedStale { tick: Tick, last_consumed: Tick },
}

impl ValidationResult {
    pub fn is_accepted(&self) -> bool {
        matches!(
            self,
            Self::Accepted | Self::AcceptedWithClamp | Self::AcceptedEvictedOldest { .. }
        )
    }
}

/// Validate an input command and enqueue it.
///
/// # Arguments
/// * `cmd` - The decoded input command
/// * `queue` - Pending input queue of the target entity
pub fn validate_input(cmd: &InputCmdProto, queue: &mut InputQueue) -> ValidationResult {
    let input = match cmd.driving_input() {
        Ok(input) => input,
        Err(e) => {
            warn!(entity_id = cmd.entity_id, tick = cmd.tick, error = %e, "dropping malformed input");
            return ValidationResult::DroppedMalformed {
                reason: e.to_string(),
            };
        }
    };

    if !is_finite(input.vector) {
        warn!(
            entity_id = cmd.entity_id,
            tick = input.tick,
            "dropping input with NaN/Inf move_dir"
        );
        return ValidationResult::DroppedNanInf;
    }

    let clamped_vector = clamp_magnitude(input.vector, 1.0);
    let clamped = clamped_vector != input.vector;
    let input = DrivingInput::new(input.tick, clamped_vector);

    match queue.push(input) {
        EnqueueResult::Queued if clamped => ValidationResult::AcceptedWithClamp,
        EnqueueResult::Queued => ValidationResult::Accepted,
        EnqueueResult::QueuedEvictedOldest { evicted_tick } => {
            debug!(
                entity_id = cmd.entity_id,
                evicted_tick, "input queue full, dropped oldest"
            );
            ValidationResult::AcceptedEvictedOldest { evicted_tick }
        }
        EnqueueResult::Duplicate => {
            debug!(entity_id = cmd.entity_id, tick = input.tick, "dropping duplicate input");
            ValidationResult::DroppedDuplicate { tick: input.tick }
        }
        EnqueueResult::Stale {
            tick,
            last_consumed,
        } => {
            debug!(entity_id = cmd.entity_id, tick, last_consumed, "dropping stale input");
            ValidationResult::DroppedStale {
                tick,
                last_consumed,
            }
        }
    }
}
