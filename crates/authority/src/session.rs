//! Participant sessions at the authority.

use std::collections::BTreeSet;

use tideline_sim::{EntityId, ParticipantId, Tick};

/// Session identifier (authority-internal).
pub type SessionId = u64;

/// A connected participant and the entities it owns.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub participant_id: ParticipantId,
    owned: BTreeSet<EntityId>,
    /// Tick of the last accepted input from this session.
    pub last_input_tick: Option<Tick>,
}

impl Session {
    pub fn new(id: SessionId, participant_id: ParticipantId) -> Self {
        Self {
            id,
            participant_id,
            owned: BTreeSet::new(),
            last_input_tick: None,
        }
    }

    pub fn owns(&self, entity_id: EntityId) -> bool {
        self.owned.contains(&entity_id)
    }

    pub fn grant(&mut self, entity_id: EntityId) {
        self.owned.insert(entity_id);
    }

    pub fn revoke(&mut self, entity_id: EntityId) {
        self.owned.remove(&entity_id);
    }

    /// Owned entities in ascending id order.
    pub fn owned(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.owned.iter().copied()
    }
}
