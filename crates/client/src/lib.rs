//! Tideline Client
//!
//! Everything a non-authoritative participant runs per entity:
//! - [`PredictionTrack`]: local stepping ahead of confirmation, with History
//! - [`Reconciler`]: compares authoritative snapshots against History and
//!   replays on divergence
//! - [`ClientEntity`]: spawn/despawn hooks and the render query surface
//!
//! Tick and latency come from the host through [`TickSource`]; snapshots
//! arrive through a `tideline_wire::Subscription` or decoded bytes.

#![deny(unsafe_code)]

pub mod entity;
pub mod history;
pub mod prediction;
pub mod reconcile;
pub mod tick_source;

use serde::{Deserialize, Serialize};

pub use entity::{ClientEntity, EntityRole, TickOutcome};
pub use history::{DEFAULT_HISTORY_CAPACITY, History, HistoryError};
pub use prediction::{Advance, PredictionMode, PredictionTrack};
pub use reconcile::{
    DEFAULT_DIVERGENCE_EPSILON, DivergencePolicy, ReconcileOutcome, ReconcileStats, Reconciler,
    replay,
};
pub use tick_source::{ManualTickSource, TickSource, lag_ticks};

/// Reconciler configuration shared by every client entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    pub divergence: DivergencePolicy,
    /// History records kept per entity before the oldest is evicted.
    pub history_capacity: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            divergence: DivergencePolicy::default(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}
