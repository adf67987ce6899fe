//! Simulation configuration.
//!
//! Loaded by hosts (authority, clients, harness) from JSON or built in code.
//! Every field has a default so partial files are accepted.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Arena, Body, EntityState, SimContext, Vec2, is_finite};

/// Default simulation tick rate in Hz.
pub const DEFAULT_TICK_RATE_HZ: u32 = 60;

/// Default arena half extents.
pub const DEFAULT_HALF_EXTENT: Vec2 = [10.0, 10.0];

/// Default actor speed in units per second.
pub const DEFAULT_VELOCITY_SCALE: f64 = 5.0;

/// Default collision radius for both entity kinds.
pub const DEFAULT_RADIUS: f64 = 0.5;

/// Configuration rejected by [`SimConfig::validate`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("tick_rate_hz must be positive")]
    ZeroTickRate,
    #[error("{field} must be finite")]
    NonFinite { field: &'static str },
    #[error("arena half extent must be positive on both axes, got {half_extent:?}")]
    NonPositiveExtent { half_extent: Vec2 },
    #[error("{field} radius {radius} must be >= 0 and smaller than half extent {half_extent:?}")]
    RadiusOutOfRange {
        field: &'static str,
        radius: f64,
        half_extent: Vec2,
    },
}

/// Actor spawn configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorConfig {
    pub origin: Vec2,
    pub velocity_scale: f64,
    pub radius: f64,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            origin: [0.0, 0.0],
            velocity_scale: DEFAULT_VELOCITY_SCALE,
            radius: DEFAULT_RADIUS,
        }
    }
}

/// Projectile spawn configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectileConfig {
    pub position: Vec2,
    pub velocity: Vec2,
    pub radius: f64,
}

impl Default for ProjectileConfig {
    fn default() -> Self {
        Self {
            position: [0.0, 0.0],
            velocity: [4.0, 3.0],
            radius: DEFAULT_RADIUS,
        }
    }
}

/// Top-level simulation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub tick_rate_hz: u32,
    pub arena_half_extent: Vec2,
    pub actor: ActorConfig,
    pub projectile: ProjectileConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: DEFAULT_TICK_RATE_HZ,
            arena_half_extent: DEFAULT_HALF_EXTENT,
            actor: ActorConfig::default(),
            projectile: ProjectileConfig::default(),
        }
    }
}

impl SimConfig {
    /// Check the configuration for values the core cannot simulate.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate_hz == 0 {
            return Err(ConfigError::ZeroTickRate);
        }

        let finite_fields = [
            ("arena_half_extent", self.arena_half_extent),
            ("actor.origin", self.actor.origin),
            ("projectile.position", self.projectile.position),
            ("projectile.velocity", self.projectile.velocity),
            ("actor.velocity_scale", [self.actor.velocity_scale, 0.0]),
        ];
        for (field, value) in finite_fields {
            if !is_finite(value) {
                return Err(ConfigError::NonFinite { field });
            }
        }

        let he = self.arena_half_extent;
        if he[0] <= 0.0 || he[1] <= 0.0 {
            return Err(ConfigError::NonPositiveExtent { half_extent: he });
        }

        let arena = Arena::new(he);
        for (field, radius) in [
            ("actor", self.actor.radius),
            ("projectile", self.projectile.radius),
        ] {
            if !arena.fits(radius) {
                return Err(ConfigError::RadiusOutOfRange {
                    field,
                    radius,
                    half_extent: he,
                });
            }
        }

        Ok(())
    }

    /// Validate and build the stepping context.
    pub fn context(&self) -> Result<SimContext, ConfigError> {
        self.validate()?;
        SimContext::new(Arena::new(self.arena_half_extent), self.tick_rate_hz)
    }

    pub fn actor_body(&self) -> Body {
        Body::actor(self.actor.velocity_scale, self.actor.radius)
    }

    pub fn projectile_body(&self) -> Body {
        Body::projectile(self.projectile.radius)
    }

    pub fn actor_initial_state(&self) -> EntityState {
        EntityState::at_rest(self.actor.origin)
    }

    pub fn projectile_initial_state(&self) -> EntityState {
        EntityState::moving(self.projectile.position, self.projectile.velocity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SimConfig::default();
        assert!(config.validate().is_ok());

        let ctx = config.context().unwrap();
        assert_eq!(ctx.tick_rate_hz(), 60);
        assert_eq!(ctx.arena.half_extent, [10.0, 10.0]);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "tick_rate_hz": 30, "actor": { "velocity_scale": 8.0 } }"#;
        let config: SimConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.tick_rate_hz, 30);
        assert_eq!(config.actor.velocity_scale, 8.0);
        assert_eq!(config.actor.radius, DEFAULT_RADIUS);
        assert_eq!(config.arena_half_extent, DEFAULT_HALF_EXTENT);
    }

    #[test]
    fn test_zero_tick_rate_rejected() {
        let config = SimConfig {
            tick_rate_hz: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroTickRate));
    }

    #[test]
    fn test_non_finite_rejected() {
        let mut config = SimConfig::default();
        config.projectile.velocity = [f64::INFINITY, 0.0];
        assert_eq!(
            config.validate(),
            Err(ConfigError::NonFinite {
                field: "projectile.velocity"
            })
        );
    }

    #[test]
    fn test_radius_must_fit_arena() {
        let mut config = SimConfig::default();
        config.arena_half_extent = [1.0, 1.0];
        config.actor.radius = 1.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::RadiusOutOfRange { field: "actor", .. })
        ));

        config.actor.radius = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_positive_extent_rejected() {
        let config = SimConfig {
            arena_half_extent: [0.0, 5.0],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NonPositiveExtent { .. })
        ));
    }
}
