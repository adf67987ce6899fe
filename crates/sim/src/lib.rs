//! Tideline Simulation Core
//!
//! This crate contains the deterministic, fixed-timestep state transition
//! function shared by the Authoritative Track and every Prediction Track.
//! Both sides MUST step entities through [`step`] so that a replay on a client
//! reproduces the authority bit-for-bit.
//!
//! # Architecture Constraints
//!
//! The Simulation Core MUST NOT:
//! - Perform I/O operations (file, network, logging)
//! - Read wall-clock time
//! - Use randomness
//! - Depend on frame rate or variable delta time
//!
//! Replication, input transport and reconciliation live in the
//! `tideline-wire`, `tideline-authority` and `tideline-client` crates.

#![deny(unsafe_code)]

pub mod config;

pub use config::{ActorConfig, ConfigError, ProjectileConfig, SimConfig};

// ============================================================================
// Type Aliases
// ============================================================================

/// A single discrete simulation timestep; the correlation key between
/// predicted and authoritative state.
pub type Tick = u64;

/// Unique identifier for a replicated entity.
pub type EntityId = u64;

/// Identifier of a participant (the authority or a client).
pub type ParticipantId = u8;

/// Plain 2-D vector `[x, y]`.
pub type Vec2 = [f64; 2];

/// The zero vector.
pub const ZERO: Vec2 = [0.0, 0.0];

// ============================================================================
// Core Types
// ============================================================================

/// One tick's driving input, tagged with the tick it was captured for.
///
/// For an actor `vector` is a movement direction with magnitude <= 1.0.
/// A projectile has no external input; its driving input is its own velocity
/// at the start of the step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrivingInput {
    pub tick: Tick,
    pub vector: Vec2,
}

impl DrivingInput {
    pub fn new(tick: Tick, vector: Vec2) -> Self {
        Self { tick, vector }
    }
}

/// Per-entity simulated state. Immutable once produced for a tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EntityState {
    pub position: Vec2,
    /// Actor: `input * velocity_scale` of the last applied step.
    /// Projectile: current velocity.
    pub velocity: Vec2,
}

impl EntityState {
    /// State at `position` with zero velocity.
    pub fn at_rest(position: Vec2) -> Self {
        Self {
            position,
            velocity: ZERO,
        }
    }

    pub fn moving(position: Vec2, velocity: Vec2) -> Self {
        Self { position, velocity }
    }
}

/// One step of History: the input consumed at `tick` and the state it produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickRecord {
    pub tick: Tick,
    pub input: Vec2,
    pub state: EntityState,
}

/// The latest `(tick, state)` published by the Authoritative Track.
///
/// `input` is the driving input the authority consumed to produce `state`,
/// so observers predicting a ghost can reuse it as an intent estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AuthoritativeSnapshot {
    pub tick: Tick,
    pub state: EntityState,
    pub input: Vec2,
}

impl AuthoritativeSnapshot {
    /// Snapshot describing a freshly spawned entity (no input consumed yet).
    pub fn spawned(tick: Tick, state: EntityState) -> Self {
        Self {
            tick,
            state,
            input: ZERO,
        }
    }
}

// ============================================================================
// Arena & Bodies
// ============================================================================

/// Symmetric rectangular bound centred on the origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Arena {
    pub half_extent: Vec2,
}

impl Arena {
    pub fn new(half_extent: Vec2) -> Self {
        Self { half_extent }
    }

    /// Largest coordinate a body of `radius` may occupy on `axis`.
    ///
    /// Never negative: a body that does not fit is pinned to the centre line.
    pub fn limit(&self, axis: usize, radius: f64) -> f64 {
        (self.half_extent[axis] - radius).max(0.0)
    }

    /// True if a body of `radius` fits strictly inside on both axes.
    pub fn fits(&self, radius: f64) -> bool {
        radius >= 0.0 && radius < self.half_extent[0] && radius < self.half_extent[1]
    }
}

/// Which bound policy an entity follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// Input-driven; hard clamp at the arena edge.
    Actor,
    /// Free-running; elastic reflection at the arena edge.
    Projectile,
}

/// Static per-entity physical parameters, fixed at spawn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Body {
    pub kind: EntityKind,
    pub radius: f64,
    /// Units per second at full input. Unused by projectiles.
    pub velocity_scale: f64,
}

impl Body {
    pub fn actor(velocity_scale: f64, radius: f64) -> Self {
        Self {
            kind: EntityKind::Actor,
            radius,
            velocity_scale,
        }
    }

    pub fn projectile(radius: f64) -> Self {
        Self {
            kind: EntityKind::Projectile,
            radius,
            velocity_scale: 0.0,
        }
    }

    /// Resolve the driving input for the next step.
    ///
    /// Actors normalise the captured vector to at most unit length.
    /// Projectiles ignore `captured` and drive themselves with their velocity.
    pub fn driving_input(&self, state: &EntityState, captured: Vec2) -> Vec2 {
        match self.kind {
            EntityKind::Actor => clamp_magnitude(captured, 1.0),
            EntityKind::Projectile => state.velocity,
        }
    }
}

/// Simulation context required to step any entity.
///
/// While a participant has no context (arena not configured yet), per-tick
/// stepping is skipped and entities freeze.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimContext {
    pub arena: Arena,
    tick_rate_hz: u32,
    dt_seconds: f64,
}

impl SimContext {
    pub fn new(arena: Arena, tick_rate_hz: u32) -> Result<Self, ConfigError> {
        if tick_rate_hz == 0 {
            return Err(ConfigError::ZeroTickRate);
        }
        let half_extent = arena.half_extent;
        if !is_finite(half_extent) {
            return Err(ConfigError::NonFinite {
                field: "arena_half_extent",
            });
        }
        if half_extent[0] <= 0.0 || half_extent[1] <= 0.0 {
            return Err(ConfigError::NonPositiveExtent { half_extent });
        }
        Ok(Self {
            arena,
            tick_rate_hz,
            dt_seconds: 1.0 / f64::from(tick_rate_hz),
        })
    }

    pub fn tick_rate_hz(&self) -> u32 {
        self.tick_rate_hz
    }

    /// Seconds per tick.
    pub fn dt(&self) -> f64 {
        self.dt_seconds
    }
}

// ============================================================================
// State Transition Function
// ============================================================================

/// Advance `state` by one tick using `input`.
///
/// Pure: identical arguments always yield a bit-identical result, which is
/// what makes replay during reconciliation reproduce the authority.
pub fn step(body: &Body, ctx: &SimContext, state: &EntityState, input: Vec2) -> EntityState {
    match body.kind {
        EntityKind::Actor => step_clamped(body, ctx, state, input),
        EntityKind::Projectile => step_reflected(body, ctx, state, input),
    }
}

/// Actor movement: integrate then truncate each axis into the arena.
fn step_clamped(body: &Body, ctx: &SimContext, state: &EntityState, input: Vec2) -> EntityState {
    let dir = clamp_magnitude(input, 1.0);
    let velocity = [dir[0] * body.velocity_scale, dir[1] * body.velocity_scale];

    let mut position = [
        state.position[0] + velocity[0] * ctx.dt(),
        state.position[1] + velocity[1] * ctx.dt(),
    ];
    for (axis, coord) in position.iter_mut().enumerate() {
        let limit = ctx.arena.limit(axis, body.radius);
        *coord = coord.clamp(-limit, limit);
    }

    EntityState { position, velocity }
}

/// Projectile movement: integrate with `velocity`, then reflect per axis.
///
/// The bound check uses the integrated (pre-truncation) position; there is no
/// continuous collision, so a body fast enough to cross the whole arena in one
/// tick tunnels.
fn step_reflected(
    body: &Body,
    ctx: &SimContext,
    state: &EntityState,
    velocity: Vec2,
) -> EntityState {
    let mut position = [
        state.position[0] + velocity[0] * ctx.dt(),
        state.position[1] + velocity[1] * ctx.dt(),
    ];
    let mut velocity = velocity;

    for axis in 0..2 {
        let limit = ctx.arena.limit(axis, body.radius);
        if position[axis] > limit {
            position[axis] = limit;
            velocity[axis] = -velocity[axis];
        } else if position[axis] < -limit {
            position[axis] = -limit;
            velocity[axis] = -velocity[axis];
        }
    }

    EntityState { position, velocity }
}

// ============================================================================
// Vector helpers
// ============================================================================

/// Clamp a 2D vector's magnitude to a maximum value.
pub fn clamp_magnitude(v: Vec2, max_magnitude: f64) -> Vec2 {
    let magnitude_sq = v[0] * v[0] + v[1] * v[1];
    let max_sq = max_magnitude * max_magnitude;
    if magnitude_sq <= max_sq {
        v
    } else {
        let magnitude = magnitude_sq.sqrt();
        let scale = max_magnitude / magnitude;
        [v[0] * scale, v[1] * scale]
    }
}

/// Euclidean distance between two points.
pub fn distance(a: Vec2, b: Vec2) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    (dx * dx + dy * dy).sqrt()
}

/// True if both components are finite.
pub fn is_finite(v: Vec2) -> bool {
    v[0].is_finite() && v[1].is_finite()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(half_extent: Vec2, tick_rate_hz: u32) -> SimContext {
        SimContext::new(Arena::new(half_extent), tick_rate_hz).unwrap()
    }

    #[test]
    fn test_actor_step_scenario() {
        // velocity scale 5, input (1,0), dt = 0.02
        let ctx = ctx([10.0, 10.0], 50);
        let body = Body::actor(5.0, 0.5);

        let next = step(&body, &ctx, &EntityState::at_rest(ZERO), [1.0, 0.0]);

        assert_eq!(next.position, [0.1, 0.0]);
        assert_eq!(next.velocity, [5.0, 0.0]);
    }

    #[test]
    fn test_step_is_deterministic() {
        let ctx = ctx([10.0, 10.0], 60);
        let actor = Body::actor(5.0, 0.5);
        let projectile = Body::projectile(0.5);
        let s = EntityState::moving([1.25, -3.5], [7.0, -2.0]);

        let a1 = step(&actor, &ctx, &s, [0.6, 0.8]);
        let a2 = step(&actor, &ctx, &s, [0.6, 0.8]);
        assert_eq!(a1.position[0].to_bits(), a2.position[0].to_bits());
        assert_eq!(a1.position[1].to_bits(), a2.position[1].to_bits());

        let p1 = step(&projectile, &ctx, &s, s.velocity);
        let p2 = step(&projectile, &ctx, &s, s.velocity);
        assert_eq!(p1, p2);
    }

    #[test]
    fn test_actor_clamps_at_negative_bound() {
        let ctx = ctx([10.0, 10.0], 60);
        let body = Body::actor(5.0, 0.5);
        // x - radius < -half_extent after the step
        let s = EntityState::at_rest([-9.45, 0.0]);

        let next = step(&body, &ctx, &s, [-1.0, 0.0]);

        assert_eq!(next.position[0], -10.0 + 0.5);
        assert_eq!(next.position[1], 0.0);
        // No bounce for actors
        assert_eq!(next.velocity, [-5.0, 0.0]);
    }

    #[test]
    fn test_actor_clamp_holds_against_wall() {
        let ctx = ctx([10.0, 10.0], 60);
        let body = Body::actor(5.0, 0.5);
        let mut s = EntityState::at_rest([9.5, 9.5]);

        for _ in 0..20 {
            s = step(&body, &ctx, &s, [0.70710678, 0.70710678]);
            assert!(s.position[0] <= 9.5);
            assert!(s.position[1] <= 9.5);
        }
        assert_eq!(s.position, [9.5, 9.5]);
    }

    #[test]
    fn test_actor_oversized_input_clamped() {
        let ctx = ctx([10.0, 10.0], 50);
        let body = Body::actor(5.0, 0.5);

        let next = step(&body, &ctx, &EntityState::default(), [3.0, 0.0]);

        assert_eq!(next.position, [0.1, 0.0]);
    }

    #[test]
    fn test_projectile_reflects_scenario() {
        let ctx = ctx([10.0, 10.0], 60);
        let body = Body::projectile(0.5);
        let s = EntityState::moving([9.5, 0.0], [5.0, 0.0]);

        let next = step(&body, &ctx, &s, s.velocity);

        assert_eq!(next.position, [9.5, 0.0]);
        assert_eq!(next.velocity, [-5.0, 0.0]);
    }

    #[test]
    fn test_projectile_reflects_on_y_axis_only() {
        let ctx = ctx([10.0, 10.0], 60);
        let body = Body::projectile(0.5);
        let s = EntityState::moving([0.0, 9.4], [1.0, 12.0]);

        let next = step(&body, &ctx, &s, s.velocity);

        assert_eq!(next.position[1], 10.0 - 0.5);
        assert_eq!(next.velocity, [1.0, -12.0]);
        assert_eq!(next.position[0], 1.0 / 60.0);
    }

    #[test]
    fn test_projectile_free_flight() {
        let ctx = ctx([10.0, 10.0], 50);
        let body = Body::projectile(0.5);
        let s = EntityState::moving([0.0, 0.0], [5.0, -5.0]);

        let next = step(&body, &ctx, &s, s.velocity);

        assert_eq!(next.position, [0.1, -0.1]);
        assert_eq!(next.velocity, [5.0, -5.0]);
    }

    #[test]
    fn test_projectile_driving_input_is_velocity() {
        let body = Body::projectile(0.5);
        let s = EntityState::moving([0.0, 0.0], [3.0, 4.0]);
        assert_eq!(body.driving_input(&s, [1.0, 0.0]), [3.0, 4.0]);

        let actor = Body::actor(5.0, 0.5);
        let v = actor.driving_input(&s, [2.0, 0.0]);
        assert!((v[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_tick_rate_rejected() {
        let result = SimContext::new(Arena::new([1.0, 1.0]), 0);
        assert!(matches!(result, Err(ConfigError::ZeroTickRate)));
    }

    #[test]
    fn test_context_rejects_bad_extents() {
        let nan = SimContext::new(Arena::new([f64::NAN, 1.0]), 60);
        assert_eq!(
            nan,
            Err(ConfigError::NonFinite {
                field: "arena_half_extent"
            })
        );

        let flat = SimContext::new(Arena::new([1.0, 0.0]), 60);
        assert!(matches!(flat, Err(ConfigError::NonPositiveExtent { .. })));
    }

    #[test]
    fn test_oversized_body_pinned_not_panicking() {
        let ctx = ctx([1.0, 1.0], 60);
        let s = EntityState::moving([0.5, -0.5], [3.0, 3.0]);

        let actor = step(&Body::actor(5.0, 2.0), &ctx, &s, [1.0, 0.0]);
        assert_eq!(actor.position, [0.0, 0.0]);

        let projectile = step(&Body::projectile(f64::NAN), &ctx, &s, s.velocity);
        assert_eq!(projectile.position, [0.0, 0.0]);
        assert!(!ctx.arena.fits(2.0));
        assert!(!ctx.arena.fits(f64::NAN));
        assert!(ctx.arena.fits(0.5));
    }

    #[test]
    fn test_movement_clamp_magnitude() {
        let v = clamp_magnitude([2.0, 0.0], 1.0);
        assert!((v[0] - 1.0).abs() < 1e-10);
        assert!((v[1] - 0.0).abs() < 1e-10);

        let v2 = clamp_magnitude([0.5, 0.5], 1.0);
        assert_eq!(v2, [0.5, 0.5]);

        let v3 = clamp_magnitude([0.0, 0.0], 1.0);
        assert_eq!(v3, [0.0, 0.0]);
    }

    #[test]
    fn test_distance() {
        assert_eq!(distance([0.0, 0.0], [3.0, 4.0]), 5.0);
        assert!(is_finite([1.0, 2.0]));
        assert!(!is_finite([f64::NAN, 2.0]));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn coord() -> impl Strategy<Value = f64> {
            -20.0..20.0f64
        }

        fn radius() -> impl Strategy<Value = f64> {
            0.0..4.0f64
        }

        proptest! {
            #[test]
            fn test_actor_never_leaves_clamp_interval(
                x in coord(),
                y in coord(),
                ix in -1.5..1.5f64,
                iy in -1.5..1.5f64,
                r in radius(),
            ) {
                let ctx = ctx([5.0, 5.0], 60);
                let body = Body::actor(5.0, r);

                let next = step(&body, &ctx, &EntityState::at_rest([x, y]), [ix, iy]);

                for axis in 0..2 {
                    let limit = ctx.arena.limit(axis, r);
                    prop_assert!(next.position[axis] >= -limit);
                    prop_assert!(next.position[axis] <= limit);
                }
                // Crossing the lower bound lands exactly on it
                let unclamped = x + clamp_magnitude([ix, iy], 1.0)[0] * 5.0 * ctx.dt();
                if unclamped < -ctx.arena.limit(0, r) {
                    prop_assert_eq!(next.position[0], -ctx.arena.limit(0, r));
                }
            }

            #[test]
            fn test_projectile_reflects_on_crossing(
                x in -4.0..4.0f64,
                y in -4.0..4.0f64,
                vx in -30.0..30.0f64,
                vy in -30.0..30.0f64,
                r in 0.0..0.9f64,
            ) {
                let ctx = ctx([5.0, 5.0], 60);
                let body = Body::projectile(r);
                let s = EntityState::moving([x, y], [vx, vy]);

                let next = step(&body, &ctx, &s, s.velocity);

                for (axis, v) in [vx, vy].into_iter().enumerate() {
                    let limit = ctx.arena.limit(axis, r);
                    let integrated = s.position[axis] + v * ctx.dt();
                    prop_assert!(next.position[axis].abs() <= limit);
                    if integrated > limit {
                        prop_assert_eq!(next.position[axis], limit);
                        prop_assert_eq!(next.velocity[axis], -v);
                    } else if integrated < -limit {
                        prop_assert_eq!(next.position[axis], -limit);
                        prop_assert_eq!(next.velocity[axis], -v);
                    } else {
                        prop_assert_eq!(next.velocity[axis], v);
                    }
                }
            }

            #[test]
            fn test_step_bit_identical_on_repeat(
                x in coord(),
                y in coord(),
                vx in -30.0..30.0f64,
                vy in -30.0..30.0f64,
                projectile in any::<bool>(),
            ) {
                let ctx = ctx([10.0, 10.0], 60);
                let body = if projectile { Body::projectile(0.5) } else { Body::actor(5.0, 0.5) };
                let s = EntityState::moving([x, y], [vx, vy]);

                let a = step(&body, &ctx, &s, [vx, vy]);
                let b = step(&body, &ctx, &s, [vx, vy]);

                for axis in 0..2 {
                    prop_assert_eq!(a.position[axis].to_bits(), b.position[axis].to_bits());
                    prop_assert_eq!(a.velocity[axis].to_bits(), b.velocity[axis].to_bits());
                }
            }
        }
    }
}
