//! Tideline Harness
//!
//! Headless end-to-end run of one authority and several clients joined by
//! simulated links. Every client owns one actor, sees the other actors as
//! ghosts and observes a shared projectile. Inputs and snapshots cross the
//! links as encoded bytes.
//!
//! A run ends with a settle phase of idle input so that every prediction can
//! be checked against the authority.

#![deny(unsafe_code)]

pub mod link;

use std::collections::BTreeMap;
use std::f64::consts::TAU;

use anyhow::{Context, Result, ensure};
use prost::Message;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use serde::{Deserialize, Serialize};
use tideline_authority::session::SessionId;
use tideline_authority::{Authority, AuthorityConfig};
use tideline_client::prediction::fast_forward;
use tideline_client::{
    ClientEntity, EntityRole, ManualTickSource, ReconcileStats, ReconcilerConfig,
};
use tideline_sim::{
    Body, EntityId, EntityState, ParticipantId, SimConfig, SimContext, Tick, Vec2, ZERO, distance,
};
use tideline_wire::SnapshotProto;
use tracing::{debug, info, warn};

use link::{Link, LinkConfig, LinkStats};

// ============================================================================
// Configuration
// ============================================================================

/// Full harness configuration, loadable from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub sim: SimConfig,
    pub authority: AuthorityConfig,
    pub reconciler: ReconcilerConfig,
    /// Applied to every uplink and downlink.
    pub link: LinkConfig,
    pub clients: usize,
    /// Ticks with scripted input.
    pub ticks: Tick,
    /// Idle ticks appended so in-flight traffic drains.
    pub settle_ticks: Tick,
    /// Ticks each scripted input direction is held.
    pub input_hold_ticks: Tick,
    pub seed: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            sim: SimConfig::default(),
            authority: AuthorityConfig::default(),
            reconciler: ReconcilerConfig::default(),
            link: LinkConfig::default(),
            clients: 2,
            ticks: 600,
            settle_ticks: 120,
            input_hold_ticks: 15,
            seed: 0x7146_e11e,
        }
    }
}

impl HarnessConfig {
    pub fn validate(&self) -> Result<()> {
        self.sim.validate()?;
        ensure!(self.clients > 0, "at least one client is required");
        ensure!(self.input_hold_ticks > 0, "input_hold_ticks must be positive");
        ensure!(
            (0.0..=1.0).contains(&self.link.duplicate_rate),
            "duplicate_rate {} is outside [0, 1]",
            self.link.duplicate_rate
        );
        Ok(())
    }
}

// ============================================================================
// Report
// ============================================================================

/// Final state of one client-side entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityReport {
    pub participant_id: ParticipantId,
    pub entity_id: EntityId,
    pub role: String,
    pub stats: ReconcileStats,
    /// Distance between the prediction and the authority at the same tick.
    pub final_error: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScenarioReport {
    pub ticks: Tick,
    pub inputs_accepted: u64,
    pub inputs_dropped: u64,
    pub snapshots_undecodable: u64,
    pub uplink: LinkStats,
    pub downlink: LinkStats,
    pub entities: Vec<EntityReport>,
}

impl ScenarioReport {
    pub fn max_final_error(&self) -> f64 {
        self.entities
            .iter()
            .map(|e| e.final_error)
            .fold(0.0, f64::max)
    }

    pub fn converged(&self, tolerance: f64) -> bool {
        self.max_final_error() <= tolerance
    }

    pub fn total_corrections(&self) -> u64 {
        self.entities.iter().map(|e| e.stats.diverged).sum()
    }
}

// ============================================================================
// Scenario
// ============================================================================

struct Client {
    participant_id: ParticipantId,
    session_id: SessionId,
    owned: EntityId,
    clock: ManualTickSource,
    entities: BTreeMap<EntityId, ClientEntity>,
    uplink: Link,
    downlink: Link,
    input: Vec2,
}

/// One authority, its clients and the links between them.
pub struct Scenario {
    config: HarnessConfig,
    ctx: SimContext,
    authority: Authority,
    clients: Vec<Client>,
    projectile_id: EntityId,
    /// Authoritative projectile states by tick.
    trajectory: BTreeMap<Tick, EntityState>,
    rng: Pcg32,
    tick: Tick,
    inputs_accepted: u64,
    inputs_dropped: u64,
    snapshots_undecodable: u64,
}

impl Scenario {
    pub fn new(config: HarnessConfig) -> Result<Self> {
        config.validate()?;
        let ctx = config.sim.context()?;
        let mut authority = Authority::new(config.authority.clone(), Some(ctx));

        let mut sessions = Vec::with_capacity(config.clients);
        for _ in 0..config.clients {
            let (session_id, participant_id) = authority.accept_session()?;
            let actor = authority.spawn_actor(
                session_id,
                config.sim.actor_body(),
                config.sim.actor_initial_state(),
            )?;
            sessions.push((session_id, participant_id, actor));
        }
        let projectile_id = authority.spawn_projectile(
            config.sim.projectile_body(),
            config.sim.projectile_initial_state(),
        )?;

        let actors: Vec<EntityId> = sessions.iter().map(|&(_, _, actor)| actor).collect();
        let mut clients = Vec::with_capacity(config.clients);
        for (index, &(session_id, participant_id, owned)) in sessions.iter().enumerate() {
            let mut entities = BTreeMap::new();
            for &actor in &actors {
                let role = if actor == owned {
                    EntityRole::Owner
                } else {
                    EntityRole::Ghost
                };
                let body = config.sim.actor_body();
                let entity = spawn_entity(&authority, actor, role, body, &ctx, &config)?;
                entities.insert(actor, entity);
            }
            let projectile = spawn_entity(
                &authority,
                projectile_id,
                EntityRole::ProjectileObserver,
                config.sim.projectile_body(),
                &ctx,
                &config,
            )?;
            entities.insert(projectile_id, projectile);

            let link_seed = config.seed ^ ((index as u64 + 1) << 32);
            clients.push(Client {
                participant_id,
                session_id,
                owned,
                clock: ManualTickSource::new(ctx.tick_rate_hz())
                    .with_rtt(config.link.round_trip(ctx.tick_rate_hz())),
                entities,
                uplink: Link::new(config.link, link_seed),
                downlink: Link::new(config.link, link_seed ^ 1),
                input: ZERO,
            });
        }

        info!(
            clients = clients.len(),
            projectile_id,
            tick_rate_hz = ctx.tick_rate_hz(),
            "scenario ready"
        );

        let rng = Pcg32::seed_from_u64(config.seed);
        Ok(Self {
            config,
            ctx,
            authority,
            clients,
            projectile_id,
            trajectory: BTreeMap::new(),
            rng,
            tick: 0,
            inputs_accepted: 0,
            inputs_dropped: 0,
            snapshots_undecodable: 0,
        })
    }

    pub fn current_tick(&self) -> Tick {
        self.tick
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Client-side view of `entity_id` held by the client at `index`.
    pub fn client_entity(&self, index: usize, entity_id: EntityId) -> Option<&ClientEntity> {
        self.clients.get(index)?.entities.get(&entity_id)
    }

    /// Entity owned by the client at `index`.
    pub fn owned_entity(&self, index: usize) -> Option<EntityId> {
        self.clients.get(index).map(|c| c.owned)
    }

    pub fn projectile_id(&self) -> EntityId {
        self.projectile_id
    }

    /// Run one tick. With `scripted` false every client sends idle input.
    ///
    /// Order within a tick: clients receive snapshots, clients predict and
    /// send input, the authority receives input, the authority steps and
    /// sends snapshots.
    pub fn step(&mut self, scripted: bool) -> Result<()> {
        self.tick += 1;
        let tick = self.tick;
        let change_input = scripted && (tick - 1) % self.config.input_hold_ticks == 0;

        for client in &mut self.clients {
            client.clock.set_tick(tick);
            for bytes in client.downlink.deliver(tick) {
                match SnapshotProto::from_bytes(&bytes).and_then(SnapshotProto::into_parts) {
                    Ok((entity_id, snapshot)) => {
                        if let Some(entity) = client.entities.get_mut(&entity_id) {
                            entity.on_authoritative(snapshot)?;
                        }
                    }
                    Err(e) => {
                        warn!(
                            participant_id = client.participant_id,
                            error = %e,
                            "undecodable snapshot"
                        );
                        self.snapshots_undecodable += 1;
                    }
                }
            }

            if !scripted {
                client.input = ZERO;
            } else if change_input {
                client.input = random_direction(&mut self.rng);
            }
            for entity in client.entities.values_mut() {
                entity.on_tick(&client.clock, client.input)?;
                for cmd in entity.take_input_commands() {
                    client.uplink.send(tick, cmd.encode_to_vec());
                }
            }
        }

        for client in &mut self.clients {
            for bytes in client.uplink.deliver(tick) {
                let result = self.authority.receive_input(client.session_id, &bytes);
                if result.is_accepted() {
                    self.inputs_accepted += 1;
                } else {
                    self.inputs_dropped += 1;
                }
            }
        }

        let report = self.authority.step();
        for &(entity_id, snapshot) in &report.published {
            if entity_id == self.projectile_id {
                self.trajectory.insert(snapshot.tick, snapshot.state);
            }
        }
        let encoded = report.encode();
        for client in &mut self.clients {
            for bytes in &encoded {
                client.downlink.send(tick, bytes.clone());
            }
        }

        Ok(())
    }

    /// Run the scripted ticks then the settle phase.
    pub fn run(&mut self) -> Result<ScenarioReport> {
        for _ in 0..self.config.ticks {
            self.step(true)?;
        }
        debug!(tick = self.tick, "scripted input finished, settling");
        for _ in 0..self.config.settle_ticks {
            self.step(false)?;
        }
        self.report()
    }

    /// Compare every client prediction with the authority.
    pub fn report(&self) -> Result<ScenarioReport> {
        let mut report = ScenarioReport {
            ticks: self.tick,
            inputs_accepted: self.inputs_accepted,
            inputs_dropped: self.inputs_dropped,
            snapshots_undecodable: self.snapshots_undecodable,
            ..Default::default()
        };

        for client in &self.clients {
            accumulate(&mut report.uplink, client.uplink.stats());
            accumulate(&mut report.downlink, client.downlink.stats());
            for (&entity_id, entity) in &client.entities {
                let reference = self.reference_state(entity)?;
                report.entities.push(EntityReport {
                    participant_id: client.participant_id,
                    entity_id,
                    role: format!("{:?}", entity.role()),
                    stats: *entity.stats(),
                    final_error: distance(entity.predicted_position(), reference.position),
                });
            }
        }
        Ok(report)
    }

    /// Authoritative state at the tick the client entity has predicted up to.
    ///
    /// Actors are idle once settled, so their current authoritative state is
    /// the reference. Projectiles are deterministic and are looked up in the
    /// recorded trajectory, or extrapolated past its end.
    fn reference_state(&self, entity: &ClientEntity) -> Result<EntityState> {
        let latest = self
            .authority
            .snapshot(entity.entity_id())
            .with_context(|| format!("entity {} missing at authority", entity.entity_id()))?;
        if entity.role() != EntityRole::ProjectileObserver {
            return Ok(latest.state);
        }

        let tick = entity.track().tick().unwrap_or(latest.tick);
        if let Some(state) = self.trajectory.get(&tick) {
            return Ok(*state);
        }
        let ahead = tick.saturating_sub(latest.tick);
        Ok(fast_forward(entity.body(), &self.ctx, latest.tick, latest.state, ahead)
            .last()
            .map_or(latest.state, |r| r.state))
    }
}

/// Build and run a scenario.
pub fn run_scenario(config: HarnessConfig) -> Result<ScenarioReport> {
    Scenario::new(config)?.run()
}

fn spawn_entity(
    authority: &Authority,
    entity_id: EntityId,
    role: EntityRole,
    body: Body,
    ctx: &SimContext,
    config: &HarnessConfig,
) -> Result<ClientEntity> {
    let initial = authority
        .snapshot(entity_id)
        .with_context(|| format!("entity {entity_id} was not spawned"))?;
    Ok(ClientEntity::spawn(
        entity_id,
        role,
        body,
        initial,
        Some(*ctx),
        &config.reconciler,
    ))
}

/// Unit direction at a random angle, or idle one time in five.
fn random_direction(rng: &mut Pcg32) -> Vec2 {
    if rng.random_bool(0.2) {
        return ZERO;
    }
    let angle = rng.random_range(0.0..TAU);
    [angle.cos(), angle.sin()]
}

fn accumulate(total: &mut LinkStats, stats: LinkStats) {
    total.sent += stats.sent;
    total.delivered += stats.delivered;
    total.duplicated += stats.duplicated;
}
