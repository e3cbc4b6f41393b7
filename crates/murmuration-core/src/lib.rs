//! Double-buffered flocking kernel: steering, evasion, and tick orchestration.

pub mod evasion;
pub mod math;

use crate::evasion::EvasionBackend;
use glam::{Mat4, Quat, Vec3};
use murmuration_geom::{BarycentricTest, EPSILON, IntersectionTest, TriangleMesh};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;

/// Errors that can occur when constructing a simulation.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Static configuration for a murmuration flock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlockConfig {
    /// Radius within which neighbors contribute cohesion and alignment.
    pub view_radius: f32,
    /// Radius within which neighbors repel with inverse-square falloff.
    pub avoid_radius: f32,
    /// Weight applied to the flock-center steering force.
    pub cohesion_weight: f32,
    /// Weight applied to the velocity-matching steering force.
    pub alignment_weight: f32,
    /// Weight applied to the crowding-repulsion steering force.
    pub separation_weight: f32,
    /// Lower bound of the enforced speed band.
    pub min_speed: f32,
    /// Upper bound of the enforced speed band.
    pub max_speed: f32,
    /// Magnitude cap for any single steering force.
    pub max_steer_force: f32,
    /// Weight applied to the obstacle-evasion steering force.
    pub avoid_collision_weight: f32,
    /// Length of the collision probe cast ahead of each agent.
    pub probe_distance: f32,
    /// Hit distance below which sampled evasion snaps instead of steering.
    pub near_field: f32,
    /// Maximum number of recent tick summaries retained in-memory.
    pub history_capacity: usize,
}

impl Default for FlockConfig {
    fn default() -> Self {
        Self {
            view_radius: 2.5,
            avoid_radius: 0.4,
            cohesion_weight: 3.0,
            alignment_weight: 4.0,
            separation_weight: 4.0,
            min_speed: 3.0,
            max_speed: 5.0,
            max_steer_force: 4.0,
            avoid_collision_weight: 10.0,
            probe_distance: 1.0,
            near_field: 0.25,
            history_capacity: 256,
        }
    }
}

impl FlockConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), SimulationError> {
        let fields = [
            self.view_radius,
            self.avoid_radius,
            self.cohesion_weight,
            self.alignment_weight,
            self.separation_weight,
            self.min_speed,
            self.max_speed,
            self.max_steer_force,
            self.avoid_collision_weight,
            self.probe_distance,
            self.near_field,
        ];
        if fields.iter().any(|value| !value.is_finite()) {
            return Err(SimulationError::InvalidConfig(
                "parameters must be finite",
            ));
        }
        if self.view_radius <= 0.0 || self.avoid_radius <= 0.0 {
            return Err(SimulationError::InvalidConfig("radii must be positive"));
        }
        if self.avoid_radius > self.view_radius {
            return Err(SimulationError::InvalidConfig(
                "avoid_radius cannot exceed view_radius",
            ));
        }
        if self.cohesion_weight < 0.0
            || self.alignment_weight < 0.0
            || self.separation_weight < 0.0
            || self.avoid_collision_weight < 0.0
        {
            return Err(SimulationError::InvalidConfig(
                "steering weights must be non-negative",
            ));
        }
        if self.min_speed < 0.0 || self.max_speed <= 0.0 || self.min_speed > self.max_speed {
            return Err(SimulationError::InvalidConfig(
                "speed band must be non-negative with min <= max",
            ));
        }
        if self.max_steer_force <= 0.0 {
            return Err(SimulationError::InvalidConfig(
                "max_steer_force must be positive",
            ));
        }
        if self.probe_distance <= 0.0 || self.near_field < 0.0 {
            return Err(SimulationError::InvalidConfig(
                "probe_distance must be positive and near_field non-negative",
            ));
        }
        if self.history_capacity == 0 {
            return Err(SimulationError::InvalidConfig(
                "history_capacity must be non-zero",
            ));
        }
        Ok(())
    }
}

/// Position and velocity of one agent, the unit of double-buffered state.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentState {
    pub position: Vec3,
    pub velocity: Vec3,
}

impl AgentState {
    /// Construct a new agent state.
    #[must_use]
    pub const fn new(position: Vec3, velocity: Vec3) -> Self {
        Self { position, velocity }
    }

    /// Shortest-arc rotation carrying the reference forward axis onto the
    /// current heading; identity while the agent rests.
    #[must_use]
    pub fn orientation(&self) -> Quat {
        math::rotation_between(math::REFERENCE_FORWARD, self.velocity)
    }

    /// Model-to-world transform for instanced rendering.
    #[must_use]
    pub fn instance_transform(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.orientation(), self.position)
    }
}

/// Simulation clock counting completed ticks.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Tick zero, before any stepping.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Aggregate speed statistics recorded after each tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickSummary {
    pub tick: Tick,
    pub agent_count: usize,
    pub average_speed: f32,
    pub min_speed: f32,
    pub max_speed: f32,
}

/// Double-buffered agent storage enforcing the read/write split of a tick.
///
/// The front buffer is the published state everyone reads; the back buffer
/// is written slot by slot and becomes the front on [`FlockBuffers::flip`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlockBuffers {
    front: Vec<AgentState>,
    back: Vec<AgentState>,
}

impl FlockBuffers {
    /// Seed both buffers from the initial flock state.
    #[must_use]
    pub fn new(agents: Vec<AgentState>) -> Self {
        let back = agents.clone();
        Self {
            front: agents,
            back,
        }
    }

    /// Number of agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.front.len()
    }

    /// Returns true when the flock is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.front.is_empty()
    }

    /// Published state of the current tick.
    #[must_use]
    pub fn current(&self) -> &[AgentState] {
        &self.front
    }

    /// Read-only current buffer alongside the writable next buffer.
    pub fn split(&mut self) -> (&[AgentState], &mut [AgentState]) {
        (&self.front, &mut self.back)
    }

    /// Publish the back buffer; the old front becomes scratch.
    pub fn flip(&mut self) {
        std::mem::swap(&mut self.front, &mut self.back);
    }
}

/// Shared read-only inputs for one tick's worth of per-agent kernels.
pub struct TickContext<'a> {
    pub config: &'a FlockConfig,
    pub mesh: &'a TriangleMesh,
    pub samples: &'a [Vec3],
    pub intersection: &'a dyn IntersectionTest,
    pub evasion: Option<&'a dyn EvasionBackend>,
    pub delta_time: f32,
}

/// Flocking acceleration for agent `index` from a read-only snapshot.
///
/// One pass accumulates all three rules; an agent with no flockmates in view
/// does not steer at all. Coincident neighbors are skipped by the separation
/// term only, since they offer no away-direction.
#[must_use]
pub fn flock_acceleration(index: usize, agents: &[AgentState], config: &FlockConfig) -> Vec3 {
    let AgentState { position, velocity } = agents[index];
    let view_sq = config.view_radius * config.view_radius;
    let avoid_sq = config.avoid_radius * config.avoid_radius;
    let contact_sq = EPSILON * EPSILON;

    let mut center = Vec3::ZERO;
    let mut alignment = Vec3::ZERO;
    let mut separation = Vec3::ZERO;
    let mut mates = 0u32;
    for (other_index, other) in agents.iter().enumerate() {
        if other_index == index {
            continue;
        }
        let offset = other.position - position;
        let distance_sq = offset.length_squared();
        if distance_sq < view_sq {
            center += other.position;
            alignment += other.velocity;
            mates += 1;
        }
        if distance_sq < avoid_sq && distance_sq > contact_sq {
            separation -= offset / distance_sq;
        }
    }
    if mates == 0 {
        return Vec3::ZERO;
    }
    let center_offset = center / mates as f32 - position;
    config.cohesion_weight * math::steer_towards(center_offset, velocity, config)
        + config.alignment_weight * math::steer_towards(alignment, velocity, config)
        + config.separation_weight * math::steer_towards(separation, velocity, config)
}

/// Rescale `velocity` into the configured speed band.
///
/// An exactly-zero velocity has no direction to scale along and passes
/// through unchanged; the agent rests until something pushes it.
#[must_use]
pub fn clamp_speed(velocity: Vec3, config: &FlockConfig) -> Vec3 {
    let speed = velocity.length();
    if speed == 0.0 {
        return velocity;
    }
    velocity * (speed.clamp(config.min_speed, config.max_speed) / speed)
}

/// Advance one agent by one tick against the pre-tick snapshot.
///
/// This is the whole per-lane kernel: the output depends only on `current`
/// and the shared context, never on another lane's writes.
#[must_use]
pub fn step_agent(index: usize, current: &[AgentState], ctx: &TickContext<'_>) -> AgentState {
    let agent = current[index];
    let acceleration = flock_acceleration(index, current, ctx.config);
    let mut velocity = agent.velocity + acceleration * ctx.delta_time;
    if let Some(evasion) = ctx.evasion {
        velocity = evasion.deflect(agent.position, velocity, ctx);
    }
    let velocity = clamp_speed(velocity, ctx.config);
    AgentState::new(agent.position + velocity * ctx.delta_time, velocity)
}

fn summarize(tick: Tick, agents: &[AgentState]) -> TickSummary {
    let mut total = 0.0_f32;
    let mut slowest = f32::INFINITY;
    let mut fastest = 0.0_f32;
    for agent in agents {
        let speed = agent.velocity.length();
        total += speed;
        slowest = slowest.min(speed);
        fastest = fastest.max(speed);
    }
    let agent_count = agents.len();
    TickSummary {
        tick,
        agent_count,
        average_speed: if agent_count == 0 {
            0.0
        } else {
            total / agent_count as f32
        },
        min_speed: if agent_count == 0 { 0.0 } else { slowest },
        max_speed: fastest,
    }
}

/// Double-buffered flock simulation stepped once per tick.
///
/// Owns the agent buffers, the obstacle mesh, the evasion sample cloud, and
/// the pluggable intersection/evasion strategies. Stepping fans the per-agent
/// kernel out over rayon and flips the buffers, the tick's only serialization
/// point.
pub struct Simulation {
    config: FlockConfig,
    mesh: TriangleMesh,
    samples: Vec<Vec3>,
    intersection: Box<dyn IntersectionTest>,
    evasion: Option<Box<dyn EvasionBackend>>,
    buffers: FlockBuffers,
    tick: Tick,
    history: VecDeque<TickSummary>,
}

impl Simulation {
    /// Build a simulation after validating `config`.
    ///
    /// Starts with the barycentric intersection strategy and no evasion.
    pub fn new(
        config: FlockConfig,
        mesh: TriangleMesh,
        samples: Vec<Vec3>,
        agents: Vec<AgentState>,
    ) -> Result<Self, SimulationError> {
        config.validate()?;
        let history_capacity = config.history_capacity;
        Ok(Self {
            config,
            mesh,
            samples,
            intersection: Box::new(BarycentricTest),
            evasion: None,
            buffers: FlockBuffers::new(agents),
            tick: Tick::zero(),
            history: VecDeque::with_capacity(history_capacity),
        })
    }

    /// Replace the segment-triangle intersection strategy.
    pub fn set_intersection_test(&mut self, intersection: Box<dyn IntersectionTest>) {
        self.intersection = intersection;
    }

    /// Install or remove the evasion backend.
    pub fn set_evasion(&mut self, evasion: Option<Box<dyn EvasionBackend>>) {
        self.evasion = evasion;
    }

    /// Execute one simulation tick and record its summary.
    pub fn step(&mut self, delta_time: f32) -> TickSummary {
        let ctx = TickContext {
            config: &self.config,
            mesh: &self.mesh,
            samples: &self.samples,
            intersection: self.intersection.as_ref(),
            evasion: self.evasion.as_deref(),
            delta_time,
        };
        let (current, next) = self.buffers.split();
        next.par_iter_mut().enumerate().for_each(|(index, slot)| {
            *slot = step_agent(index, current, &ctx);
        });
        self.buffers.flip();
        self.tick = self.tick.next();

        let summary = summarize(self.tick, self.buffers.current());
        if self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(summary.clone());
        summary
    }

    /// Returns an immutable reference to configuration.
    #[must_use]
    pub fn config(&self) -> &FlockConfig {
        &self.config
    }

    /// Current simulation tick.
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// Published state of the flock as of the latest tick.
    #[must_use]
    pub fn agents(&self) -> &[AgentState] {
        self.buffers.current()
    }

    /// Number of agents in the flock.
    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.buffers.len()
    }

    /// Static obstacle geometry.
    #[must_use]
    pub fn mesh(&self) -> &TriangleMesh {
        &self.mesh
    }

    /// Evasion sample directions shared by the flock.
    #[must_use]
    pub fn samples(&self) -> &[Vec3] {
        &self.samples
    }

    /// Identifier of the installed intersection strategy.
    #[must_use]
    pub fn intersection_kind(&self) -> &'static str {
        self.intersection.kind()
    }

    /// Identifier of the installed evasion backend, if any.
    #[must_use]
    pub fn evasion_kind(&self) -> Option<&'static str> {
        self.evasion.as_deref().map(|backend| backend.kind())
    }

    /// Iterate over the retained tick summaries, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &TickSummary> {
        self.history.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paired_agents(gap: f32) -> Vec<AgentState> {
        vec![
            AgentState::new(Vec3::ZERO, Vec3::ZERO),
            AgentState::new(Vec3::X * gap, Vec3::ZERO),
        ]
    }

    #[test]
    fn default_config_validates() {
        FlockConfig::default().validate().expect("default config");
    }

    #[test]
    fn validation_rejects_bad_fields() {
        let zero_view = FlockConfig {
            view_radius: 0.0,
            ..FlockConfig::default()
        };
        assert!(matches!(
            zero_view.validate(),
            Err(SimulationError::InvalidConfig(_))
        ));

        let inverted_radii = FlockConfig {
            avoid_radius: 5.0,
            ..FlockConfig::default()
        };
        assert!(inverted_radii.validate().is_err());

        let inverted_band = FlockConfig {
            min_speed: 6.0,
            ..FlockConfig::default()
        };
        assert!(inverted_band.validate().is_err());

        let poisoned = FlockConfig {
            max_steer_force: f32::NAN,
            ..FlockConfig::default()
        };
        assert!(poisoned.validate().is_err());

        let no_history = FlockConfig {
            history_capacity: 0,
            ..FlockConfig::default()
        };
        assert!(no_history.validate().is_err());
    }

    #[test]
    fn isolated_agents_feel_no_steering() {
        let config = FlockConfig::default();
        let agents = paired_agents(config.view_radius * 10.0);
        assert_eq!(flock_acceleration(0, &agents, &config), Vec3::ZERO);
        assert_eq!(flock_acceleration(1, &agents, &config), Vec3::ZERO);
    }

    #[test]
    fn crowded_pair_pushes_apart() {
        let config = FlockConfig::default();
        let agents = paired_agents(config.avoid_radius * 0.5);
        let left = flock_acceleration(0, &agents, &config);
        let right = flock_acceleration(1, &agents, &config);
        // Separation outweighs cohesion at rest, pushing along the pair axis.
        assert!(left.x < 0.0, "left force {left:?}");
        assert!(right.x > 0.0, "right force {right:?}");
        assert!(
            (left + right).length() < 1e-4,
            "forces mirror: {left:?} vs {right:?}"
        );
    }

    #[test]
    fn coincident_agents_produce_finite_forces() {
        let config = FlockConfig::default();
        let agents = vec![
            AgentState::new(Vec3::ZERO, Vec3::ZERO),
            AgentState::new(Vec3::ZERO, Vec3::ZERO),
        ];
        let force = flock_acceleration(0, &agents, &config);
        assert!(force.is_finite(), "force {force:?}");
    }

    #[test]
    fn clamp_speed_enforces_the_band_and_spares_rest() {
        let config = FlockConfig::default();
        let slow = clamp_speed(Vec3::X * 0.5, &config);
        assert!((slow.length() - config.min_speed).abs() < 1e-5);
        let fast = clamp_speed(Vec3::new(10.0, -10.0, 4.0), &config);
        assert!((fast.length() - config.max_speed).abs() < 1e-4);
        let cruising = Vec3::new(0.0, 4.0, 0.0);
        assert_eq!(clamp_speed(cruising, &config), cruising);
        assert_eq!(clamp_speed(Vec3::ZERO, &config), Vec3::ZERO);
    }

    #[test]
    fn buffers_flip_between_ticks() {
        let mut buffers = FlockBuffers::new(vec![AgentState::new(Vec3::X, Vec3::Y)]);
        {
            let (current, next) = buffers.split();
            assert_eq!(current[0].position, Vec3::X);
            next[0] = AgentState::new(Vec3::Z, Vec3::Y);
        }
        buffers.flip();
        assert_eq!(buffers.current()[0].position, Vec3::Z);
        assert_eq!(buffers.len(), 1);
    }

    #[test]
    fn orientation_tracks_heading() {
        let agent = AgentState::new(Vec3::new(1.0, 2.0, 3.0), Vec3::new(0.0, 0.0, 3.5));
        let image = math::rotate(agent.orientation(), math::REFERENCE_FORWARD);
        assert!(image.abs_diff_eq(Vec3::Z, 1e-4), "image {image:?}");
        let resting = AgentState::new(Vec3::ZERO, Vec3::ZERO);
        assert_eq!(resting.orientation(), Quat::IDENTITY);
        let transform = agent.instance_transform();
        assert!(
            transform
                .transform_point3(Vec3::ZERO)
                .abs_diff_eq(agent.position, 1e-5)
        );
    }

    #[test]
    fn history_is_bounded_by_capacity() {
        let config = FlockConfig {
            history_capacity: 4,
            ..FlockConfig::default()
        };
        let agents = vec![AgentState::new(Vec3::ZERO, Vec3::X * 4.0)];
        let mut sim =
            Simulation::new(config, TriangleMesh::empty(), Vec::new(), agents).expect("simulation");
        for _ in 0..10 {
            sim.step(0.01);
        }
        assert_eq!(sim.history().count(), 4);
        assert_eq!(sim.tick(), Tick(10));
        let last = sim.history().last().expect("summary");
        assert_eq!(last.tick, Tick(10));
        assert_eq!(last.agent_count, 1);
    }

    #[test]
    fn summary_reports_speed_band_stats() {
        let agents = vec![
            AgentState::new(Vec3::ZERO, Vec3::X * 3.0),
            AgentState::new(Vec3::Y * 100.0, Vec3::Y * 5.0),
        ];
        let summary = summarize(Tick(7), &agents);
        assert_eq!(summary.agent_count, 2);
        assert!((summary.average_speed - 4.0).abs() < 1e-5);
        assert!((summary.min_speed - 3.0).abs() < 1e-5);
        assert!((summary.max_speed - 5.0).abs() < 1e-5);
    }

    #[test]
    fn empty_flock_steps_without_panicking() {
        let mut sim = Simulation::new(
            FlockConfig::default(),
            TriangleMesh::empty(),
            Vec::new(),
            Vec::new(),
        )
        .expect("simulation");
        let summary = sim.step(0.01);
        assert_eq!(summary.agent_count, 0);
        assert_eq!(summary.average_speed, 0.0);
        assert_eq!(summary.min_speed, 0.0);
    }
}
