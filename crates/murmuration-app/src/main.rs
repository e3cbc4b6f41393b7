//! Headless murmuration runner: steps the flock and logs tick summaries.

mod scene;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use murmuration_core::evasion::{DirectionalSampling, ReverseProbe};
use murmuration_core::{FlockConfig, Simulation};
use murmuration_geom::{BarycentricTest, MollerTrumboreTest, sample_directions};
use rand::{SeedableRng, rngs::SmallRng};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};

/// Command-line options for the headless flock runner.
#[derive(Debug, Parser)]
#[command(version, about = "Headless 3D flocking simulation")]
struct Cli {
    /// Number of agents in the flock.
    #[arg(long, default_value_t = 1024)]
    agents: usize,
    /// Number of ticks to simulate.
    #[arg(long, default_value_t = 600)]
    ticks: u64,
    /// Fixed timestep handed to every tick.
    #[arg(long, default_value_t = 0.01)]
    delta_time: f32,
    /// Radius of the initial spawn sphere.
    #[arg(long, default_value_t = 6.0)]
    spawn_radius: f32,
    /// RNG seed for reproducible runs.
    #[arg(long, env = "MURMURATION_SEED", default_value_t = 0xB01D5)]
    seed: u64,
    /// OBJ file with obstacle geometry; a box room is used when omitted.
    #[arg(long)]
    mesh: Option<PathBuf>,
    /// Half extent of the fallback box room.
    #[arg(long, default_value_t = 12.0)]
    room: f32,
    /// Number of evasion sample directions.
    #[arg(long, default_value_t = 1000)]
    samples: usize,
    /// Obstacle evasion backend.
    #[arg(long, value_enum, default_value_t = EvasionChoice::Sampled)]
    evasion: EvasionChoice,
    /// Segment-triangle intersection strategy.
    #[arg(long, value_enum, default_value_t = IntersectionChoice::Barycentric)]
    intersection: IntersectionChoice,
    /// Ticks between logged summaries; 0 logs only the final one.
    #[arg(long, default_value_t = 60)]
    log_interval: u64,
}

/// Selectable evasion backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EvasionChoice {
    Off,
    Reverse,
    Sampled,
}

/// Selectable intersection strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum IntersectionChoice {
    Barycentric,
    MollerTrumbore,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let mut sim = bootstrap_simulation(&cli)?;
    info!(
        agents = sim.agent_count(),
        triangles = sim.mesh().triangle_count(),
        samples = sim.samples().len(),
        intersection = sim.intersection_kind(),
        evasion = sim.evasion_kind().unwrap_or("off"),
        "murmuration ready"
    );

    let started = Instant::now();
    for _ in 0..cli.ticks {
        let summary = sim.step(cli.delta_time);
        if cli.log_interval > 0 && summary.tick.0.is_multiple_of(cli.log_interval) {
            info!(
                tick = summary.tick.0,
                average_speed = summary.average_speed,
                min_speed = summary.min_speed,
                max_speed = summary.max_speed,
                "tick complete"
            );
        }
    }
    let elapsed = started.elapsed();
    if let Some(summary) = sim.history().last() {
        info!(
            tick = summary.tick.0,
            average_speed = summary.average_speed,
            elapsed_ms = elapsed.as_millis() as u64,
            ticks_per_second = cli.ticks as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
            "run finished"
        );
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn bootstrap_simulation(cli: &Cli) -> Result<Simulation> {
    let config = FlockConfig::default();
    let mesh = match &cli.mesh {
        Some(path) => scene::load_obj_mesh(path)?,
        None => scene::box_room(cli.room),
    };
    if cli.evasion != EvasionChoice::Off && mesh.is_empty() {
        warn!("evasion enabled on an empty mesh; probes will never hit anything");
    }
    let samples = sample_directions(cli.samples);
    let mut rng = SmallRng::seed_from_u64(cli.seed);
    let agents = scene::seed_agents(&mut rng, cli.agents, cli.spawn_radius, &config);

    let mut sim = Simulation::new(config, mesh, samples, agents)?;
    sim.set_intersection_test(match cli.intersection {
        IntersectionChoice::Barycentric => Box::new(BarycentricTest),
        IntersectionChoice::MollerTrumbore => Box::new(MollerTrumboreTest),
    });
    match cli.evasion {
        EvasionChoice::Off => sim.set_evasion(None),
        EvasionChoice::Reverse => sim.set_evasion(Some(Box::new(ReverseProbe))),
        EvasionChoice::Sampled => sim.set_evasion(Some(Box::new(DirectionalSampling))),
    }
    Ok(sim)
}
