//! Headless particle pool runner.
//!
//! Builds one particle system, runs it for a number of rate-driven ticks and
//! reports what the pool looks like. With the gpu backend it can also render
//! a single offscreen frame to a PNG.

mod frame;

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ember::{
    BackendKind, ComputeBackend, EmberConfig, HostBackend, ParticleSystem, ProgramSet, RunConfig,
    SpawnParams, TickOutcome, WgpuBackend,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Run a GPU particle pool without a window", long_about = None)]
struct Args {
    /// TOML config file with [pool], [spawn] and [run] tables
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of ticks to simulate
    #[arg(long)]
    ticks: Option<u32>,

    /// Seconds per tick
    #[arg(long)]
    dt: Option<f32>,

    /// Compute device to run on
    #[arg(long, value_enum)]
    backend: Option<BackendKind>,

    /// Spawn preset: clouds, stars or snow
    #[arg(long)]
    preset: Option<String>,

    /// Write one rendered frame to this PNG (gpu backend only)
    #[arg(long)]
    frame: Option<PathBuf>,

    /// Image applied to every particle
    #[arg(long)]
    texture: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = resolve_config(&args)?;
    info!(
        capacity = config.pool.capacity,
        workgroup_size = config.pool.workgroup_size,
        backend = ?config.run.backend,
        ticks = config.run.ticks,
        "starting ember v{}",
        env!("CARGO_PKG_VERSION")
    );

    match config.run.backend {
        BackendKind::Host => run_host(&config),
        BackendKind::Gpu => run_gpu(&config),
    }
}

/// Config file first, then command-line overrides.
fn resolve_config(args: &Args) -> Result<EmberConfig> {
    let mut config = match &args.config {
        Some(path) => EmberConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => EmberConfig::default(),
    };

    if let Some(name) = &args.preset {
        config.spawn = SpawnParams::preset(name)
            .ok_or_else(|| anyhow!("unknown preset '{name}' (expected clouds, stars or snow)"))?;
    }
    if let Some(ticks) = args.ticks {
        config.run.ticks = ticks;
    }
    if let Some(dt) = args.dt {
        config.run.dt = dt;
    }
    if let Some(backend) = args.backend {
        config.run.backend = backend;
    }
    if args.frame.is_some() {
        config.run.frame = args.frame.clone();
    }
    if args.texture.is_some() {
        config.run.texture = args.texture.clone();
    }
    Ok(config)
}

fn build_system<B: ComputeBackend>(backend: &mut B, config: &EmberConfig) -> Result<ParticleSystem> {
    let programs = ProgramSet::load(backend, config.pool.workgroup_size)
        .context("failed to load particle programs")?;
    let mut system = ParticleSystem::new(backend, config.pool)
        .context("failed to create particle system")?
        .with_properties(config.spawn.clone());
    system.set_programs(programs)?;

    if let Some(texture) = &config.run.texture {
        // Failure is logged by the system; the run continues untextured.
        system.load_texture(texture);
    }
    Ok(system)
}

fn simulate<B: ComputeBackend>(backend: &mut B, system: &mut ParticleSystem, run: &RunConfig) {
    let mut spawned: u64 = 0;
    for tick in 1..=run.ticks {
        if let TickOutcome::Completed { spawn_count, .. } = system.update(backend, run.dt, None) {
            spawned += spawn_count as u64;
        }
        if run.report_every > 0 && tick % run.report_every == 0 {
            if let Some(alive) = system.alive_count(backend) {
                info!(tick, alive, spawned, "pool status");
            }
        }
    }
    system.debug(backend);
}

fn run_host(config: &EmberConfig) -> Result<()> {
    let mut host = HostBackend::new();
    let mut system = build_system(&mut host, config)?;
    simulate(&mut host, &mut system, &config.run);

    let stats = host.stats();
    info!(
        dispatches = stats.dispatches,
        barriers = stats.barriers,
        submits = stats.submits,
        hazards = stats.hazards,
        "host device finished"
    );
    if config.run.frame.is_some() {
        warn!("frame output needs the gpu backend, nothing written");
    }
    Ok(())
}

fn run_gpu(config: &EmberConfig) -> Result<()> {
    let mut gpu = WgpuBackend::new().context("failed to open GPU device")?;
    let mut system = build_system(&mut gpu, config)?;
    simulate(&mut gpu, &mut system, &config.run);

    if let Some(path) = &config.run.frame {
        frame::render_to_png(&gpu, &system, path)
            .with_context(|| format!("failed to write frame to {}", path.display()))?;
        info!(path = %path.display(), "frame written");
    }
    Ok(())
}
