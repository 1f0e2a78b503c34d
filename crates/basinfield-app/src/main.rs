use std::path::PathBuf;

use anyhow::{Context, Result};
use basinfield_app::{PerturbationRequest, RunConfig, load_patch, run_headless};
use basinfield_core::{ParameterPatch, Preset, SimulationParameters};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "basinfield",
    version,
    about = "Run the basinfield scalar-field simulation headlessly"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the simulation and print a JSON summary of the final state.
    Run(RunArgs),
    /// List the named parameter presets as JSON.
    Presets,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Number of ticks to simulate.
    #[arg(long, default_value_t = 200)]
    ticks: u64,
    /// Grid edge length in cells.
    #[arg(long, env = "BASINFIELD_GRID_SIZE")]
    grid_size: Option<usize>,
    /// Seed for initial noise and stochastic perturbations.
    #[arg(long, env = "BASINFIELD_SEED")]
    seed: Option<u64>,
    /// Amplitude of the seeded initial noise.
    #[arg(long)]
    noise: Option<f64>,
    /// JSON file holding a partial parameter update applied before the run.
    #[arg(short, long)]
    patch: Option<PathBuf>,
    /// Preset to tween towards during the run.
    #[arg(long)]
    preset: Option<String>,
    /// Frames over which the preset transition runs.
    #[arg(long, default_value_t = 30)]
    transition_frames: u32,
    /// Perturbation to apply, written mode@x,y or mode@x,y:step. Repeatable.
    #[arg(long = "perturb")]
    perturbations: Vec<PerturbationRequest>,
    /// Target frame rate of the driver loop, above 0 and at most 1000.
    #[arg(long, default_value_t = 60.0)]
    target_fps: f64,
    /// Upper bound on ticks run per frame before backlog is dropped.
    #[arg(long, default_value_t = 4)]
    max_ticks_per_frame: usize,
    /// Run the shadow-step determinism check every N ticks (0 disables).
    #[arg(long, default_value_t = 0)]
    determinism_interval: u64,
    /// Replay the session from its log afterwards and compare frame hashes.
    #[arg(long)]
    verify_replay: bool,
    /// Pace frames against the wall clock.
    #[arg(long)]
    realtime: bool,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run_command(args)?,
        Command::Presets => presets_command()?,
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}

fn run_command(args: RunArgs) -> Result<()> {
    let mut params = SimulationParameters::default();
    if let Some(path) = &args.patch {
        params = params.merged(&load_patch(path)?);
    }
    let overrides = ParameterPatch {
        grid_size: args.grid_size,
        seed: args.seed,
        initial_noise: args.noise,
        ..ParameterPatch::default()
    };
    params = params.merged(&overrides);
    // Out-of-range sizes are reported by the simulation instead of clamped.
    if let Some(size) = args.grid_size {
        params.grid_size = size;
    }

    let preset = args
        .preset
        .as_deref()
        .map(|name| {
            Preset::from_name(name).with_context(|| format!("unknown preset `{name}`"))
        })
        .transpose()?;

    let config = RunConfig {
        params,
        ticks: args.ticks,
        target_fps: args.target_fps,
        max_ticks_per_frame: args.max_ticks_per_frame,
        preset,
        transition_frames: args.transition_frames,
        perturbations: args.perturbations,
        determinism_interval: args.determinism_interval,
        verify_replay: args.verify_replay,
        realtime: args.realtime,
    };
    info!(ticks = config.ticks, grid = config.params.grid_size, "starting headless run");
    let summary = run_headless(&config)?;
    let pretty =
        serde_json::to_string_pretty(&summary).context("failed to format run summary JSON")?;
    println!("{pretty}");
    Ok(())
}

fn presets_command() -> Result<()> {
    let presets: Vec<_> = Preset::ALL
        .iter()
        .map(|preset| json!({ "name": preset.name(), "patch": preset.patch() }))
        .collect();
    let pretty =
        serde_json::to_string_pretty(&presets).context("failed to format presets JSON")?;
    println!("{pretty}");
    Ok(())
}
