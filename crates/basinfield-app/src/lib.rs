//! Headless host plumbing for the basinfield simulation: run configuration,
//! perturbation requests and the frame-paced driver loop.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use basinfield_core::{
    DeterminismReport, OperatorContributions, ParameterPatch, ParameterTransition,
    PerturbationMode, Preset, Simulation, SimulationParameters, SimulationState, TickDriver,
    VortexDirection,
};
use basinfield_core::driver::MAX_TARGET_FPS;
use serde::Serialize;
use tracing::{info, warn};

/// Read a JSON [`ParameterPatch`] from disk.
pub fn load_patch(path: &Path) -> Result<ParameterPatch> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read patch file {}", path.display()))?;
    serde_json::from_str(&data)
        .with_context(|| format!("patch file {} is not a valid parameter patch", path.display()))
}

/// A perturbation mode with representative parameters, looked up by name.
#[must_use]
pub fn mode_by_name(name: &str) -> Option<PerturbationMode> {
    let mode = match name {
        "impulse" => PerturbationMode::default(),
        "shear" => PerturbationMode::Shear {
            magnitude: 1.0,
            angle: 0.0,
            duration: 5.0,
        },
        "wave" => PerturbationMode::Wave {
            amplitude: 0.5,
            frequency: 1.0,
            wavelength: 12.0,
            damping: 0.05,
        },
        "vortex" => PerturbationMode::Vortex {
            angular_velocity: 1.0,
            radius: 15.0,
            direction: VortexDirection::Ccw,
        },
        "fracture" => PerturbationMode::Fracture {
            strength: 0.8,
            noise: 0.3,
            propagation_rate: 0.5,
        },
        "drift" => PerturbationMode::Drift {
            magnitude: 2.0,
            vector_x: 1.0,
            vector_y: 0.0,
            duration: 10.0,
        },
        _ => return None,
    };
    Some(mode)
}

/// A perturbation scheduled for a given step, written `mode@x,y` or `mode@x,y:step`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerturbationRequest {
    pub mode: PerturbationMode,
    pub x: i64,
    pub y: i64,
    pub at_step: u64,
}

impl FromStr for PerturbationRequest {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let Some((name, rest)) = s.split_once('@') else {
            bail!("perturbation `{s}` must look like mode@x,y[:step]");
        };
        let mode = mode_by_name(name.trim())
            .with_context(|| format!("unknown perturbation mode `{}`", name.trim()))?;
        let (coords, at_step) = match rest.split_once(':') {
            Some((coords, step)) => (
                coords,
                step.trim()
                    .parse::<u64>()
                    .with_context(|| format!("invalid step in `{s}`"))?,
            ),
            None => (rest, 0),
        };
        let Some((x, y)) = coords.split_once(',') else {
            bail!("perturbation `{s}` is missing a y coordinate");
        };
        Ok(Self {
            mode,
            x: x.trim()
                .parse()
                .with_context(|| format!("invalid x coordinate in `{s}`"))?,
            y: y.trim()
                .parse()
                .with_context(|| format!("invalid y coordinate in `{s}`"))?,
            at_step,
        })
    }
}

/// Everything a headless run needs.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub params: SimulationParameters,
    pub ticks: u64,
    pub target_fps: f64,
    pub max_ticks_per_frame: usize,
    pub preset: Option<Preset>,
    pub transition_frames: u32,
    pub perturbations: Vec<PerturbationRequest>,
    pub determinism_interval: u64,
    pub verify_replay: bool,
    /// Sleep to hold the target frame rate instead of using a simulated clock.
    pub realtime: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            params: SimulationParameters::default(),
            ticks: 200,
            target_fps: 60.0,
            max_ticks_per_frame: basinfield_core::driver::MAX_TICKS_PER_FRAME,
            preset: None,
            transition_frames: 30,
            perturbations: Vec::new(),
            determinism_interval: 0,
            verify_replay: false,
            realtime: false,
        }
    }
}

/// Final report printed by the binary.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub state: SimulationState,
    pub params: SimulationParameters,
    pub frame_hash: String,
    pub frames: u64,
    pub skipped_ticks: u64,
    pub contributions: OperatorContributions,
    pub event_counts: BTreeMap<String, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub determinism: Option<DeterminismReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replay: Option<DeterminismReport>,
}

/// Drive a simulation for `config.ticks` ticks through the frame-paced driver.
pub fn run_headless(config: &RunConfig) -> Result<RunSummary> {
    if !(config.target_fps.is_finite()
        && config.target_fps > 0.0
        && config.target_fps <= MAX_TARGET_FPS)
    {
        bail!(
            "target fps {} must be above 0 and at most {MAX_TARGET_FPS}",
            config.target_fps
        );
    }
    let mut sim = Simulation::new(config.params).context("failed to build simulation")?;
    sim.set_determinism_interval(config.determinism_interval);
    sim.set_running(true);

    let mut transition = ParameterTransition::new();
    if let Some(preset) = config.preset {
        let target = sim.params().merged(&preset.patch());
        transition.start(*sim.params(), target, config.transition_frames);
        info!(
            preset = preset.name(),
            frames = config.transition_frames,
            "preset transition started"
        );
    }

    let mut pending = config.perturbations.clone();
    pending.sort_by_key(|request| request.at_step);
    let mut pending = pending.into_iter().peekable();

    let mut driver = TickDriver::new(config.target_fps, config.max_ticks_per_frame);
    let frame = Duration::from_secs_f64(driver.tick_interval());
    let mut elapsed = frame;
    let mut frames = 0u64;

    while sim.step_count().0 < config.ticks {
        let started = Instant::now();
        let plan = driver.plan(elapsed);
        if let Some(params) = transition.advance() {
            sim.set_parameters(params);
        }
        for _ in 0..plan.ticks {
            let now = sim.step_count();
            if now.0 >= config.ticks {
                break;
            }
            while let Some(request) = pending.next_if(|r| r.at_step <= now.0) {
                sim.apply_perturbation(&request.mode, request.x, request.y);
            }
            sim.step();
        }
        sim.set_fps(driver.fps());
        frames += 1;

        if config.realtime {
            let spent = started.elapsed();
            if let Some(rest) = frame.checked_sub(spent) {
                std::thread::sleep(rest);
            }
            elapsed = started.elapsed();
        }
    }
    sim.set_running(false);

    let unapplied = pending.count();
    if unapplied > 0 {
        warn!(
            unapplied,
            ticks = config.ticks,
            "perturbations scheduled past the final tick were skipped"
        );
    }

    let replay = if config.verify_replay {
        Some(sim.verify_replay().context("replay verification failed to run")?)
    } else {
        None
    };

    let mut event_counts = BTreeMap::new();
    for event in sim.events() {
        let key = serde_json::to_value(event.kind)
            .ok()
            .and_then(|value| value.as_str().map(str::to_owned))
            .unwrap_or_else(|| format!("{:?}", event.kind));
        *event_counts.entry(key).or_insert(0) += 1;
    }

    let summary = RunSummary {
        state: sim.state(),
        params: *sim.params(),
        frame_hash: sim.internals().frame_hash.to_string(),
        frames,
        skipped_ticks: driver.total_skipped(),
        contributions: *sim.contributions(),
        event_counts,
        determinism: sim.last_determinism().copied(),
        replay,
    };
    info!(
        step = summary.state.step.0,
        regime = %summary.state.regime,
        basins = summary.state.basin_count,
        hash = %summary.frame_hash,
        "run complete"
    );
    Ok(summary)
}
