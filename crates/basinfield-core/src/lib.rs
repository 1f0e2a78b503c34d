//! Core types and the simulation facade for the basinfield workspace.
//!
//! A [`Simulation`] evolves a scalar field on a toroidal grid under five
//! local and global operators. Each tick it derives diagnostics, relabels
//! basins, classifies the regime, and keeps a bounded history of snapshots.

pub mod basins;
pub mod derived;
pub mod determinism;
pub mod diagnostics;
pub mod driver;
pub mod field;
pub mod history;
pub mod operators;
pub mod params;
pub mod perturbation;
pub mod regime;
pub mod transition;

use rand::{SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

pub use basins::{BasinDetector, BasinMap};
pub use derived::{DerivedField, DerivedFieldKind, ProbeData};
pub use determinism::{
    DeterminismChecker, DeterminismReport, ReplayAction, ReplayLog, ReplayRecord, verify_replay,
};
pub use diagnostics::{
    DiagnosticsRecorder, FrameHash, InternalsData, SolverData, Stability, StabilityThresholds,
    StructuralEvent, StructuralEventKind, frame_hash,
};
pub use driver::{FramePlan, TickDriver};
pub use field::{FieldData, FieldState, Step};
pub use history::{HistoryBuffer, HistoryEntry, HistoryError};
pub use operators::{OperatorContributions, OperatorEngine};
pub use params::{ParameterPatch, Preset, SimulationParameters};
pub use perturbation::{PerturbationMode, VortexDirection};
pub use regime::{RegimeKey, RegimeMetrics};
pub use transition::{ParameterTransition, TransitionState};

/// Separates the perturbation stream from the initial-noise stream of the same seed.
const PERTURBATION_STREAM: u64 = 0x9E37_79B9_7F4A_7C15;

/// Errors raised by the simulation core.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SimulationError {
    /// A parameter outside anything the simulation can work with.
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
    /// The requested grid would exceed the allocation limit.
    #[error("grid size {requested} exceeds the maximum of {max}")]
    GridTooLarge { requested: usize, max: usize },
    /// A probe outside the grid.
    #[error("coordinate ({x}, {y}) is outside the {width}x{height} grid")]
    OutOfRange {
        x: i64,
        y: i64,
        width: usize,
        height: usize,
    },
    #[error(transparent)]
    History(#[from] HistoryError),
}

/// Summary of the simulation after the most recent tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SimulationState {
    pub step: Step,
    pub energy: f64,
    pub variance: f64,
    pub basin_count: usize,
    pub regime: RegimeKey,
    pub stability: Stability,
    pub is_running: bool,
    pub fps: f64,
}

/// Owns the field and every analysis component; one instance per session.
pub struct Simulation {
    params: SimulationParameters,
    field: FieldState,
    engine: OperatorEngine,
    detector: BasinDetector,
    recorder: DiagnosticsRecorder,
    checker: DeterminismChecker,
    history: HistoryBuffer,
    rng: SmallRng,
    basins: BasinMap,
    regime: RegimeKey,
    stability: Stability,
    contributions: OperatorContributions,
    solver: SolverData,
    internals: InternalsData,
    structure_seen: Option<(usize, RegimeKey)>,
    replay: ReplayLog,
    determinism_interval: u64,
    last_determinism: Option<DeterminismReport>,
    is_running: bool,
    fps: f64,
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("params", &self.params)
            .field("step", &self.field.step())
            .field("regime", &self.regime)
            .field("basins", &self.basins.count())
            .field("history", &self.history.len())
            .finish()
    }
}

impl Simulation {
    /// Build a fresh session. Grid size is validated before anything is allocated.
    pub fn new(params: SimulationParameters) -> Result<Self, SimulationError> {
        let size = params.validate_grid()?;
        let params = params.clamped();
        let mut noise_rng = SmallRng::seed_from_u64(params.seed);
        let field = FieldState::seeded(
            size,
            params.initial_value,
            params.initial_noise,
            &mut noise_rng,
        )?;

        let detector = BasinDetector::new();
        let mut recorder = DiagnosticsRecorder::new(StabilityThresholds::default());
        let report = recorder.record(None, field.data(), &params, field.step());
        let basins = detector.label(field.data());
        let regime = regime::classify(&RegimeMetrics {
            variance: report.solver.variance,
            variance_rate: report.solver.variance_rate,
            energy_delta: report.solver.energy_delta,
            curvature_mean_abs: report.internals.curvature.mean_abs,
            gradient_mean: report.internals.gradient.mean,
            basin_count: basins.count(),
        });

        let mut history = HistoryBuffer::default();
        history.push(HistoryEntry {
            step: field.step(),
            field: field.snapshot(),
            metrics: report.solver,
            frame_hash: report.internals.frame_hash,
        });

        info!(
            grid = size,
            seed = params.seed,
            basins = basins.count(),
            "simulation initialised"
        );

        Ok(Self {
            params,
            field,
            engine: OperatorEngine::new(),
            detector,
            recorder,
            checker: DeterminismChecker::new(),
            history,
            rng: SmallRng::seed_from_u64(params.seed ^ PERTURBATION_STREAM),
            basins,
            regime,
            stability: report.stability,
            contributions: OperatorContributions::default(),
            solver: report.solver,
            internals: report.internals,
            structure_seen: None,
            replay: ReplayLog::new(params),
            determinism_interval: 0,
            last_determinism: None,
            is_running: false,
            fps: 0.0,
        })
    }

    /// Discard the session and start over. On error nothing changes.
    pub fn reset(&mut self, params: SimulationParameters) -> Result<(), SimulationError> {
        let mut fresh = Self::new(params)?;
        fresh.determinism_interval = self.determinism_interval;
        fresh.is_running = self.is_running;
        fresh.fps = self.fps;
        *self = fresh;
        Ok(())
    }

    /// Advance the field by one tick and refresh every derived structure.
    pub fn step(&mut self) -> SimulationState {
        let input = self.field.snapshot();
        let output = self.engine.step(&input, &self.params);
        let next = self.field.step().next();
        let check = (self.determinism_interval > 0
            && next.0.is_multiple_of(self.determinism_interval))
        .then(|| self.checker.check(&input, &self.params, &output.field));

        self.field.commit(output.field);
        self.contributions = output.contributions;
        let step = self.field.step();

        let report = self
            .recorder
            .record(Some(&self.solver), self.field.data(), &self.params, step);
        self.basins = self.detector.label(self.field.data());
        let regime = regime::classify(&RegimeMetrics {
            variance: report.solver.variance,
            variance_rate: report.solver.variance_rate,
            energy_delta: report.solver.energy_delta,
            curvature_mean_abs: report.internals.curvature.mean_abs,
            gradient_mean: report.internals.gradient.mean,
            basin_count: self.basins.count(),
        });
        let structural = self.recorder.observe_structure(
            step,
            self.structure_seen.map(|(count, _)| count),
            self.basins.count(),
            self.structure_seen.map(|(_, regime)| regime),
            regime,
        );
        self.structure_seen = Some((self.basins.count(), regime));
        self.regime = regime;
        self.stability = report.stability;

        if let Some(result) = check {
            if !result.is_deterministic {
                self.recorder
                    .record_divergence(step, result.diverging_cell_count);
            }
            self.last_determinism = Some(result);
        }

        self.history.push(HistoryEntry {
            step,
            field: self.field.snapshot(),
            metrics: report.solver,
            frame_hash: report.internals.frame_hash,
        });
        self.solver = report.solver;
        self.internals = report.internals;

        for event in report.events.iter().chain(&structural) {
            debug!(step = step.0, kind = ?event.kind, "{}", event.description);
        }
        debug!(
            step = step.0,
            energy = self.solver.energy,
            variance = self.solver.variance,
            basins = self.basins.count(),
            regime = %self.regime,
            stability = ?self.stability,
            hash = %self.internals.frame_hash,
            "tick"
        );
        self.state()
    }

    /// Snapshot stored at history `index`, clamped into the retained range.
    #[must_use]
    pub fn seek(&self, index: usize) -> Option<Arc<FieldData>> {
        self.history.seek(index).map(|entry| Arc::clone(&entry.field))
    }

    /// Inspect one cell of the live field.
    pub fn probe(&self, x: i64, y: i64) -> Result<ProbeData, SimulationError> {
        let out_of_range = SimulationError::OutOfRange {
            x,
            y,
            width: self.field.data().width(),
            height: self.field.data().height(),
        };
        let (Ok(ux), Ok(uy)) = (usize::try_from(x), usize::try_from(y)) else {
            return Err(out_of_range);
        };
        derived::probe(self.field.data(), &self.params, Some(&self.basins), ux, uy)
    }

    /// Disturb the live field around `(x, y)`; coordinates wrap.
    pub fn apply_perturbation(&mut self, mode: &PerturbationMode, x: i64, y: i64) {
        let step = self.field.step();
        perturbation::apply(self.field.data_mut(), x, y, mode, &mut self.rng);
        self.basins = self.detector.label(self.field.data());
        self.replay.push(
            step,
            ReplayAction::Perturb {
                x,
                y,
                mode: *mode,
            },
        );
        debug!(step = step.0, mode = mode.name(), x, y, "perturbation applied");
    }

    #[must_use]
    pub fn derived_field(&self, kind: DerivedFieldKind) -> DerivedField {
        derived::derive(self.field.data(), &self.params, kind)
    }

    /// Merge a partial update; every value is clamped and takes effect next tick.
    ///
    /// A new `grid_size` is remembered but only applied by [`Simulation::reset`].
    pub fn update_parameters(&mut self, patch: &ParameterPatch) {
        self.params = self.params.merged(patch);
        self.replay.push(
            self.field.step(),
            ReplayAction::UpdateParameters {
                patch: patch.clone(),
            },
        );
        debug!(step = self.field.step().0, "parameters updated");
    }

    /// Replace every parameter at once, e.g. with a frame of a transition.
    pub fn set_parameters(&mut self, params: SimulationParameters) {
        self.update_parameters(&ParameterPatch::from(params));
    }

    pub fn apply_preset(&mut self, preset: Preset) {
        info!(preset = preset.name(), "applying preset");
        self.update_parameters(&preset.patch());
    }

    /// Replay this session from its log and compare against the live field.
    pub fn verify_replay(&self) -> Result<DeterminismReport, SimulationError> {
        determinism::verify_replay(
            &self.replay,
            self.field.step().0,
            frame_hash(self.field.data()),
        )
    }

    #[must_use]
    pub fn state(&self) -> SimulationState {
        SimulationState {
            step: self.field.step(),
            energy: self.solver.energy,
            variance: self.solver.variance,
            basin_count: self.basins.count(),
            regime: self.regime,
            stability: self.stability,
            is_running: self.is_running,
            fps: self.fps,
        }
    }

    #[must_use]
    pub const fn params(&self) -> &SimulationParameters {
        &self.params
    }

    #[must_use]
    pub const fn step_count(&self) -> Step {
        self.field.step()
    }

    #[must_use]
    pub fn field(&self) -> &FieldData {
        self.field.data()
    }

    #[must_use]
    pub fn field_snapshot(&self) -> Arc<FieldData> {
        self.field.snapshot()
    }

    #[must_use]
    pub const fn basins(&self) -> &BasinMap {
        &self.basins
    }

    #[must_use]
    pub const fn regime(&self) -> RegimeKey {
        self.regime
    }

    #[must_use]
    pub const fn stability(&self) -> Stability {
        self.stability
    }

    /// Operator shares from the most recent tick.
    #[must_use]
    pub const fn contributions(&self) -> &OperatorContributions {
        &self.contributions
    }

    #[must_use]
    pub const fn metrics(&self) -> &SolverData {
        &self.solver
    }

    #[must_use]
    pub const fn internals(&self) -> &InternalsData {
        &self.internals
    }

    #[must_use]
    pub fn events(&self) -> &[StructuralEvent] {
        self.recorder.events()
    }

    #[must_use]
    pub const fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    pub fn hash_history(&self) -> impl Iterator<Item = &(Step, FrameHash)> {
        self.recorder.hash_history()
    }

    #[must_use]
    pub const fn replay_log(&self) -> &ReplayLog {
        &self.replay
    }

    #[must_use]
    pub const fn last_determinism(&self) -> Option<&DeterminismReport> {
        self.last_determinism.as_ref()
    }

    /// Run the shadow-step check every `interval` ticks; 0 disables it.
    pub fn set_determinism_interval(&mut self, interval: u64) {
        self.determinism_interval = interval;
    }

    pub fn set_running(&mut self, running: bool) {
        self.is_running = running;
    }

    pub fn set_fps(&mut self, fps: f64) {
        self.fps = if fps.is_finite() { fps.max(0.0) } else { 0.0 };
    }
}
