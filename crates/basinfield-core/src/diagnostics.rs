//! Per-tick metrics, frame hashes, stability classification and structural events.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tracing::warn;

use crate::field::{FieldData, Step};
use crate::operators::{gradient, laplacian};
use crate::params::SimulationParameters;
use crate::regime::RegimeKey;

/// Number of recent frame hashes retained by the recorder.
pub const HASH_HISTORY_CAPACITY: usize = 20;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
const HASH_QUANTUM: f64 = 1e9;

/// Compact deterministic fingerprint of a field snapshot.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct FrameHash(pub u64);

impl fmt::Display for FrameHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[inline]
fn fnv1a(mut hash: u64, bytes: &[u8]) -> u64 {
    for &byte in bytes {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[inline]
fn quantize(value: f64) -> i64 {
    if value.is_nan() {
        i64::MIN
    } else if value == f64::INFINITY {
        i64::MAX
    } else if value == f64::NEG_INFINITY {
        i64::MIN + 1
    } else {
        (value * HASH_QUANTUM).round() as i64
    }
}

/// FNV-1a over the dimensions and the quantized cells of `field`.
#[must_use]
pub fn frame_hash(field: &FieldData) -> FrameHash {
    let mut hash = FNV_OFFSET_BASIS;
    hash = fnv1a(hash, &(field.width() as u64).to_le_bytes());
    hash = fnv1a(hash, &(field.height() as u64).to_le_bytes());
    for &value in field.cells() {
        hash = fnv1a(hash, &quantize(value).to_le_bytes());
    }
    FrameHash(hash)
}

/// Min, mean, max and mean magnitude of a sample.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Stats {
    pub min: f64,
    pub mean: f64,
    pub max: f64,
    pub mean_abs: f64,
}

impl Stats {
    fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let min = values.iter().copied().map(OrderedFloat).min().map_or(0.0, |v| v.0);
        let max = values.iter().copied().map(OrderedFloat).max().map_or(0.0, |v| v.0);
        let n = values.len() as f64;
        Self {
            min,
            mean: values.iter().sum::<f64>() / n,
            max,
            mean_abs: values.iter().map(|v| v.abs()).sum::<f64>() / n,
        }
    }
}

/// Global integrals of the field and their change since the previous tick.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct SolverData {
    pub step: Step,
    pub energy: f64,
    pub energy_delta: f64,
    /// `|energy_delta|` per cell.
    pub energy_drift: f64,
    pub mean: f64,
    pub variance: f64,
    /// `(variance - previous variance) / dt`.
    pub variance_rate: f64,
}

/// Local structure statistics for one tick.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct InternalsData {
    pub curvature: Stats,
    pub gradient: Stats,
    pub non_finite_cells: usize,
    pub frame_hash: FrameHash,
    /// Cell with the largest curvature magnitude.
    pub curvature_peak: Option<(usize, usize)>,
}

/// Outcome of the three stability threshold tests.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Stability {
    #[default]
    Stable,
    Borderline,
    Unstable,
}

/// Hard limits for the stability tests; borderline sits at `borderline_fraction` of each.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct StabilityThresholds {
    /// Limit on `|ΔE|` between consecutive ticks.
    pub energy_delta: f64,
    pub variance_rate: f64,
    pub curvature_mean: f64,
    pub borderline_fraction: f64,
}

impl Default for StabilityThresholds {
    fn default() -> Self {
        Self {
            energy_delta: 0.02,
            variance_rate: 0.05,
            curvature_mean: 0.5,
            borderline_fraction: 0.60,
        }
    }
}

/// The three metrics the stability tests look at.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct StabilityInputs {
    pub energy_delta: f64,
    pub variance_rate: f64,
    pub curvature_mean: f64,
}

impl StabilityInputs {
    fn magnitudes(&self) -> [f64; 3] {
        [
            self.energy_delta.abs(),
            self.variance_rate.abs(),
            self.curvature_mean.abs(),
        ]
    }
}

impl StabilityThresholds {
    fn hard(&self) -> [f64; 3] {
        [self.energy_delta, self.variance_rate, self.curvature_mean]
    }

    /// Classify `inputs`; any hard breach wins over borderline ones.
    #[must_use]
    pub fn classify(&self, inputs: &StabilityInputs) -> Stability {
        let values = inputs.magnitudes();
        let hard = self.hard();
        if values.iter().zip(hard).any(|(v, limit)| *v > limit) {
            return Stability::Unstable;
        }
        if values
            .iter()
            .zip(hard)
            .any(|(v, limit)| *v > limit * self.borderline_fraction)
        {
            return Stability::Borderline;
        }
        Stability::Stable
    }
}

/// Kind of structural change recorded in the event log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StructuralEventKind {
    BasinMerge,
    BasinSplit,
    CurvatureSpike,
    VarianceInstability,
    PhaseTransition,
    NumericalAnomaly,
    DeterminismDivergence,
}

/// Append-only log entry describing a threshold crossing or structural change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StructuralEvent {
    pub id: u64,
    pub step: Step,
    pub kind: StructuralEventKind,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<(usize, usize)>,
}

/// Everything the recorder derives from one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticsReport {
    pub solver: SolverData,
    pub internals: InternalsData,
    pub stability: Stability,
    pub events: Vec<StructuralEvent>,
}

/// Edge-trigger state for one monitored metric.
#[derive(Debug, Clone, Copy, Default)]
struct Latch {
    tripped: bool,
}

impl Latch {
    /// True only on the tick where `breached` first becomes true.
    fn rising(&mut self, breached: bool) -> bool {
        let fire = breached && !self.tripped;
        self.tripped = breached;
        fire
    }
}

/// Computes tick metrics and keeps the event log, hash history and edge latches.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsRecorder {
    thresholds: StabilityThresholds,
    energy_latch: Latch,
    variance_latch: Latch,
    curvature_latch: Latch,
    anomaly_latch: Latch,
    hashes: VecDeque<(Step, FrameHash)>,
    events: Vec<StructuralEvent>,
    next_event_id: u64,
}

impl DiagnosticsRecorder {
    #[must_use]
    pub fn new(thresholds: StabilityThresholds) -> Self {
        Self {
            thresholds,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn thresholds(&self) -> &StabilityThresholds {
        &self.thresholds
    }

    /// Full event log since the last reset.
    #[must_use]
    pub fn events(&self) -> &[StructuralEvent] {
        &self.events
    }

    /// The most recent frame hashes, oldest first.
    pub fn hash_history(&self) -> impl Iterator<Item = &(Step, FrameHash)> {
        self.hashes.iter()
    }

    fn push_event(
        &mut self,
        step: Step,
        kind: StructuralEventKind,
        description: String,
        location: Option<(usize, usize)>,
    ) -> StructuralEvent {
        let event = StructuralEvent {
            id: self.next_event_id,
            step,
            kind,
            description,
            location,
        };
        self.next_event_id += 1;
        self.events.push(event.clone());
        event
    }

    /// Compute metrics for `field` at `step`, comparing against the previous tick.
    pub fn record(
        &mut self,
        prev: Option<&SolverData>,
        field: &FieldData,
        params: &SimulationParameters,
        step: Step,
    ) -> DiagnosticsReport {
        let (width, height) = (field.width(), field.height());
        let mut energy = 0.0;
        let mut sum = 0.0;
        let mut finite = 0usize;
        for &value in field.cells() {
            if value.is_finite() {
                energy += value * value;
                sum += value;
                finite += 1;
            }
        }
        let non_finite_cells = field.len() - finite;
        let mean = if finite > 0 { sum / finite as f64 } else { 0.0 };
        let variance = if finite > 0 {
            field
                .cells()
                .iter()
                .filter(|v| v.is_finite())
                .map(|v| (v - mean) * (v - mean))
                .sum::<f64>()
                / finite as f64
        } else {
            0.0
        };

        let mut curvatures = Vec::with_capacity(finite);
        let mut gradients = Vec::with_capacity(finite);
        let mut curvature_peak = None;
        let mut peak_magnitude = -1.0;
        for y in 0..height {
            for x in 0..width {
                let lap = laplacian(field, x, y);
                let (gx, gy) = gradient(field, x, y);
                let grad = gx.hypot(gy);
                if lap.is_finite() {
                    curvatures.push(lap);
                    if lap.abs() > peak_magnitude {
                        peak_magnitude = lap.abs();
                        curvature_peak = Some((x, y));
                    }
                }
                if grad.is_finite() {
                    gradients.push(grad);
                }
            }
        }

        let (energy_delta, variance_rate) = match prev {
            Some(prev) => (
                energy - prev.energy,
                (variance - prev.variance) / params.dt,
            ),
            None => (0.0, 0.0),
        };
        let solver = SolverData {
            step,
            energy,
            energy_delta,
            energy_drift: energy_delta.abs() / field.len().max(1) as f64,
            mean,
            variance,
            variance_rate,
        };

        let hash = frame_hash(field);
        if self.hashes.len() >= HASH_HISTORY_CAPACITY {
            self.hashes.pop_front();
        }
        self.hashes.push_back((step, hash));

        let internals = InternalsData {
            curvature: Stats::from_values(&curvatures),
            gradient: Stats::from_values(&gradients),
            non_finite_cells,
            frame_hash: hash,
            curvature_peak,
        };

        let inputs = StabilityInputs {
            energy_delta: solver.energy_delta,
            variance_rate: solver.variance_rate,
            curvature_mean: internals.curvature.mean_abs,
        };
        let (stability, mut events) = self.assess(step, &inputs, curvature_peak);

        if self.anomaly_latch.rising(non_finite_cells > 0) {
            warn!(step = step.0, non_finite_cells, "non-finite values in field");
            events.push(self.push_event(
                step,
                StructuralEventKind::NumericalAnomaly,
                format!("{non_finite_cells} non-finite cells"),
                None,
            ));
        }

        DiagnosticsReport {
            solver,
            internals,
            stability,
            events,
        }
    }

    /// Classify stability and emit an event for each metric crossing its hard limit this tick.
    pub fn assess(
        &mut self,
        step: Step,
        inputs: &StabilityInputs,
        location: Option<(usize, usize)>,
    ) -> (Stability, Vec<StructuralEvent>) {
        let thresholds = self.thresholds;
        let stability = thresholds.classify(inputs);
        let mut events = Vec::new();

        if self
            .energy_latch
            .rising(inputs.energy_delta.abs() > thresholds.energy_delta)
        {
            events.push(self.push_event(
                step,
                StructuralEventKind::VarianceInstability,
                format!(
                    "energy change {:.4} exceeded {:.4}",
                    inputs.energy_delta, thresholds.energy_delta
                ),
                None,
            ));
        }
        if self
            .variance_latch
            .rising(inputs.variance_rate.abs() > thresholds.variance_rate)
        {
            events.push(self.push_event(
                step,
                StructuralEventKind::VarianceInstability,
                format!(
                    "variance rate {:.4} exceeded {:.4}",
                    inputs.variance_rate, thresholds.variance_rate
                ),
                None,
            ));
        }
        if self
            .curvature_latch
            .rising(inputs.curvature_mean.abs() > thresholds.curvature_mean)
        {
            events.push(self.push_event(
                step,
                StructuralEventKind::CurvatureSpike,
                format!(
                    "mean curvature {:.4} exceeded {:.4}",
                    inputs.curvature_mean, thresholds.curvature_mean
                ),
                location,
            ));
        }
        (stability, events)
    }

    /// Emit basin merge/split and phase-transition events relative to the previous tick.
    pub fn observe_structure(
        &mut self,
        step: Step,
        prev_basins: Option<usize>,
        basins: usize,
        prev_regime: Option<RegimeKey>,
        regime: RegimeKey,
    ) -> Vec<StructuralEvent> {
        let mut events = Vec::new();
        if let Some(prev) = prev_basins {
            if basins < prev {
                events.push(self.push_event(
                    step,
                    StructuralEventKind::BasinMerge,
                    format!("basins merged: {prev} -> {basins}"),
                    None,
                ));
            } else if basins > prev {
                events.push(self.push_event(
                    step,
                    StructuralEventKind::BasinSplit,
                    format!("basins split: {prev} -> {basins}"),
                    None,
                ));
            }
        }
        if let Some(prev) = prev_regime {
            if prev != regime {
                events.push(self.push_event(
                    step,
                    StructuralEventKind::PhaseTransition,
                    format!("regime {prev} -> {regime}"),
                    None,
                ));
            }
        }
        events
    }

    /// Record a determinism failure reported by the checker.
    pub fn record_divergence(
        &mut self,
        step: Step,
        diverging_cells: Option<usize>,
    ) -> StructuralEvent {
        let description = match diverging_cells {
            Some(count) => format!("shadow step diverged in {count} cells"),
            None => "shadow step hash mismatch".to_string(),
        };
        self.push_event(
            step,
            StructuralEventKind::DeterminismDivergence,
            description,
            None,
        )
    }
}
