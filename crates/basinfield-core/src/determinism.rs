//! Shadow-step and full-replay verification of deterministic evolution.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::diagnostics::{FrameHash, frame_hash};
use crate::field::{FieldData, Step};
use crate::operators::OperatorEngine;
use crate::params::{ParameterPatch, SimulationParameters};
use crate::perturbation::PerturbationMode;
use crate::{Simulation, SimulationError};

/// Cells differing by more than this count as diverged.
pub const DIVERGENCE_TOLERANCE: f64 = 1e-9;

/// Outcome of comparing a committed field against an independent recomputation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeterminismReport {
    pub is_deterministic: bool,
    pub expected_hash: FrameHash,
    pub actual_hash: FrameHash,
    /// Only computed when the hashes disagree.
    pub diverging_cell_count: Option<usize>,
}

fn cells_match(a: f64, b: f64) -> bool {
    (a.is_nan() && b.is_nan()) || a == b || (a - b).abs() <= DIVERGENCE_TOLERANCE
}

/// Count cells that differ beyond tolerance; a shape mismatch counts every cell.
#[must_use]
pub fn diverging_cells(expected: &FieldData, actual: &FieldData) -> usize {
    if expected.width() != actual.width() || expected.height() != actual.height() {
        return expected.len().max(actual.len());
    }
    expected
        .cells()
        .iter()
        .zip(actual.cells())
        .filter(|(a, b)| !cells_match(**a, **b))
        .count()
}

fn compare(expected: &FieldData, actual: &FieldData) -> DeterminismReport {
    let expected_hash = frame_hash(expected);
    let actual_hash = frame_hash(actual);
    if expected_hash == actual_hash {
        return DeterminismReport {
            is_deterministic: true,
            expected_hash,
            actual_hash,
            diverging_cell_count: None,
        };
    }
    let count = diverging_cells(expected, actual);
    warn!(
        expected = %expected_hash,
        actual = %actual_hash,
        diverging = count,
        "determinism check failed"
    );
    DeterminismReport {
        is_deterministic: false,
        expected_hash,
        actual_hash,
        diverging_cell_count: Some(count),
    }
}

/// Re-runs the operator step on the same input and compares with what was committed.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeterminismChecker {
    engine: OperatorEngine,
}

impl DeterminismChecker {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            engine: OperatorEngine::new(),
        }
    }

    #[must_use]
    pub fn check(
        &self,
        input: &FieldData,
        params: &SimulationParameters,
        committed: &FieldData,
    ) -> DeterminismReport {
        let shadow = self.engine.step(input, params);
        compare(&shadow.field, committed)
    }
}

/// An out-of-band action applied between ticks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReplayAction {
    Perturb {
        x: i64,
        y: i64,
        mode: PerturbationMode,
    },
    UpdateParameters {
        patch: ParameterPatch,
    },
}

/// Action applied when the simulation stood at `step`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplayRecord {
    pub step: Step,
    pub action: ReplayAction,
}

/// Starting parameters plus every out-of-band action since the last reset.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReplayLog {
    pub params: SimulationParameters,
    pub records: Vec<ReplayRecord>,
}

impl ReplayLog {
    #[must_use]
    pub fn new(params: SimulationParameters) -> Self {
        Self {
            params,
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, step: Step, action: ReplayAction) {
        self.records.push(ReplayRecord { step, action });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Rebuild a session from `log`, run it to `steps`, and compare its final frame hash.
pub fn verify_replay(
    log: &ReplayLog,
    steps: u64,
    expected: FrameHash,
) -> Result<DeterminismReport, SimulationError> {
    let mut sim = Simulation::new(log.params)?;
    let mut pending = log.records.iter().peekable();
    loop {
        let now = sim.step_count();
        while let Some(record) = pending.next_if(|r| r.step <= now) {
            match &record.action {
                ReplayAction::Perturb { x, y, mode } => sim.apply_perturbation(mode, *x, *y),
                ReplayAction::UpdateParameters { patch } => sim.update_parameters(patch),
            }
        }
        if now.0 >= steps {
            break;
        }
        sim.step();
    }
    let actual_hash = frame_hash(sim.field());
    let is_deterministic = actual_hash == expected;
    if !is_deterministic {
        warn!(%expected, actual = %actual_hash, steps, "replay diverged");
    }
    Ok(DeterminismReport {
        is_deterministic,
        expected_hash: expected,
        actual_hash,
        diverging_cell_count: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bump() -> FieldData {
        let mut field = FieldData::new(16, 16, 0.0).expect("field");
        *field.get_mut(8, 8).expect("cell") = 1.0;
        field
    }

    #[test]
    fn identical_recomputation_passes() {
        let params = SimulationParameters::default();
        let input = bump();
        let committed = OperatorEngine::new().step(&input, &params).field;
        let report = DeterminismChecker::new().check(&input, &params, &committed);
        assert!(report.is_deterministic);
        assert_eq!(report.expected_hash, report.actual_hash);
        assert_eq!(report.diverging_cell_count, None);
    }

    #[test]
    fn tampered_commit_is_reported() {
        let params = SimulationParameters::default();
        let input = bump();
        let mut committed = OperatorEngine::new().step(&input, &params).field;
        *committed.get_mut(0, 0).expect("cell") += 0.5;
        *committed.get_mut(1, 0).expect("cell") += 1e-12;
        let report = DeterminismChecker::new().check(&input, &params, &committed);
        assert!(!report.is_deterministic);
        assert_eq!(report.diverging_cell_count, Some(1));
    }

    #[test]
    fn nan_cells_compare_equal() {
        let mut a = bump();
        *a.get_mut(2, 2).expect("cell") = f64::NAN;
        let b = a.clone();
        assert_eq!(diverging_cells(&a, &b), 0);
    }
}
