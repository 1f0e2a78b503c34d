//! The five field operators and the explicit integrator that combines them.
//!
//! Every operator reads the pre-step field only, so evaluation order never
//! matters. Rows are evaluated in parallel into a fresh buffer; reductions
//! run sequentially in row order so results stay bitwise reproducible.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::field::FieldData;
use crate::params::SimulationParameters;

const OPERATOR_COUNT: usize = 5;

/// Relative magnitude of each operator for one tick (sums to 1 when any is active).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct OperatorContributions {
    pub curvature: f64,
    pub tension: f64,
    pub coupling: f64,
    pub attractor: f64,
    pub redistribution: f64,
}

impl OperatorContributions {
    fn from_norms(norms: [f64; OPERATOR_COUNT]) -> Self {
        let total: f64 = norms.iter().sum();
        if !(total.is_finite() && total > 0.0) {
            return Self::default();
        }
        let share = |norm: f64| (norm / total).clamp(0.0, 1.0);
        Self {
            curvature: share(norms[0]),
            tension: share(norms[1]),
            coupling: share(norms[2]),
            attractor: share(norms[3]),
            redistribution: share(norms[4]),
        }
    }

    #[must_use]
    pub fn total(&self) -> f64 {
        self.curvature + self.tension + self.coupling + self.attractor + self.redistribution
    }
}

/// Result of integrating one tick.
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub field: FieldData,
    pub contributions: OperatorContributions,
}

/// Five-point Laplacian with toroidal neighbors.
#[inline]
pub(crate) fn laplacian(field: &FieldData, x: usize, y: usize) -> f64 {
    let (x, y) = (x as i64, y as i64);
    let v = field.get_wrapped(x, y);
    field.get_wrapped(x, y - 1)
        + field.get_wrapped(x + 1, y)
        + field.get_wrapped(x, y + 1)
        + field.get_wrapped(x - 1, y)
        - 4.0 * v
}

/// Centered finite-difference gradient `(gx, gy)`.
#[inline]
pub(crate) fn gradient(field: &FieldData, x: usize, y: usize) -> (f64, f64) {
    let (x, y) = (x as i64, y as i64);
    let gx = (field.get_wrapped(x + 1, y) - field.get_wrapped(x - 1, y)) * 0.5;
    let gy = (field.get_wrapped(x, y + 1) - field.get_wrapped(x, y - 1)) * 0.5;
    (gx, gy)
}

/// Sum of `values` over the wrapped `(2r+1)^2` square around every cell, center included.
pub(crate) fn box_sums(values: &[f64], width: usize, height: usize, radius: usize) -> Vec<f64> {
    let r = radius as i64;
    let mut rows = vec![0.0; values.len()];
    rows.par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            let src = &values[y * width..(y + 1) * width];
            for (x, out) in row.iter_mut().enumerate() {
                let mut acc = 0.0;
                for dx in -r..=r {
                    acc += src[crate::field::wrap(x as i64 + dx, width)];
                }
                *out = acc;
            }
        });

    let mut sums = vec![0.0; values.len()];
    sums.par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, out) in row.iter_mut().enumerate() {
                let mut acc = 0.0;
                for dy in -r..=r {
                    acc += rows[crate::field::wrap(y as i64 + dy, height) * width + x];
                }
                *out = acc;
            }
        });
    sums
}

/// Mean of the neighborhood of radius `radius` around every cell, center excluded.
pub(crate) fn neighborhood_means(field: &FieldData, radius: u32) -> Vec<f64> {
    let radius = radius.max(1) as usize;
    let window = (2 * radius + 1) * (2 * radius + 1);
    let neighbors = (window - 1) as f64;
    let sums = box_sums(field.cells(), field.width(), field.height(), radius);
    sums.iter()
        .zip(field.cells())
        .map(|(sum, v)| (sum - v) / neighbors)
        .collect()
}

/// Stateless evaluator for the curvature, tension, coupling, attractor and
/// redistribution operators.
#[derive(Debug, Clone, Copy, Default)]
pub struct OperatorEngine;

impl OperatorEngine {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Evaluate all operators against `field` and integrate one explicit Euler step.
    #[must_use]
    pub fn step(&self, field: &FieldData, params: &SimulationParameters) -> StepOutput {
        let width = field.width();
        let global_mean = field.mean();
        let local_means = neighborhood_means(field, params.coupling_radius);

        let k_gain = params.curvature_gain * params.w_k;
        let t_gain = params.w_t;
        let c_gain = params.coupling_weight * params.w_c;
        let a_gain = params.attractor_strength * params.w_a;
        let r_gain = params.redistribution_rate * params.w_r;
        let dt = params.dt;

        let mut next = field.clone();
        let row_norms: Vec<[f64; OPERATOR_COUNT]> = next
            .cells_mut()
            .par_chunks_mut(width)
            .enumerate()
            .map(|(y, row)| {
                let mut squares = [0.0; OPERATOR_COUNT];
                for (x, out) in row.iter_mut().enumerate() {
                    let idx = y * width + x;
                    let v = field.cells()[idx];
                    let (gx, gy) = gradient(field, x, y);
                    let terms = [
                        k_gain * laplacian(field, x, y),
                        t_gain * (local_means[idx] - v),
                        c_gain * v.tanh() * gx.hypot(gy),
                        a_gain * (v - v * v * v),
                        -r_gain * (v - global_mean),
                    ];
                    for (acc, term) in squares.iter_mut().zip(terms) {
                        *acc += term * term;
                    }
                    *out = v + dt * terms.iter().sum::<f64>();
                }
                squares
            })
            .collect();

        let mut squares = [0.0; OPERATOR_COUNT];
        for row in &row_norms {
            for (acc, value) in squares.iter_mut().zip(row) {
                *acc += value;
            }
        }
        let norms = squares.map(f64::sqrt);

        StepOutput {
            field: next,
            contributions: OperatorContributions::from_norms(norms),
        }
    }
}
