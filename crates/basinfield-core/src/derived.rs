//! Per-cell derived quantities: whole-grid derived fields and single-cell probes.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::SimulationError;
use crate::basins::BasinMap;
use crate::field::FieldData;
use crate::operators::{box_sums, gradient, laplacian, neighborhood_means};
use crate::params::SimulationParameters;

/// Quantity a derived field visualizes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DerivedFieldKind {
    /// Raw five-point Laplacian.
    Curvature,
    /// Neighborhood mean over `coupling_radius` minus the cell value.
    Tension,
    /// `tanh(v) * |grad v|`.
    Coupling,
    /// Population variance of the 3x3 neighborhood.
    Variance,
}

impl DerivedFieldKind {
    pub const ALL: [DerivedFieldKind; 4] = [
        DerivedFieldKind::Curvature,
        DerivedFieldKind::Tension,
        DerivedFieldKind::Coupling,
        DerivedFieldKind::Variance,
    ];
}

/// A grid of derived values with the same shape as the source field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DerivedField {
    pub kind: DerivedFieldKind,
    pub width: usize,
    pub height: usize,
    pub cells: Vec<f64>,
}

impl DerivedField {
    #[must_use]
    pub fn get(&self, x: usize, y: usize) -> Option<f64> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.cells.get(y * self.width + x).copied()
    }
}

/// Everything known about one cell.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ProbeData {
    pub x: usize,
    pub y: usize,
    pub value: f64,
    pub curvature: f64,
    pub tension: f64,
    pub coupling: f64,
    pub gradient_magnitude: f64,
    pub neighborhood_variance: f64,
    pub basin_id: Option<u32>,
    /// False when the cell or anything derived from it is NaN or infinite.
    pub finite: bool,
}

fn map_cells(field: &FieldData, per_cell: impl Fn(&FieldData, usize, usize) -> f64 + Sync) -> Vec<f64> {
    let width = field.width();
    let mut out = vec![0.0; field.len()];
    out.par_chunks_mut(width).enumerate().for_each(|(y, row)| {
        for (x, cell) in row.iter_mut().enumerate() {
            *cell = per_cell(field, x, y);
        }
    });
    out
}

fn local_variances(field: &FieldData) -> Vec<f64> {
    let squares: Vec<f64> = field.cells().iter().map(|v| v * v).collect();
    let sums = box_sums(field.cells(), field.width(), field.height(), 1);
    let square_sums = box_sums(&squares, field.width(), field.height(), 1);
    sums.iter()
        .zip(&square_sums)
        .map(|(sum, sq)| {
            let mean = sum / 9.0;
            (sq / 9.0 - mean * mean).max(0.0)
        })
        .collect()
}

#[inline]
fn coupling_at(field: &FieldData, x: usize, y: usize) -> f64 {
    let (gx, gy) = gradient(field, x, y);
    let v = field.get_wrapped(x as i64, y as i64);
    v.tanh() * gx.hypot(gy)
}

/// Compute the derived field of `kind` for `field`.
#[must_use]
pub fn derive(field: &FieldData, params: &SimulationParameters, kind: DerivedFieldKind) -> DerivedField {
    let cells = match kind {
        DerivedFieldKind::Curvature => map_cells(field, laplacian),
        DerivedFieldKind::Tension => neighborhood_means(field, params.coupling_radius)
            .iter()
            .zip(field.cells())
            .map(|(mean, v)| mean - v)
            .collect(),
        DerivedFieldKind::Coupling => map_cells(field, coupling_at),
        DerivedFieldKind::Variance => local_variances(field),
    };
    DerivedField {
        kind,
        width: field.width(),
        height: field.height(),
        cells,
    }
}

/// Inspect a single in-bounds cell.
pub fn probe(
    field: &FieldData,
    params: &SimulationParameters,
    basins: Option<&BasinMap>,
    x: usize,
    y: usize,
) -> Result<ProbeData, SimulationError> {
    let value = field.get(x, y).ok_or(SimulationError::OutOfRange {
        x: x as i64,
        y: y as i64,
        width: field.width(),
        height: field.height(),
    })?;
    let (xi, yi) = (x as i64, y as i64);

    let r = i64::from(params.coupling_radius.max(1));
    let mut neighbor_sum = 0.0;
    for dy in -r..=r {
        for dx in -r..=r {
            if dx != 0 || dy != 0 {
                neighbor_sum += field.get_wrapped(xi + dx, yi + dy);
            }
        }
    }
    let neighbors = ((2 * r + 1) * (2 * r + 1) - 1) as f64;
    let tension = neighbor_sum / neighbors - value;

    let mut window = [0.0; 9];
    for (slot, (dx, dy)) in window
        .iter_mut()
        .zip((-1..=1).flat_map(|dy| (-1..=1).map(move |dx| (dx, dy))))
    {
        *slot = field.get_wrapped(xi + dx, yi + dy);
    }
    let mean = window.iter().sum::<f64>() / 9.0;
    let neighborhood_variance = window.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / 9.0;

    let curvature = laplacian(field, x, y);
    let (gx, gy) = gradient(field, x, y);
    let gradient_magnitude = gx.hypot(gy);
    let coupling = value.tanh() * gradient_magnitude;
    let finite = [
        value,
        curvature,
        tension,
        coupling,
        gradient_magnitude,
        neighborhood_variance,
    ]
    .iter()
    .all(|v| v.is_finite());

    Ok(ProbeData {
        x,
        y,
        value,
        curvature,
        tension,
        coupling,
        gradient_magnitude,
        neighborhood_variance,
        basin_id: basins.and_then(|map| map.basin_at(x, y)),
        finite,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bump() -> FieldData {
        let mut field = FieldData::new(16, 16, 0.0).expect("field");
        *field.get_mut(5, 6).expect("cell") = 1.0;
        field
    }

    #[test]
    fn probe_agrees_with_derived_fields() {
        let field = bump();
        let params = SimulationParameters::default();
        for (x, y) in [(5, 6), (6, 6), (4, 5), (0, 0), (15, 15)] {
            let probe = probe(&field, &params, None, x, y).expect("in range");
            for kind in DerivedFieldKind::ALL {
                let derived = derive(&field, &params, kind).get(x, y).expect("cell");
                let probed = match kind {
                    DerivedFieldKind::Curvature => probe.curvature,
                    DerivedFieldKind::Tension => probe.tension,
                    DerivedFieldKind::Coupling => probe.coupling,
                    DerivedFieldKind::Variance => probe.neighborhood_variance,
                };
                assert!((derived - probed).abs() < 1e-12, "{kind:?} at ({x}, {y})");
            }
        }
    }

    #[test]
    fn bump_values() {
        let field = bump();
        let params = SimulationParameters::default();
        let center = probe(&field, &params, None, 5, 6).expect("in range");
        assert_eq!(center.value, 1.0);
        assert_eq!(center.curvature, -4.0);
        assert_eq!(center.gradient_magnitude, 0.0);
        assert!((center.tension - (-1.0)).abs() < 1e-12);
        let expected_var = 1.0 / 9.0 - 1.0 / 81.0;
        assert!((center.neighborhood_variance - expected_var).abs() < 1e-12);
        assert!(center.finite);
        assert_eq!(center.basin_id, None);
    }

    #[test]
    fn out_of_range_probe_fails() {
        let field = bump();
        let params = SimulationParameters::default();
        let err = probe(&field, &params, None, 16, 0).expect_err("out of range");
        assert!(matches!(err, SimulationError::OutOfRange { x: 16, y: 0, .. }));
    }

    #[test]
    fn non_finite_cell_is_flagged() {
        let mut field = bump();
        *field.get_mut(2, 2).expect("cell") = f64::INFINITY;
        let params = SimulationParameters::default();
        let probe = probe(&field, &params, None, 2, 3).expect("in range");
        assert!(!probe.finite);
    }
}
