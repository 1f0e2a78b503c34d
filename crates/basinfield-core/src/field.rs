//! Scalar grid storage and toroidal indexing.

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::SimulationError;

/// Wrap a possibly negative coordinate onto `[0, dim)`.
#[inline]
#[must_use]
pub fn wrap(coord: i64, dim: usize) -> usize {
    let dim = dim as i64;
    (((coord % dim) + dim) % dim) as usize
}

/// Shortest signed offset from `from` to `to` on a ring of length `dim`.
#[inline]
#[must_use]
pub fn nearest_offset(to: i64, from: i64, dim: usize) -> f64 {
    let half = dim as f64 / 2.0;
    let mut delta = (to - from) as f64;
    if delta > half {
        delta -= dim as f64;
    } else if delta < -half {
        delta += dim as f64;
    }
    delta
}

/// Simulation clock (ticks processed since the last reset).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Step(pub u64);

impl Step {
    /// Returns the next sequential step.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Resets the step counter back to zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Row-major 2D scalar grid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "RawFieldData")]
pub struct FieldData {
    width: usize,
    height: usize,
    cells: Vec<f64>,
}

/// Unchecked wire shape of [`FieldData`].
#[derive(Deserialize)]
struct RawFieldData {
    width: usize,
    height: usize,
    cells: Vec<f64>,
}

impl TryFrom<RawFieldData> for FieldData {
    type Error = SimulationError;

    fn try_from(raw: RawFieldData) -> Result<Self, Self::Error> {
        Self::from_cells(raw.width, raw.height, raw.cells)
    }
}

impl FieldData {
    /// Construct a grid with `width * height` cells initialised to `initial`.
    pub fn new(width: usize, height: usize, initial: f64) -> Result<Self, SimulationError> {
        if width == 0 || height == 0 {
            return Err(SimulationError::InvalidParameter(
                "field dimensions must be non-zero",
            ));
        }
        Ok(Self {
            width,
            height,
            cells: vec![initial; width * height],
        })
    }

    /// Wrap an existing buffer; the length must match the dimensions.
    pub fn from_cells(width: usize, height: usize, cells: Vec<f64>) -> Result<Self, SimulationError> {
        if width == 0 || height == 0 {
            return Err(SimulationError::InvalidParameter(
                "field dimensions must be non-zero",
            ));
        }
        if cells.len() != width * height {
            return Err(SimulationError::InvalidParameter(
                "cell buffer length must equal width * height",
            ));
        }
        Ok(Self {
            width,
            height,
            cells,
        })
    }

    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    #[must_use]
    pub const fn height(&self) -> usize {
        self.height
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    #[must_use]
    pub fn cells(&self) -> &[f64] {
        &self.cells
    }

    #[must_use]
    pub fn cells_mut(&mut self) -> &mut [f64] {
        &mut self.cells
    }

    /// Returns the flat index for `(x, y)` without bounds checks.
    #[inline]
    #[must_use]
    pub fn offset(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    /// Flat index of `(x, y)` after toroidal wrapping.
    #[inline]
    #[must_use]
    pub fn wrapped_offset(&self, x: i64, y: i64) -> usize {
        self.offset(wrap(x, self.width), wrap(y, self.height))
    }

    /// Immutable access to a specific cell.
    #[must_use]
    pub fn get(&self, x: usize, y: usize) -> Option<f64> {
        if x < self.width && y < self.height {
            Some(self.cells[self.offset(x, y)])
        } else {
            None
        }
    }

    /// Read with toroidal wrapping.
    #[inline]
    #[must_use]
    pub fn get_wrapped(&self, x: i64, y: i64) -> f64 {
        self.cells[self.wrapped_offset(x, y)]
    }

    /// Mutable access to a specific cell.
    pub fn get_mut(&mut self, x: usize, y: usize) -> Option<&mut f64> {
        if x < self.width && y < self.height {
            let idx = self.offset(x, y);
            Some(&mut self.cells[idx])
        } else {
            None
        }
    }

    /// Fills the grid with the provided scalar value.
    pub fn fill(&mut self, value: f64) {
        self.cells.fill(value);
    }

    /// Arithmetic mean of all cells.
    #[must_use]
    pub fn mean(&self) -> f64 {
        if self.cells.is_empty() {
            return 0.0;
        }
        self.cells.iter().sum::<f64>() / self.cells.len() as f64
    }
}

/// Owner of the live field and its step counter.
///
/// Each tick swaps in a fresh `Arc<FieldData>`; perturbations go through
/// [`FieldState::data_mut`], which copies the grid first if a history entry
/// still shares it.
#[derive(Debug, Clone)]
pub struct FieldState {
    data: Arc<FieldData>,
    step: Step,
}

impl FieldState {
    /// Build the initial condition: `initial` plus uniform noise in `[-noise, noise)`.
    pub fn seeded(
        size: usize,
        initial: f64,
        noise: f64,
        rng: &mut dyn RngCore,
    ) -> Result<Self, SimulationError> {
        let mut data = FieldData::new(size, size, initial)?;
        if noise > 0.0 {
            for cell in data.cells_mut() {
                *cell += rng.random_range(-noise..noise);
            }
        }
        Ok(Self::from_data(data))
    }

    #[must_use]
    pub fn from_data(data: FieldData) -> Self {
        Self {
            data: Arc::new(data),
            step: Step::zero(),
        }
    }

    #[must_use]
    pub fn data(&self) -> &FieldData {
        &self.data
    }

    /// Shared handle to the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<FieldData> {
        Arc::clone(&self.data)
    }

    /// Copy-on-write access for out-of-band mutation.
    pub fn data_mut(&mut self) -> &mut FieldData {
        Arc::make_mut(&mut self.data)
    }

    #[must_use]
    pub const fn step(&self) -> Step {
        self.step
    }

    /// Replace the grid wholesale and advance the step counter.
    pub fn commit(&mut self, next: FieldData) {
        debug_assert_eq!(next.width(), self.data.width());
        debug_assert_eq!(next.height(), self.data.height());
        self.data = Arc::new(next);
        self.step = self.step.next();
    }
}
