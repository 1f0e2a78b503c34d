//! Steepest-ascent basin labeling.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::field::FieldData;

/// Label used for cells that belong to no basin (non-finite values).
pub const UNASSIGNED: i32 = -1;

const NO_PARENT: usize = usize::MAX;

/// Basin label per cell plus the number of distinct basins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BasinMap {
    labels: Vec<i32>,
    count: usize,
    width: usize,
    height: usize,
}

impl BasinMap {
    #[must_use]
    pub fn labels(&self) -> &[i32] {
        &self.labels
    }

    #[must_use]
    pub const fn count(&self) -> usize {
        self.count
    }

    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    #[must_use]
    pub const fn height(&self) -> usize {
        self.height
    }

    /// Basin id at `(x, y)`; `None` when unassigned or out of bounds.
    #[must_use]
    pub fn basin_at(&self, x: usize, y: usize) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        u32::try_from(self.labels[y * self.width + x]).ok()
    }

    /// Number of cells carrying each basin id.
    #[must_use]
    pub fn sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.count];
        for &label in &self.labels {
            if let Ok(id) = usize::try_from(label) {
                sizes[id] += 1;
            }
        }
        sizes
    }
}

/// Wrapped neighbors in the fixed scan order: up, right, down, left.
#[inline]
fn neighbors(idx: usize, width: usize, height: usize) -> [usize; 4] {
    let x = idx % width;
    let y = idx / width;
    let up = if y == 0 { height - 1 } else { y - 1 };
    let down = if y + 1 == height { 0 } else { y + 1 };
    let left = if x == 0 { width - 1 } else { x - 1 };
    let right = if x + 1 == width { 0 } else { x + 1 };
    [
        up * width + x,
        y * width + right,
        down * width + x,
        y * width + left,
    ]
}

/// Groups cells by the local maximum their steepest-ascent walk reaches.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasinDetector;

impl BasinDetector {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Label every cell of `field`.
    ///
    /// Each finite cell points at its highest strictly-greater neighbor (first
    /// in scan order on ties). Cells without one are peaks; adjacent peaks with
    /// bitwise-equal values form a single plateau. Pointers strictly increase
    /// the value, so walks always terminate.
    #[must_use]
    pub fn label(&self, field: &FieldData) -> BasinMap {
        let (width, height) = (field.width(), field.height());
        let cells = field.cells();
        let len = cells.len();

        let mut parent = vec![NO_PARENT; len];
        for (idx, &value) in cells.iter().enumerate() {
            if !value.is_finite() {
                continue;
            }
            let mut best = value;
            for n in neighbors(idx, width, height) {
                let candidate = cells[n];
                if candidate.is_finite() && candidate > best {
                    best = candidate;
                    parent[idx] = n;
                }
            }
        }

        let mut labels = vec![UNASSIGNED; len];
        let mut count = 0usize;
        let mut frontier = VecDeque::new();
        for idx in 0..len {
            let value = cells[idx];
            if !value.is_finite() || parent[idx] != NO_PARENT || labels[idx] != UNASSIGNED {
                continue;
            }
            let id = count as i32;
            count += 1;
            labels[idx] = id;
            frontier.push_back(idx);
            while let Some(current) = frontier.pop_front() {
                for n in neighbors(current, width, height) {
                    if labels[n] == UNASSIGNED
                        && parent[n] == NO_PARENT
                        && cells[n].to_bits() == value.to_bits()
                    {
                        labels[n] = id;
                        frontier.push_back(n);
                    }
                }
            }
        }

        let mut path = Vec::new();
        for start in 0..len {
            if labels[start] != UNASSIGNED || !cells[start].is_finite() {
                continue;
            }
            let mut current = start;
            while labels[current] == UNASSIGNED {
                path.push(current);
                current = parent[current];
            }
            let id = labels[current];
            for visited in path.drain(..) {
                labels[visited] = id;
            }
        }

        BasinMap {
            labels,
            count,
            width,
            height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cone(width: usize, height: usize, cx: i64, cy: i64) -> FieldData {
        let mut field = FieldData::new(width, height, 0.0).expect("field");
        for y in 0..height {
            for x in 0..width {
                let dx = crate::field::nearest_offset(x as i64, cx, width);
                let dy = crate::field::nearest_offset(y as i64, cy, height);
                *field.get_mut(x, y).expect("cell") = -(dx.hypot(dy));
            }
        }
        field
    }

    #[test]
    fn single_peak_gives_single_basin() {
        let map = BasinDetector::new().label(&cone(24, 20, 7, 9));
        assert_eq!(map.count(), 1);
        assert!(map.labels().iter().all(|&label| label == 0));
    }

    #[test]
    fn uniform_field_is_one_plateau() {
        let field = FieldData::new(16, 16, 0.3).expect("field");
        let map = BasinDetector::new().label(&field);
        assert_eq!(map.count(), 1);
        assert_eq!(map.sizes(), vec![256]);
    }

    #[test]
    fn two_peaks_split_the_grid() {
        let mut field = FieldData::new(32, 16, 0.0).expect("field");
        for y in 0..16 {
            for x in 0..32 {
                let to_a = crate::field::nearest_offset(x as i64, 8, 32)
                    .hypot(crate::field::nearest_offset(y as i64, 8, 16));
                let to_b = crate::field::nearest_offset(x as i64, 24, 32)
                    .hypot(crate::field::nearest_offset(y as i64, 8, 16));
                *field.get_mut(x, y).expect("cell") = (-to_a).max(-to_b * 1.01);
            }
        }
        let map = BasinDetector::new().label(&field);
        assert_eq!(map.count(), 2);
        assert_eq!(map.basin_at(8, 8), Some(0));
        assert_eq!(map.basin_at(24, 8), Some(1));
        assert_eq!(map.basin_at(4, 8), Some(0));
        assert_eq!(map.basin_at(28, 8), Some(1));
    }

    #[test]
    fn ties_follow_scan_order() {
        let mut field = FieldData::new(16, 16, 0.0).expect("field");
        *field.get_mut(5, 4).expect("cell") = 1.0; // up of (5, 5)
        *field.get_mut(6, 5).expect("cell") = 1.0; // right of (5, 5)
        *field.get_mut(5, 5).expect("cell") = 0.5;
        let map = BasinDetector::new().label(&field);
        let up = map.basin_at(5, 4);
        assert_eq!(map.basin_at(5, 5), up);
        assert_ne!(map.basin_at(6, 5), up);
    }

    #[test]
    fn non_finite_cells_are_unassigned() {
        let mut field = cone(16, 16, 8, 8);
        *field.get_mut(3, 3).expect("cell") = f64::NAN;
        let map = BasinDetector::new().label(&field);
        assert_eq!(map.basin_at(3, 3), None);
        assert_eq!(map.labels()[field.offset(3, 3)], UNASSIGNED);
        assert_eq!(map.count(), 1);
    }

    #[test]
    fn labeling_is_deterministic() {
        let mut field = FieldData::new(20, 20, 0.0).expect("field");
        for (i, cell) in field.cells_mut().iter_mut().enumerate() {
            *cell = (((i * 2654435761) % 997) as f64).sin();
        }
        let a = BasinDetector::new().label(&field);
        let b = BasinDetector::new().label(&field);
        assert_eq!(a, b);
        assert!(a.count() > 1);
        assert!(a.labels().iter().all(|&l| l >= 0 && (l as usize) < a.count()));
    }
}
