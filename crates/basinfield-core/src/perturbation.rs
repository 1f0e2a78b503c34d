//! Localised, wrap-aware disturbances injected into the field between ticks.

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

use crate::field::{FieldData, nearest_offset, wrap};

/// Rotation sense for [`PerturbationMode::Vortex`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum VortexDirection {
    Cw,
    #[default]
    Ccw,
}

impl VortexDirection {
    const fn sign(self) -> f64 {
        match self {
            VortexDirection::Cw => -1.0,
            VortexDirection::Ccw => 1.0,
        }
    }
}

/// Disturbance kernels and their parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PerturbationMode {
    /// Radial bump with exponential falloff.
    Impulse {
        intensity: f64,
        radius: f64,
        decay: f64,
    },
    /// Push along a direction, fading linearly out to 40% of the shorter grid edge.
    Shear {
        magnitude: f64,
        angle: f64,
        duration: f64,
    },
    /// Damped radial sinusoid.
    Wave {
        amplitude: f64,
        frequency: f64,
        wavelength: f64,
        damping: f64,
    },
    /// Two-lobed swirl; zero at the exact center.
    Vortex {
        angular_velocity: f64,
        radius: f64,
        direction: VortexDirection,
    },
    /// Four-fold crack pattern with seeded jitter, bifurcated by the sign of the field.
    Fracture {
        strength: f64,
        noise: f64,
        propagation_rate: f64,
    },
    /// Blend the field with a translated copy of itself.
    Drift {
        magnitude: f64,
        vector_x: f64,
        vector_y: f64,
        duration: f64,
    },
}

impl Default for PerturbationMode {
    fn default() -> Self {
        PerturbationMode::Impulse {
            intensity: 1.0,
            radius: 10.0,
            decay: 1.0,
        }
    }
}

impl PerturbationMode {
    /// Short identifier used in logs and events.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            PerturbationMode::Impulse { .. } => "impulse",
            PerturbationMode::Shear { .. } => "shear",
            PerturbationMode::Wave { .. } => "wave",
            PerturbationMode::Vortex { .. } => "vortex",
            PerturbationMode::Fracture { .. } => "fracture",
            PerturbationMode::Drift { .. } => "drift",
        }
    }

    /// Whether applying this mode consumes random numbers.
    #[must_use]
    pub fn is_stochastic(&self) -> bool {
        matches!(self, PerturbationMode::Fracture { noise, .. } if *noise != 0.0)
    }
}

/// Offset, distance and angle of a cell relative to the wrapped center.
#[derive(Debug, Clone, Copy)]
struct Polar {
    dx: f64,
    dy: f64,
    dist: f64,
}

impl Polar {
    fn angle(&self) -> f64 {
        self.dy.atan2(self.dx)
    }
}

fn all_finite(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite())
}

/// Visit every cell with its toroidal offset from `(cx, cy)`.
fn for_each_offset(field: &mut FieldData, cx: i64, cy: i64, mut visit: impl FnMut(Polar, &mut f64)) {
    let (width, height) = (field.width(), field.height());
    let cx = wrap(cx, width) as i64;
    let cy = wrap(cy, height) as i64;
    for y in 0..height {
        let dy = nearest_offset(y as i64, cy, height);
        for x in 0..width {
            let dx = nearest_offset(x as i64, cx, width);
            let idx = field.offset(x, y);
            let polar = Polar {
                dx,
                dy,
                dist: dx.hypot(dy),
            };
            visit(polar, &mut field.cells_mut()[idx]);
        }
    }
}

/// Apply `mode` centered at `(center_x, center_y)`; coordinates wrap onto the torus.
///
/// Degenerate parameters (non-positive radius, wavelength, duration or
/// propagation rate, or any non-finite value) leave the field untouched.
pub fn apply(
    field: &mut FieldData,
    center_x: i64,
    center_y: i64,
    mode: &PerturbationMode,
    rng: &mut dyn RngCore,
) {
    match *mode {
        PerturbationMode::Impulse {
            intensity,
            radius,
            decay,
        } => {
            if !all_finite(&[intensity, radius, decay]) || radius <= 0.0 {
                return;
            }
            for_each_offset(field, center_x, center_y, |p, cell| {
                if p.dist < radius {
                    *cell += intensity * (-decay * p.dist / radius * 3.0).exp();
                }
            });
        }
        PerturbationMode::Shear {
            magnitude,
            angle,
            duration,
        } => {
            if !all_finite(&[magnitude, angle, duration]) || duration <= 0.0 {
                return;
            }
            let reach = 0.4 * field.width().min(field.height()) as f64;
            let (sin, cos) = angle.sin_cos();
            let scale = magnitude * duration / 10.0;
            for_each_offset(field, center_x, center_y, |p, cell| {
                if p.dist < reach {
                    let projection = p.dx * cos + p.dy * sin;
                    *cell += scale * (projection / reach) * (1.0 - p.dist / reach);
                }
            });
        }
        PerturbationMode::Wave {
            amplitude,
            frequency,
            wavelength,
            damping,
        } => {
            if !all_finite(&[amplitude, frequency, wavelength, damping]) || wavelength <= 0.0 {
                return;
            }
            let k = TAU / wavelength;
            for_each_offset(field, center_x, center_y, |p, cell| {
                *cell += amplitude * (k * p.dist - frequency).sin() * (-damping * p.dist).exp();
            });
        }
        PerturbationMode::Vortex {
            angular_velocity,
            radius,
            direction,
        } => {
            if !all_finite(&[angular_velocity, radius]) || radius <= 0.0 {
                return;
            }
            let sign = direction.sign();
            for_each_offset(field, center_x, center_y, |p, cell| {
                let dist_sq = p.dx * p.dx + p.dy * p.dy;
                if p.dist < radius && dist_sq > 1.0 {
                    let swirl = (2.0 * p.angle() + 0.1 * p.dist).sin();
                    *cell += sign * angular_velocity * swirl * (1.0 - p.dist / radius);
                }
            });
        }
        PerturbationMode::Fracture {
            strength,
            noise,
            propagation_rate,
        } => {
            if !all_finite(&[strength, noise, propagation_rate]) || propagation_rate <= 0.0 {
                return;
            }
            let radius = propagation_rate * 20.0;
            for_each_offset(field, center_x, center_y, |p, cell| {
                if p.dist < radius {
                    let crack = (4.0 * p.angle()).sin() * (0.2 * p.dist).cos();
                    let jitter = if noise != 0.0 {
                        noise * rng.random_range(-1.0..1.0)
                    } else {
                        0.0
                    };
                    let branch = if *cell < 0.0 { -1.0 } else { 1.0 };
                    *cell += branch * strength * (crack + jitter) * (1.0 - p.dist / radius);
                }
            });
        }
        PerturbationMode::Drift {
            magnitude,
            vector_x,
            vector_y,
            duration,
        } => {
            if !all_finite(&[magnitude, vector_x, vector_y, duration]) || duration <= 0.0 {
                return;
            }
            let blend = (magnitude * 0.02 * duration / 10.0).clamp(0.0, 1.0);
            if blend == 0.0 {
                return;
            }
            let width = field.width();
            let (Some(shift_x), Some(shift_y)) = (
                torus_shift(vector_x * magnitude * 2.0, width),
                torus_shift(vector_y * magnitude * 2.0, field.height()),
            ) else {
                return;
            };
            let source = field.clone();
            for y in 0..field.height() {
                for x in 0..width {
                    let shifted = source.get_wrapped(x as i64 - shift_x, y as i64 - shift_y);
                    let cell = &mut field.cells_mut()[y * width + x];
                    *cell = (1.0 - blend) * *cell + blend * shifted;
                }
            }
        }
    }
}

/// Shift of `amount` cells reduced onto `[0, extent)` before it becomes an integer.
fn torus_shift(amount: f64, extent: usize) -> Option<i64> {
    let reduced = amount.round().rem_euclid(extent as f64);
    reduced.is_finite().then_some(reduced as i64)
}
