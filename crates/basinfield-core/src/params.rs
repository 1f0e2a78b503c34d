//! Simulation parameters, their declared ranges, partial patches and presets.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;

use crate::SimulationError;

/// Smallest grid edge accepted by `reset`.
pub const MIN_GRID_SIZE: usize = 16;
/// Largest grid edge accepted by `reset`; larger requests fail before allocation.
pub const MAX_GRID_SIZE: usize = 1024;

const DT_RANGE: RangeInclusive<f64> = 0.01..=0.2;
const CURVATURE_GAIN_RANGE: RangeInclusive<f64> = 0.0..=2.0;
const COUPLING_RADIUS_RANGE: RangeInclusive<u32> = 1..=8;
const COUPLING_WEIGHT_RANGE: RangeInclusive<f64> = 0.0..=2.0;
const ATTRACTOR_STRENGTH_RANGE: RangeInclusive<f64> = 0.0..=2.0;
const REDISTRIBUTION_RATE_RANGE: RangeInclusive<f64> = 0.0..=1.0;
const WEIGHT_RANGE: RangeInclusive<f64> = 0.0..=5.0;
const INITIAL_VALUE_RANGE: RangeInclusive<f64> = -1.0..=1.0;
const INITIAL_NOISE_RANGE: RangeInclusive<f64> = 0.0..=1.0;

/// Clamp into a closed range; non-finite input falls back to `fallback`.
fn clamp_f64(value: f64, range: &RangeInclusive<f64>, fallback: f64) -> f64 {
    if value.is_nan() {
        return fallback;
    }
    value.clamp(*range.start(), *range.end())
}

/// Parameters driving one simulation session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulationParameters {
    /// Edge length of the square grid (cells).
    pub grid_size: usize,
    /// Integration time step.
    pub dt: f64,
    /// Gain applied to the curvature operator.
    pub curvature_gain: f64,
    /// Radius of the tension neighborhood (cells).
    pub coupling_radius: u32,
    /// Gain applied to the coupling operator.
    pub coupling_weight: f64,
    /// Gain applied to the attractor operator.
    pub attractor_strength: f64,
    /// Fraction of the deviation from the global mean removed per unit time.
    pub redistribution_rate: f64,
    pub w_k: f64,
    pub w_t: f64,
    pub w_c: f64,
    pub w_a: f64,
    pub w_r: f64,
    /// Uniform value the field starts from.
    pub initial_value: f64,
    /// Amplitude of seeded uniform noise added to the initial field.
    pub initial_noise: f64,
    /// Seed for initial noise and stochastic perturbations.
    pub seed: u64,
}

impl Default for SimulationParameters {
    fn default() -> Self {
        Self {
            grid_size: 300,
            dt: 0.05,
            curvature_gain: 1.0,
            coupling_radius: 2,
            coupling_weight: 1.0,
            attractor_strength: 1.0,
            redistribution_rate: 0.1,
            w_k: 1.0,
            w_t: 0.8,
            w_c: 1.2,
            w_a: 2.0,
            w_r: 0.5,
            initial_value: 0.0,
            initial_noise: 0.0,
            seed: 0x5EED_F1E1D,
        }
    }
}

impl SimulationParameters {
    /// Clamp every continuous field into its declared range.
    ///
    /// `grid_size` is left alone; it is validated by [`Self::validate_grid`].
    #[must_use]
    pub fn clamped(self) -> Self {
        let defaults = Self::default();
        Self {
            grid_size: self.grid_size,
            dt: clamp_f64(self.dt, &DT_RANGE, defaults.dt),
            curvature_gain: clamp_f64(
                self.curvature_gain,
                &CURVATURE_GAIN_RANGE,
                defaults.curvature_gain,
            ),
            coupling_radius: self
                .coupling_radius
                .clamp(*COUPLING_RADIUS_RANGE.start(), *COUPLING_RADIUS_RANGE.end()),
            coupling_weight: clamp_f64(
                self.coupling_weight,
                &COUPLING_WEIGHT_RANGE,
                defaults.coupling_weight,
            ),
            attractor_strength: clamp_f64(
                self.attractor_strength,
                &ATTRACTOR_STRENGTH_RANGE,
                defaults.attractor_strength,
            ),
            redistribution_rate: clamp_f64(
                self.redistribution_rate,
                &REDISTRIBUTION_RATE_RANGE,
                defaults.redistribution_rate,
            ),
            w_k: clamp_f64(self.w_k, &WEIGHT_RANGE, defaults.w_k),
            w_t: clamp_f64(self.w_t, &WEIGHT_RANGE, defaults.w_t),
            w_c: clamp_f64(self.w_c, &WEIGHT_RANGE, defaults.w_c),
            w_a: clamp_f64(self.w_a, &WEIGHT_RANGE, defaults.w_a),
            w_r: clamp_f64(self.w_r, &WEIGHT_RANGE, defaults.w_r),
            initial_value: clamp_f64(
                self.initial_value,
                &INITIAL_VALUE_RANGE,
                defaults.initial_value,
            ),
            initial_noise: clamp_f64(
                self.initial_noise,
                &INITIAL_NOISE_RANGE,
                defaults.initial_noise,
            ),
            seed: self.seed,
        }
    }

    /// Reject grid sizes that cannot be allocated or are too small to be meaningful.
    pub fn validate_grid(&self) -> Result<usize, SimulationError> {
        if self.grid_size < MIN_GRID_SIZE {
            return Err(SimulationError::InvalidParameter(
                "grid_size must be at least 16",
            ));
        }
        if self.grid_size > MAX_GRID_SIZE {
            return Err(SimulationError::GridTooLarge {
                requested: self.grid_size,
                max: MAX_GRID_SIZE,
            });
        }
        Ok(self.grid_size)
    }

    /// Merge a partial update, clamping every supplied value to its range.
    #[must_use]
    pub fn merged(self, patch: &ParameterPatch) -> Self {
        let merged = Self {
            grid_size: patch
                .grid_size
                .map_or(self.grid_size, |size| size.clamp(MIN_GRID_SIZE, MAX_GRID_SIZE)),
            dt: patch.dt.unwrap_or(self.dt),
            curvature_gain: patch.curvature_gain.unwrap_or(self.curvature_gain),
            coupling_radius: patch.coupling_radius.unwrap_or(self.coupling_radius),
            coupling_weight: patch.coupling_weight.unwrap_or(self.coupling_weight),
            attractor_strength: patch.attractor_strength.unwrap_or(self.attractor_strength),
            redistribution_rate: patch
                .redistribution_rate
                .unwrap_or(self.redistribution_rate),
            w_k: patch.w_k.unwrap_or(self.w_k),
            w_t: patch.w_t.unwrap_or(self.w_t),
            w_c: patch.w_c.unwrap_or(self.w_c),
            w_a: patch.w_a.unwrap_or(self.w_a),
            w_r: patch.w_r.unwrap_or(self.w_r),
            initial_value: patch.initial_value.unwrap_or(self.initial_value),
            initial_noise: patch.initial_noise.unwrap_or(self.initial_noise),
            seed: patch.seed.unwrap_or(self.seed),
        };
        merged.clamped()
    }

    /// Linear blend towards `target`; discrete fields snap to the target.
    #[must_use]
    pub fn lerp(&self, target: &Self, t: f64) -> Self {
        let t = t.clamp(0.0, 1.0);
        if t >= 1.0 {
            return *target;
        }
        let mix = |a: f64, b: f64| a + (b - a) * t;
        let radius = mix(
            f64::from(self.coupling_radius),
            f64::from(target.coupling_radius),
        );
        Self {
            grid_size: target.grid_size,
            dt: mix(self.dt, target.dt),
            curvature_gain: mix(self.curvature_gain, target.curvature_gain),
            coupling_radius: radius.round() as u32,
            coupling_weight: mix(self.coupling_weight, target.coupling_weight),
            attractor_strength: mix(self.attractor_strength, target.attractor_strength),
            redistribution_rate: mix(self.redistribution_rate, target.redistribution_rate),
            w_k: mix(self.w_k, target.w_k),
            w_t: mix(self.w_t, target.w_t),
            w_c: mix(self.w_c, target.w_c),
            w_a: mix(self.w_a, target.w_a),
            w_r: mix(self.w_r, target.w_r),
            initial_value: mix(self.initial_value, target.initial_value),
            initial_noise: mix(self.initial_noise, target.initial_noise),
            seed: target.seed,
        }
    }
}

/// Partial parameter update; absent fields keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ParameterPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dt: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub curvature_gain: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupling_radius: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupling_weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attractor_strength: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redistribution_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub w_k: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub w_t: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub w_c: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub w_a: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub w_r: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_noise: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl From<SimulationParameters> for ParameterPatch {
    fn from(params: SimulationParameters) -> Self {
        Self {
            grid_size: Some(params.grid_size),
            dt: Some(params.dt),
            curvature_gain: Some(params.curvature_gain),
            coupling_radius: Some(params.coupling_radius),
            coupling_weight: Some(params.coupling_weight),
            attractor_strength: Some(params.attractor_strength),
            redistribution_rate: Some(params.redistribution_rate),
            w_k: Some(params.w_k),
            w_t: Some(params.w_t),
            w_c: Some(params.w_c),
            w_a: Some(params.w_a),
            w_r: Some(params.w_r),
            initial_value: Some(params.initial_value),
            initial_noise: Some(params.initial_noise),
            seed: Some(params.seed),
        }
    }
}

/// Named parameter bundles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    #[default]
    Default,
    Calm,
    Turbulent,
    Crystalline,
    Critical,
}

impl Preset {
    pub const ALL: [Preset; 5] = [
        Preset::Default,
        Preset::Calm,
        Preset::Turbulent,
        Preset::Crystalline,
        Preset::Critical,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Preset::Default => "default",
            Preset::Calm => "calm",
            Preset::Turbulent => "turbulent",
            Preset::Crystalline => "crystalline",
            Preset::Critical => "critical",
        }
    }

    /// Look up a preset by its snake_case name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|preset| preset.name() == name)
    }

    /// The partial update this preset applies. Grid size and seed are never touched.
    #[must_use]
    pub fn patch(self) -> ParameterPatch {
        let defaults = SimulationParameters::default();
        match self {
            Preset::Default => ParameterPatch {
                dt: Some(defaults.dt),
                curvature_gain: Some(defaults.curvature_gain),
                coupling_radius: Some(defaults.coupling_radius),
                coupling_weight: Some(defaults.coupling_weight),
                attractor_strength: Some(defaults.attractor_strength),
                redistribution_rate: Some(defaults.redistribution_rate),
                w_k: Some(defaults.w_k),
                w_t: Some(defaults.w_t),
                w_c: Some(defaults.w_c),
                w_a: Some(defaults.w_a),
                w_r: Some(defaults.w_r),
                ..ParameterPatch::default()
            },
            Preset::Calm => ParameterPatch {
                dt: Some(0.03),
                curvature_gain: Some(1.5),
                coupling_weight: Some(0.2),
                attractor_strength: Some(0.3),
                redistribution_rate: Some(0.4),
                w_c: Some(0.5),
                ..ParameterPatch::default()
            },
            Preset::Turbulent => ParameterPatch {
                dt: Some(0.12),
                curvature_gain: Some(0.4),
                coupling_weight: Some(1.8),
                w_c: Some(3.0),
                w_t: Some(0.2),
                redistribution_rate: Some(0.02),
                ..ParameterPatch::default()
            },
            Preset::Crystalline => ParameterPatch {
                attractor_strength: Some(2.0),
                w_a: Some(4.0),
                curvature_gain: Some(0.6),
                coupling_radius: Some(1),
                ..ParameterPatch::default()
            },
            Preset::Critical => ParameterPatch {
                dt: Some(0.08),
                attractor_strength: Some(1.2),
                coupling_weight: Some(1.2),
                coupling_radius: Some(4),
                w_r: Some(0.1),
                ..ParameterPatch::default()
            },
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_sit_inside_their_ranges() {
        let defaults = SimulationParameters::default();
        assert_eq!(defaults.clamped(), defaults);
        assert!(defaults.validate_grid().is_ok());
    }

    #[test]
    fn merge_clamps_out_of_range_values() {
        let patch = ParameterPatch {
            dt: Some(5.0),
            w_k: Some(-1.0),
            coupling_radius: Some(40),
            curvature_gain: Some(f64::NAN),
            ..ParameterPatch::default()
        };
        let merged = SimulationParameters::default().merged(&patch);
        assert_eq!(merged.dt, 0.2);
        assert_eq!(merged.w_k, 0.0);
        assert_eq!(merged.coupling_radius, 8);
        assert_eq!(merged.curvature_gain, 1.0);
        assert_eq!(merged.w_t, 0.8, "untouched fields keep their value");
    }

    #[test]
    fn grid_validation_distinguishes_small_and_huge() {
        let small = SimulationParameters {
            grid_size: 4,
            ..SimulationParameters::default()
        };
        assert!(matches!(
            small.validate_grid(),
            Err(SimulationError::InvalidParameter(_))
        ));
        let huge = SimulationParameters {
            grid_size: 1_000_000,
            ..SimulationParameters::default()
        };
        assert!(matches!(
            huge.validate_grid(),
            Err(SimulationError::GridTooLarge { requested: 1_000_000, .. })
        ));
    }

    #[test]
    fn patch_deserializes_from_partial_json() {
        let patch: ParameterPatch =
            serde_json::from_str(r#"{ "dt": 0.1, "w_a": 3.5 }"#).expect("patch");
        assert_eq!(patch.dt, Some(0.1));
        assert_eq!(patch.w_a, Some(3.5));
        assert!(patch.grid_size.is_none());
        assert!(serde_json::from_str::<ParameterPatch>(r#"{ "bogus": 1 }"#).is_err());
    }

    #[test]
    fn presets_round_trip_names_and_keep_seed() {
        for preset in Preset::ALL {
            assert_eq!(Preset::from_name(preset.name()), Some(preset));
            let patch = preset.patch();
            assert!(patch.seed.is_none());
            assert!(patch.grid_size.is_none());
        }
        assert!(Preset::from_name("nope").is_none());
    }

    #[test]
    fn lerp_hits_endpoints() {
        let from = SimulationParameters::default();
        let to = from.merged(&Preset::Turbulent.patch());
        assert_eq!(from.lerp(&to, 0.0).dt, from.dt);
        assert_eq!(from.lerp(&to, 1.0), to);
        let mid = from.lerp(&to, 0.5);
        assert!((mid.dt - (from.dt + to.dt) / 2.0).abs() < 1e-12);
    }
}
