//! Threshold-based regime classification.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Variance below which the field counts as flat.
pub const UNIFORM_VARIANCE: f64 = 1e-6;
/// Variance rate magnitude marking a regime edge.
pub const TRANSITION_EDGE_RATE: f64 = 0.05;
/// Mean absolute curvature marking a high-curvature field.
pub const HIGH_CURVATURE_MEAN: f64 = 0.05;
/// Basin count at which the field counts as fragmented.
pub const MULTI_BASIN_COUNT: usize = 8;
/// Mean gradient magnitude above which a growing field is close to tipping.
pub const NEAR_CRITICAL_GRADIENT: f64 = 0.01;

/// Qualitative state of the field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum RegimeKey {
    #[default]
    Uniform,
    HighCurvature,
    MultiBasin,
    NearCritical,
    TransitionEdge,
    Dispersion,
    PostCooling,
}

impl RegimeKey {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            RegimeKey::Uniform => "uniform",
            RegimeKey::HighCurvature => "high_curvature",
            RegimeKey::MultiBasin => "multi_basin",
            RegimeKey::NearCritical => "near_critical",
            RegimeKey::TransitionEdge => "transition_edge",
            RegimeKey::Dispersion => "dispersion",
            RegimeKey::PostCooling => "post_cooling",
        }
    }
}

impl fmt::Display for RegimeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Aggregate metrics the classifier looks at.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct RegimeMetrics {
    pub variance: f64,
    pub variance_rate: f64,
    pub energy_delta: f64,
    pub curvature_mean_abs: f64,
    pub gradient_mean: f64,
    pub basin_count: usize,
}

/// Map metrics to a regime. Rules are checked in a fixed priority order.
#[must_use]
pub fn classify(metrics: &RegimeMetrics) -> RegimeKey {
    if metrics.variance < UNIFORM_VARIANCE {
        return if metrics.energy_delta < 0.0 {
            RegimeKey::PostCooling
        } else {
            RegimeKey::Uniform
        };
    }
    if metrics.variance_rate.abs() >= TRANSITION_EDGE_RATE {
        return RegimeKey::TransitionEdge;
    }
    if metrics.curvature_mean_abs >= HIGH_CURVATURE_MEAN {
        return RegimeKey::HighCurvature;
    }
    if metrics.basin_count >= MULTI_BASIN_COUNT {
        return RegimeKey::MultiBasin;
    }
    if metrics.variance_rate >= 0.0 && metrics.gradient_mean >= NEAR_CRITICAL_GRADIENT {
        return RegimeKey::NearCritical;
    }
    RegimeKey::Dispersion
}
