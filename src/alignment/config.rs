use serde::Deserialize;

use crate::error::{InitError, Result};
use crate::imu::GRAVITY_MAGNITUDE;

/// Configuration for visual-inertial alignment.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    /// Nominal gravity magnitude (m/s^2); the estimate is pinned to it.
    pub gravity_magnitude: f64,
    /// Maximum allowed deviation of the unconstrained gravity estimate.
    pub gravity_magnitude_tolerance: f64,
    /// Minimum number of intervals for gravity/velocity alignment.
    pub min_intervals: usize,
    /// Minimum number of intervals for gyroscope bias estimation.
    pub min_gyro_intervals: usize,
    /// Maximum tangent-space refinement iterations.
    pub max_iterations: usize,
    /// Refinement stops once the tangent correction norm drops below this.
    pub convergence_tolerance: f64,
    /// Gauss-Newton iterations for the gyroscope bias.
    pub gyro_bias_iterations: usize,
    /// Largest accepted condition number of the equilibrated system.
    pub max_condition_number: f64,
    /// Singular values below `rank_tolerance * sigma_max` count as zero.
    pub rank_tolerance: f64,
    /// Estimate the visual scale (monocular) instead of assuming metric poses.
    pub estimate_scale: bool,
    /// Minimum visual path length (up-to-scale units) when estimating scale.
    pub min_translation: f64,
    /// Maximum mismatch between camera and IMU interval durations (s).
    pub max_time_misalignment_s: f64,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            gravity_magnitude: GRAVITY_MAGNITUDE,
            gravity_magnitude_tolerance: 1.0,
            min_intervals: 3,
            min_gyro_intervals: 2,
            max_iterations: 10,
            convergence_tolerance: 1e-6,
            gyro_bias_iterations: 3,
            max_condition_number: 1e8,
            rank_tolerance: 1e-12,
            estimate_scale: false,
            min_translation: 1e-3,
            max_time_misalignment_s: 1e-3,
        }
    }
}

impl AlignmentConfig {
    /// Metric poses (stereo or RGB-D front-end).
    pub fn metric() -> Self {
        Self::default()
    }

    /// Up-to-scale poses (monocular front-end).
    pub fn monocular() -> Self {
        Self {
            estimate_scale: true,
            min_intervals: 4,
            ..Self::default()
        }
    }

    /// Tighter acceptance thresholds, for data known to be clean.
    pub fn strict() -> Self {
        Self {
            gravity_magnitude_tolerance: 0.2,
            max_condition_number: 1e6,
            convergence_tolerance: 1e-9,
            max_iterations: 20,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("gravity_magnitude", self.gravity_magnitude),
            ("gravity_magnitude_tolerance", self.gravity_magnitude_tolerance),
            ("convergence_tolerance", self.convergence_tolerance),
            ("max_condition_number", self.max_condition_number),
            ("rank_tolerance", self.rank_tolerance),
            ("max_time_misalignment_s", self.max_time_misalignment_s),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(InitError::InvalidConfig(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        if !self.min_translation.is_finite() || self.min_translation < 0.0 {
            return Err(InitError::InvalidConfig(format!(
                "min_translation must be non-negative, got {}",
                self.min_translation
            )));
        }
        if self.min_intervals == 0 || self.min_gyro_intervals == 0 {
            return Err(InitError::InvalidConfig(
                "minimum interval counts must be at least 1".into(),
            ));
        }
        if self.max_iterations == 0 || self.gyro_bias_iterations == 0 {
            return Err(InitError::InvalidConfig(
                "iteration counts must be at least 1".into(),
            ));
        }
        if self.rank_tolerance * self.max_condition_number >= 1.0 {
            return Err(InitError::InvalidConfig(format!(
                "rank_tolerance {} must be below 1 / max_condition_number",
                self.rank_tolerance
            )));
        }
        Ok(())
    }
}
