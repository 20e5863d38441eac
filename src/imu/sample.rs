use nalgebra::Vector3;
use serde::Deserialize;

use crate::error::{InitError, Result};

/// Nominal gravity magnitude (m/s^2).
pub const GRAVITY_MAGNITUDE: f64 = 9.81;

/// IMU noise parameters used by the preintegrator.
///
/// Densities are continuous-time (per √Hz); the preintegrator converts them
/// to discrete covariances for each integration step.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ImuParams {
    /// Gyroscope white noise density (rad/s/√Hz).
    pub gyro_noise_density: f64,
    /// Accelerometer white noise density (m/s²/√Hz).
    pub accel_noise_density: f64,
    /// Gyroscope bias random walk (rad/s²/√Hz).
    pub gyro_random_walk: f64,
    /// Accelerometer bias random walk (m/s³/√Hz).
    pub accel_random_walk: f64,
    /// Position integration uncertainty (m/√Hz).
    pub integration_sigma: f64,
}

impl Default for ImuParams {
    fn default() -> Self {
        Self {
            // EuRoC ADIS16448 datasheet values
            gyro_noise_density: 1.6968e-4,
            accel_noise_density: 2.0e-3,
            gyro_random_walk: 1.9393e-5,
            accel_random_walk: 3.0e-3,
            integration_sigma: 1e-8,
        }
    }
}

impl ImuParams {
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("gyro_noise_density", self.gyro_noise_density),
            ("accel_noise_density", self.accel_noise_density),
            ("gyro_random_walk", self.gyro_random_walk),
            ("accel_random_walk", self.accel_random_walk),
            ("integration_sigma", self.integration_sigma),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(InitError::InvalidConfig(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// IMU biases.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuBias {
    pub gyro: Vector3<f64>,
    pub accel: Vector3<f64>,
}

impl ImuBias {
    pub fn zero() -> Self {
        Self {
            gyro: Vector3::zeros(),
            accel: Vector3::zeros(),
        }
    }

    pub fn new(accel: Vector3<f64>, gyro: Vector3<f64>) -> Self {
        Self { gyro, accel }
    }

    /// Same accelerometer bias, different gyroscope bias.
    pub fn with_gyro(&self, gyro: Vector3<f64>) -> Self {
        Self {
            gyro,
            accel: self.accel,
        }
    }
}

impl Default for ImuBias {
    fn default() -> Self {
        Self::zero()
    }
}

/// Single IMU measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuSample {
    pub timestamp_ns: u64,
    pub accel: Vector3<f64>,
    pub gyro: Vector3<f64>,
}

impl ImuSample {
    pub fn new(timestamp_ns: u64, accel: Vector3<f64>, gyro: Vector3<f64>) -> Self {
        Self {
            timestamp_ns,
            accel,
            gyro,
        }
    }

    /// Linear interpolation between `self` and `next` at `timestamp_ns`.
    ///
    /// `timestamp_ns` must lie in `[self.timestamp_ns, next.timestamp_ns]`.
    pub fn interpolate(&self, next: &ImuSample, timestamp_ns: u64) -> ImuSample {
        if timestamp_ns == next.timestamp_ns {
            return *next;
        }
        let span = next.timestamp_ns.saturating_sub(self.timestamp_ns);
        if span == 0 || timestamp_ns <= self.timestamp_ns {
            return ImuSample {
                timestamp_ns,
                ..*self
            };
        }
        let alpha = (timestamp_ns - self.timestamp_ns) as f64 / span as f64;
        ImuSample {
            timestamp_ns,
            accel: self.accel + (next.accel - self.accel) * alpha,
            gyro: self.gyro + (next.gyro - self.gyro) * alpha,
        }
    }
}

/// Convert a nanosecond duration to seconds.
#[inline]
pub fn ns_to_sec(ns: u64) -> f64 {
    ns as f64 * 1e-9
}
