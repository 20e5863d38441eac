//! Synthetic IMU and keyframe generator.
//!
//! The ground truth is propagated with the same discrete scheme the
//! preintegrator uses, so noiseless sequences are exactly consistent with
//! the gravity-free preintegrated deltas. Keyframes fall on the sample
//! lattice, which keeps every interval's preintegration span equal to the
//! camera time delta.

use std::f64::consts::PI;

use nalgebra::{UnitQuaternion, Vector3};

use super::preintegration::preintegrate;
use super::sample::{ns_to_sec, ImuBias, ImuParams, ImuSample, GRAVITY_MAGNITUDE};
use crate::alignment::{AlignmentWindow, VisualPose};
use crate::error::Result;
use crate::geometry::SE3;

/// Smooth body motion: sinusoidal world acceleration and body angular rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionProfile {
    /// World-from-body rotation at the first sample.
    pub initial_rotation: UnitQuaternion<f64>,
    /// World-frame velocity at the first sample (m/s).
    pub initial_velocity: Vector3<f64>,
    /// Per-axis amplitude of the world-frame acceleration (m/s^2).
    pub accel_amplitude: Vector3<f64>,
    pub accel_frequency_hz: f64,
    /// Per-axis amplitude of the body angular rate (rad/s).
    pub angular_rate_amplitude: Vector3<f64>,
    pub angular_frequency_hz: f64,
}

impl MotionProfile {
    /// Level and at rest.
    pub fn stationary() -> Self {
        Self {
            initial_rotation: UnitQuaternion::identity(),
            initial_velocity: Vector3::zeros(),
            accel_amplitude: Vector3::zeros(),
            accel_frequency_hz: 0.0,
            angular_rate_amplitude: Vector3::zeros(),
            angular_frequency_hz: 0.0,
        }
    }

    /// Moving and rotating about all axes, tilted from level.
    pub fn excited() -> Self {
        Self {
            initial_rotation: UnitQuaternion::from_euler_angles(0.2, -0.1, 0.5),
            initial_velocity: Vector3::new(0.5, -0.2, 0.1),
            accel_amplitude: Vector3::new(1.5, 1.0, 0.8),
            accel_frequency_hz: 0.7,
            angular_rate_amplitude: Vector3::new(0.6, 0.4, 0.8),
            angular_frequency_hz: 0.5,
        }
    }

    fn world_acceleration(&self, t: f64) -> Vector3<f64> {
        let w = 2.0 * PI * self.accel_frequency_hz;
        Vector3::new(
            self.accel_amplitude.x * (w * t).sin(),
            self.accel_amplitude.y * (w * t + PI / 3.0).sin(),
            self.accel_amplitude.z * (w * t + 2.0 * PI / 3.0).sin(),
        )
    }

    fn body_angular_rate(&self, t: f64) -> Vector3<f64> {
        let w = 2.0 * PI * self.angular_frequency_hz;
        Vector3::new(
            self.angular_rate_amplitude.x * (w * t).cos(),
            self.angular_rate_amplitude.y * (w * t + PI / 4.0).cos(),
            self.angular_rate_amplitude.z * (w * t + PI / 2.0).cos(),
        )
    }
}

/// Generated IMU stream with keyframe poses and ground truth.
#[derive(Debug, Clone)]
pub struct SyntheticSequence {
    pub samples: Vec<ImuSample>,
    /// Keyframe poses in the visual frame (translation divided by `scale`).
    pub keyframes: Vec<VisualPose>,
    /// True metric keyframe velocities in the visual frame.
    pub velocities: Vec<Vector3<f64>>,
    /// True gravity in the visual frame.
    pub gravity: Vector3<f64>,
    pub bias: ImuBias,
    /// Metric distance per visual unit.
    pub scale: f64,
    samples_per_keyframe: usize,
}

impl SyntheticSequence {
    /// Samples covering keyframe interval `k`, both borders included.
    pub fn interval_samples(&self, k: usize) -> &[ImuSample] {
        let start = k * self.samples_per_keyframe;
        &self.samples[start..=start + self.samples_per_keyframe]
    }

    /// Preintegrate every keyframe interval with `bias` and build the window.
    pub fn alignment_window(&self, bias: &ImuBias, params: &ImuParams) -> Result<AlignmentWindow> {
        let pims = (0..self.keyframes.len().saturating_sub(1))
            .map(|k| preintegrate(self.interval_samples(k), bias, params))
            .collect::<Result<Vec<_>>>()?;
        AlignmentWindow::from_keyframes(self.keyframes.clone(), pims)
    }
}

/// Noiseless IMU simulator.
#[derive(Debug, Clone)]
pub struct ImuSimulator {
    pub profile: MotionProfile,
    pub imu_rate_hz: f64,
    pub samples_per_keyframe: usize,
    pub start_ns: u64,
    /// Gravity in the world frame.
    pub gravity: Vector3<f64>,
    pub bias: ImuBias,
    /// Rotation from the gravity-aligned world frame to the visual frame.
    pub visual_from_world: UnitQuaternion<f64>,
    pub scale: f64,
}

impl ImuSimulator {
    pub fn new(profile: MotionProfile) -> Self {
        Self {
            profile,
            imu_rate_hz: 200.0,
            samples_per_keyframe: 20,
            start_ns: 1_000_000_000,
            gravity: Vector3::new(0.0, 0.0, -GRAVITY_MAGNITUDE),
            bias: ImuBias::zero(),
            visual_from_world: UnitQuaternion::identity(),
            scale: 1.0,
        }
    }

    pub fn with_bias(mut self, bias: ImuBias) -> Self {
        self.bias = bias;
        self
    }

    pub fn with_visual_frame(mut self, visual_from_world: UnitQuaternion<f64>) -> Self {
        self.visual_from_world = visual_from_world;
        self
    }

    /// Report keyframe translations in units of `scale` metres.
    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub fn sample_period_ns(&self) -> u64 {
        (1e9 / self.imu_rate_hz).round() as u64
    }

    /// Generate `num_keyframes` keyframes and the samples between them.
    pub fn generate(&self, num_keyframes: usize) -> SyntheticSequence {
        let period_ns = self.sample_period_ns();
        let dt = ns_to_sec(period_ns);
        let num_samples = num_keyframes.saturating_sub(1) * self.samples_per_keyframe + 1;

        let mut rotation = self.profile.initial_rotation;
        let mut velocity = self.profile.initial_velocity;
        let mut position = Vector3::zeros();

        let mut samples = Vec::with_capacity(num_samples);
        let mut keyframes = Vec::with_capacity(num_keyframes);
        let mut velocities = Vec::with_capacity(num_keyframes);

        for i in 0..num_samples {
            let timestamp_ns = self.start_ns + i as u64 * period_ns;
            let t = ns_to_sec(i as u64 * period_ns);

            if i % self.samples_per_keyframe == 0 {
                let pose = SE3::new(
                    self.visual_from_world * rotation,
                    self.visual_from_world * position / self.scale,
                );
                keyframes.push(VisualPose::new(timestamp_ns, pose));
                velocities.push(self.visual_from_world * velocity);
            }

            let accel_world = self.profile.world_acceleration(t);
            let omega = self.profile.body_angular_rate(t);
            let specific_force = rotation.inverse() * (accel_world - self.gravity);
            samples.push(ImuSample::new(
                timestamp_ns,
                specific_force + self.bias.accel,
                omega + self.bias.gyro,
            ));

            // Same discrete update as the preintegrator
            let accel_applied = rotation * specific_force + self.gravity;
            position += velocity * dt + 0.5 * accel_applied * dt * dt;
            velocity += accel_applied * dt;
            rotation = UnitQuaternion::new_normalize(
                (rotation * UnitQuaternion::from_scaled_axis(omega * dt)).into_inner(),
            );
        }

        SyntheticSequence {
            samples,
            keyframes,
            velocities,
            gravity: self.visual_from_world * self.gravity,
            bias: self.bias,
            scale: self.scale,
            samples_per_keyframe: self.samples_per_keyframe,
        }
    }
}
