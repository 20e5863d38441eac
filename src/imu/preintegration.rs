//! IMU preintegration on manifold (Forster et al.).
//!
//! A run of raw samples between two keyframes is reduced to a single
//! gravity-free relative motion `(ΔR, Δv, Δp)` expressed in the body frame of
//! the first keyframe, together with its covariance and the Jacobians needed
//! to correct it for a small bias change without re-integrating.

use nalgebra::{Matrix3, UnitQuaternion, Vector3};
use tracing::warn;

use super::sample::{ns_to_sec, ImuBias, ImuParams, ImuSample};
use super::types::{block, Matrix15, Matrix15x6, Matrix6};
use crate::error::{InitError, Result};
use crate::geometry::{right_jacobian_so3, skew, SE3};

/// Spans shorter than this are treated as empty.
const MIN_SPAN_NS: u64 = 1_000;

/// Immutable preintegrated motion between two timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct PreintegratedMeasurement {
    delta_rot: UnitQuaternion<f64>,
    delta_vel: Vector3<f64>,
    delta_pos: Vector3<f64>,
    covariance: Matrix15,
    d_rot_d_bg: Matrix3<f64>,
    d_vel_d_ba: Matrix3<f64>,
    d_vel_d_bg: Matrix3<f64>,
    d_pos_d_ba: Matrix3<f64>,
    d_pos_d_bg: Matrix3<f64>,
    bias: ImuBias,
    start_ns: u64,
    end_ns: u64,
    dt: f64,
}

impl PreintegratedMeasurement {
    pub fn delta_rot(&self) -> UnitQuaternion<f64> {
        self.delta_rot
    }

    pub fn delta_vel(&self) -> Vector3<f64> {
        self.delta_vel
    }

    pub fn delta_pos(&self) -> Vector3<f64> {
        self.delta_pos
    }

    /// Covariance of [δθ, δv, δp, δb_a, δb_g].
    pub fn covariance(&self) -> &Matrix15 {
        &self.covariance
    }

    /// ∂ΔR/∂b_g (right-perturbation convention).
    pub fn d_rot_d_bg(&self) -> &Matrix3<f64> {
        &self.d_rot_d_bg
    }

    pub fn d_vel_d_ba(&self) -> &Matrix3<f64> {
        &self.d_vel_d_ba
    }

    pub fn d_vel_d_bg(&self) -> &Matrix3<f64> {
        &self.d_vel_d_bg
    }

    pub fn d_pos_d_ba(&self) -> &Matrix3<f64> {
        &self.d_pos_d_ba
    }

    pub fn d_pos_d_bg(&self) -> &Matrix3<f64> {
        &self.d_pos_d_bg
    }

    /// Bias the samples were integrated with.
    pub fn bias(&self) -> &ImuBias {
        &self.bias
    }

    pub fn start_ns(&self) -> u64 {
        self.start_ns
    }

    pub fn end_ns(&self) -> u64 {
        self.end_ns
    }

    /// Integrated duration in seconds.
    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// ΔR corrected to first order for `bias`.
    pub fn delta_rotation_corrected(&self, bias: &ImuBias) -> UnitQuaternion<f64> {
        let dbg = bias.gyro - self.bias.gyro;
        self.delta_rot * UnitQuaternion::from_scaled_axis(self.d_rot_d_bg * dbg)
    }

    /// Δv corrected to first order for `bias`.
    pub fn delta_velocity_corrected(&self, bias: &ImuBias) -> Vector3<f64> {
        let dba = bias.accel - self.bias.accel;
        let dbg = bias.gyro - self.bias.gyro;
        self.delta_vel + self.d_vel_d_ba * dba + self.d_vel_d_bg * dbg
    }

    /// Δp corrected to first order for `bias`.
    pub fn delta_position_corrected(&self, bias: &ImuBias) -> Vector3<f64> {
        let dba = bias.accel - self.bias.accel;
        let dbg = bias.gyro - self.bias.gyro;
        self.delta_pos + self.d_pos_d_ba * dba + self.d_pos_d_bg * dbg
    }

    /// Predict the pose and velocity at the end of the span.
    ///
    /// `gravity` is expressed in the same frame as `pose_i`.
    pub fn predict(
        &self,
        pose_i: &SE3,
        vel_i: &Vector3<f64>,
        gravity: &Vector3<f64>,
        bias: &ImuBias,
    ) -> (SE3, Vector3<f64>) {
        let dt = self.dt;
        let r_i = pose_i.rotation;
        let rot = r_i * self.delta_rotation_corrected(bias);
        let vel = vel_i + gravity * dt + r_i * self.delta_velocity_corrected(bias);
        let pos = pose_i.translation
            + vel_i * dt
            + 0.5 * gravity * dt * dt
            + r_i * self.delta_position_corrected(bias);
        (SE3::new(rot, pos), vel)
    }
}

/// IMU preintegrator: accumulates high-rate samples into a relative motion.
#[derive(Debug, Clone)]
pub struct Preintegrator {
    bias: ImuBias,
    params: ImuParams,
    delta_rot: UnitQuaternion<f64>,
    delta_vel: Vector3<f64>,
    delta_pos: Vector3<f64>,
    covariance: Matrix15,
    d_rot_d_bg: Matrix3<f64>,
    d_vel_d_ba: Matrix3<f64>,
    d_vel_d_bg: Matrix3<f64>,
    d_pos_d_ba: Matrix3<f64>,
    d_pos_d_bg: Matrix3<f64>,
    dt: f64,
    num_steps: usize,
}

impl Preintegrator {
    pub fn new(bias: ImuBias, params: ImuParams) -> Self {
        Self {
            bias,
            params,
            delta_rot: UnitQuaternion::identity(),
            delta_vel: Vector3::zeros(),
            delta_pos: Vector3::zeros(),
            covariance: Matrix15::zeros(),
            d_rot_d_bg: Matrix3::zeros(),
            d_vel_d_ba: Matrix3::zeros(),
            d_vel_d_bg: Matrix3::zeros(),
            d_pos_d_ba: Matrix3::zeros(),
            d_pos_d_bg: Matrix3::zeros(),
            dt: 0.0,
            num_steps: 0,
        }
    }

    /// Accumulated integration time in seconds.
    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Integrate a single measurement held constant over `dt` seconds.
    ///
    /// Non-positive (or NaN) steps are skipped with a warning; the span then
    /// covers less time than the caller fed in.
    pub fn integrate_measurement(&mut self, accel: Vector3<f64>, gyro: Vector3<f64>, dt: f64) {
        if dt.is_nan() || dt <= 0.0 {
            warn!(
                "Skipping IMU step with non-positive dt {:.3e} s after {} steps",
                dt, self.num_steps
            );
            return;
        }

        let acc = accel - self.bias.accel;
        let omega = gyro - self.bias.gyro;

        let rot = self.delta_rot.to_rotation_matrix().into_inner();
        let phi = omega * dt;
        let inc = UnitQuaternion::from_scaled_axis(phi);
        let inc_mat = inc.to_rotation_matrix().into_inner();
        let jr = right_jacobian_so3(&phi);
        let acc_skew = skew(&acc);
        let dt2 = dt * dt;

        // --- 1. Covariance: Σ ← A Σ Aᵀ + B Q Bᵀ ---
        let mut a = Matrix15::identity();
        a.fixed_view_mut::<3, 3>(block::ROT, block::ROT)
            .copy_from(&inc_mat.transpose());
        a.fixed_view_mut::<3, 3>(block::ROT, block::BIAS_GYRO)
            .copy_from(&(-jr * dt));
        a.fixed_view_mut::<3, 3>(block::VEL, block::ROT)
            .copy_from(&(-rot * acc_skew * dt));
        a.fixed_view_mut::<3, 3>(block::VEL, block::BIAS_ACC)
            .copy_from(&(-rot * dt));
        a.fixed_view_mut::<3, 3>(block::POS, block::ROT)
            .copy_from(&(-0.5 * rot * acc_skew * dt2));
        a.fixed_view_mut::<3, 3>(block::POS, block::VEL)
            .copy_from(&(Matrix3::identity() * dt));
        a.fixed_view_mut::<3, 3>(block::POS, block::BIAS_ACC)
            .copy_from(&(-0.5 * rot * dt2));

        let mut b = Matrix15x6::zeros();
        b.fixed_view_mut::<3, 3>(block::VEL, 0).copy_from(&(rot * dt));
        b.fixed_view_mut::<3, 3>(block::POS, 0)
            .copy_from(&(0.5 * rot * dt2));
        b.fixed_view_mut::<3, 3>(block::ROT, 3).copy_from(&(jr * dt));

        let mut q = Matrix6::zeros();
        let acc_var = self.params.accel_noise_density.powi(2) / dt;
        let gyro_var = self.params.gyro_noise_density.powi(2) / dt;
        for i in 0..3 {
            q[(i, i)] = acc_var;
            q[(i + 3, i + 3)] = gyro_var;
        }

        self.covariance = a * self.covariance * a.transpose() + b * q * b.transpose();

        let int_var = self.params.integration_sigma.powi(2) * dt;
        let ba_var = self.params.accel_random_walk.powi(2) * dt;
        let bg_var = self.params.gyro_random_walk.powi(2) * dt;
        for i in 0..3 {
            self.covariance[(block::POS + i, block::POS + i)] += int_var;
            self.covariance[(block::BIAS_ACC + i, block::BIAS_ACC + i)] += ba_var;
            self.covariance[(block::BIAS_GYRO + i, block::BIAS_GYRO + i)] += bg_var;
        }

        // --- 2. Bias Jacobians (use the pre-step rotation and ∂ΔR/∂b_g) ---
        self.d_pos_d_ba += self.d_vel_d_ba * dt - 0.5 * rot * dt2;
        self.d_pos_d_bg += self.d_vel_d_bg * dt - 0.5 * rot * acc_skew * self.d_rot_d_bg * dt2;
        self.d_vel_d_ba -= rot * dt;
        self.d_vel_d_bg -= rot * acc_skew * self.d_rot_d_bg * dt;
        self.d_rot_d_bg = inc_mat.transpose() * self.d_rot_d_bg - jr * dt;

        // --- 3. Mean ---
        let rot_acc = rot * acc;
        self.delta_pos += self.delta_vel * dt + 0.5 * rot_acc * dt2;
        self.delta_vel += rot_acc * dt;
        self.delta_rot = UnitQuaternion::new_normalize((self.delta_rot * inc).into_inner());

        self.dt += dt;
        self.num_steps += 1;
    }

    /// Freeze the accumulated state into an immutable measurement.
    pub fn finish(&self, start_ns: u64, end_ns: u64) -> Result<PreintegratedMeasurement> {
        if self.num_steps == 0 || end_ns <= start_ns || end_ns - start_ns < MIN_SPAN_NS {
            return Err(InitError::InsufficientData(format!(
                "preintegration span [{start_ns}, {end_ns}] is empty"
            )));
        }

        Ok(PreintegratedMeasurement {
            delta_rot: self.delta_rot,
            delta_vel: self.delta_vel,
            delta_pos: self.delta_pos,
            covariance: self.covariance,
            d_rot_d_bg: self.d_rot_d_bg,
            d_vel_d_ba: self.d_vel_d_ba,
            d_vel_d_bg: self.d_vel_d_bg,
            d_pos_d_ba: self.d_pos_d_ba,
            d_pos_d_bg: self.d_pos_d_bg,
            bias: self.bias,
            start_ns,
            end_ns,
            dt: self.dt,
        })
    }
}

/// Preintegrate an ordered run of samples covering `[first, last]`.
///
/// Sample `k` is held constant over `[t_k, t_{k+1})`; the last sample only
/// closes the span.
pub fn preintegrate(
    samples: &[ImuSample],
    bias: &ImuBias,
    params: &ImuParams,
) -> Result<PreintegratedMeasurement> {
    if samples.len() < 2 {
        return Err(InitError::InsufficientData(format!(
            "preintegration needs at least 2 samples, got {}",
            samples.len()
        )));
    }

    let start_ns = samples[0].timestamp_ns;
    let end_ns = samples[samples.len() - 1].timestamp_ns;
    if end_ns <= start_ns || end_ns - start_ns < MIN_SPAN_NS {
        return Err(InitError::InsufficientData(format!(
            "preintegration span [{start_ns}, {end_ns}] is too short"
        )));
    }

    let mut preintegrator = Preintegrator::new(*bias, *params);
    for pair in samples.windows(2) {
        let (prev, curr) = (&pair[0], &pair[1]);
        if curr.timestamp_ns <= prev.timestamp_ns {
            return Err(InitError::NonMonotonicTimestamp {
                timestamp_ns: curr.timestamp_ns,
                last_ns: prev.timestamp_ns,
            });
        }
        let dt = ns_to_sec(curr.timestamp_ns - prev.timestamp_ns);
        preintegrator.integrate_measurement(prev.accel, prev.gyro, dt);
    }

    preintegrator.finish(start_ns, end_ns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const STEP_NS: u64 = 5_000_000; // 200 Hz

    fn constant_samples(n: usize, accel: Vector3<f64>, gyro: Vector3<f64>) -> Vec<ImuSample> {
        (0..n)
            .map(|k| ImuSample::new(k as u64 * STEP_NS, accel, gyro))
            .collect()
    }

    fn excited_samples(n: usize) -> Vec<ImuSample> {
        (0..n)
            .map(|k| {
                let t = k as f64 * ns_to_sec(STEP_NS);
                ImuSample::new(
                    k as u64 * STEP_NS,
                    Vector3::new(0.5 * (2.0 * t).sin(), 0.3 * t.cos(), 9.81 + 0.2 * t),
                    Vector3::new(0.4 * t.cos(), -0.3, 0.6 * (1.5 * t).sin()),
                )
            })
            .collect()
    }

    #[test]
    fn test_constant_acceleration_no_rotation() {
        let accel = Vector3::new(1.0, -2.0, 9.81);
        let samples = constant_samples(201, accel, Vector3::zeros());
        let pim = preintegrate(&samples, &ImuBias::zero(), &ImuParams::default()).unwrap();

        let t = 1.0;
        assert_relative_eq!(pim.dt(), t, epsilon = 1e-12);
        assert_relative_eq!(pim.delta_vel(), accel * t, epsilon = 1e-9);
        assert_relative_eq!(pim.delta_pos(), 0.5 * accel * t * t, epsilon = 1e-9);
        assert!(pim.delta_rot().angle() < 1e-12);
        assert_eq!(pim.start_ns(), 0);
        assert_eq!(pim.end_ns(), 200 * STEP_NS);
    }

    #[test]
    fn test_non_positive_step_is_skipped() {
        let mut integrator = Preintegrator::new(ImuBias::zero(), ImuParams::default());
        let accel = Vector3::new(0.0, 0.0, 9.81);
        integrator.integrate_measurement(accel, Vector3::zeros(), 0.01);
        integrator.integrate_measurement(accel, Vector3::new(1.0, 0.0, 0.0), -0.01);
        integrator.integrate_measurement(accel, Vector3::new(1.0, 0.0, 0.0), 0.0);
        integrator.integrate_measurement(accel, Vector3::new(1.0, 0.0, 0.0), f64::NAN);

        assert_relative_eq!(integrator.dt(), 0.01, epsilon = 1e-15);
        let pim = integrator.finish(0, 10_000_000).unwrap();
        assert_relative_eq!(pim.delta_vel(), accel * 0.01, epsilon = 1e-12);
        assert!(pim.delta_rot().angle() < 1e-12);
    }

    #[test]
    fn test_constant_rotation_rate() {
        let gyro = Vector3::new(0.1, -0.2, 0.3);
        let samples = constant_samples(101, Vector3::zeros(), gyro);
        let pim = preintegrate(&samples, &ImuBias::zero(), &ImuParams::default()).unwrap();

        let expected = UnitQuaternion::from_scaled_axis(gyro * pim.dt());
        assert!(pim.delta_rot().angle_to(&expected) < 1e-6);
    }

    #[test]
    fn test_bias_is_subtracted() {
        let bias = ImuBias::new(Vector3::new(0.1, 0.0, 0.0), Vector3::new(0.0, 0.0, 0.05));
        let samples = constant_samples(51, bias.accel, bias.gyro);
        let pim = preintegrate(&samples, &bias, &ImuParams::default()).unwrap();

        assert_relative_eq!(pim.delta_vel(), Vector3::zeros(), epsilon = 1e-12);
        assert!(pim.delta_rot().angle() < 1e-12);
    }

    #[test]
    fn test_bias_jacobians_match_reintegration() {
        let samples = excited_samples(201);
        let params = ImuParams::default();
        let bias0 = ImuBias::zero();
        let bias1 = ImuBias::new(Vector3::new(2e-3, -1e-3, 3e-3), Vector3::new(1e-4, -2e-4, 1.5e-4));

        let pim0 = preintegrate(&samples, &bias0, &params).unwrap();
        let pim1 = preintegrate(&samples, &bias1, &params).unwrap();

        let rot_err = pim0.delta_rotation_corrected(&bias1).angle_to(&pim1.delta_rot());
        let rot_change = pim0.delta_rot().angle_to(&pim1.delta_rot());
        assert!(rot_change > 1e-5);
        assert!(rot_err < 1e-2 * rot_change, "rotation error {rot_err}");

        let vel_err = (pim0.delta_velocity_corrected(&bias1) - pim1.delta_vel()).norm();
        let vel_change = (pim0.delta_vel() - pim1.delta_vel()).norm();
        assert!(vel_err < 1e-2 * vel_change, "velocity error {vel_err}");

        let pos_err = (pim0.delta_position_corrected(&bias1) - pim1.delta_pos()).norm();
        let pos_change = (pim0.delta_pos() - pim1.delta_pos()).norm();
        assert!(pos_err < 1e-2 * pos_change, "position error {pos_err}");
    }

    #[test]
    fn test_covariance_symmetric_and_growing() {
        let samples = excited_samples(101);
        let params = ImuParams::default();
        let short = preintegrate(&samples[..51], &ImuBias::zero(), &params).unwrap();
        let long = preintegrate(&samples, &ImuBias::zero(), &params).unwrap();

        let cov = long.covariance();
        assert_relative_eq!(*cov, cov.transpose(), epsilon = 1e-12);
        for i in 0..15 {
            assert!(cov[(i, i)] >= 0.0);
        }
        assert!(cov.trace() > short.covariance().trace());
        assert!(cov[(block::ROT, block::ROT)] > 0.0);
        assert!(cov[(block::POS, block::POS)] > 0.0);
    }

    #[test]
    fn test_predict_with_gravity() {
        // Stationary body: accelerometer reads +g upwards.
        let gravity = Vector3::new(0.0, 0.0, -9.81);
        let samples = constant_samples(101, -gravity, Vector3::zeros());
        let pim = preintegrate(&samples, &ImuBias::zero(), &ImuParams::default()).unwrap();

        let (pose, vel) = pim.predict(&SE3::identity(), &Vector3::zeros(), &gravity, &ImuBias::zero());
        assert_relative_eq!(vel, Vector3::zeros(), epsilon = 1e-9);
        assert_relative_eq!(pose.translation, Vector3::zeros(), epsilon = 1e-9);
    }

    #[test]
    fn test_insufficient_samples() {
        let params = ImuParams::default();
        let one = constant_samples(1, Vector3::zeros(), Vector3::zeros());
        assert!(matches!(
            preintegrate(&one, &ImuBias::zero(), &params),
            Err(InitError::InsufficientData(_))
        ));

        let same_time = vec![
            ImuSample::new(10, Vector3::zeros(), Vector3::zeros()),
            ImuSample::new(10, Vector3::zeros(), Vector3::zeros()),
        ];
        assert!(matches!(
            preintegrate(&same_time, &ImuBias::zero(), &params),
            Err(InitError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_non_monotonic_samples_rejected() {
        let samples = vec![
            ImuSample::new(0, Vector3::zeros(), Vector3::zeros()),
            ImuSample::new(STEP_NS * 2, Vector3::zeros(), Vector3::zeros()),
            ImuSample::new(STEP_NS, Vector3::zeros(), Vector3::zeros()),
            ImuSample::new(STEP_NS * 3, Vector3::zeros(), Vector3::zeros()),
        ];
        assert!(matches!(
            preintegrate(&samples, &ImuBias::zero(), &ImuParams::default()),
            Err(InitError::NonMonotonicTimestamp { .. })
        ));
    }
}
