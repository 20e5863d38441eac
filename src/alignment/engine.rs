//! Online gravity alignment.
//!
//! Given keyframe poses from the visual front-end and the preintegrated IMU
//! measurements between them, estimates:
//! - Gyroscope bias (rotation consistency)
//! - Gravity direction in the visual frame (magnitude fixed)
//! - Per-keyframe velocities
//! - Visual scale, for up-to-scale poses
//!
//! Per interval k with Δt the preintegration span:
//!
//! ```text
//! position: v_k Δt + ½ g Δt² − s (p_{k+1} − p_k) = −R_k ΔP_k
//! velocity: v_{k+1} − v_k − g Δt                 =  R_k ΔV_k
//! ```
//!
//! The unconstrained linear solve gives the gravity direction. Refinement
//! then pins |g| and solves for a 2D correction in the tangent plane of the
//! current estimate until the correction vanishes.

use nalgebra::{DMatrix, DVector, Matrix3, Matrix3x2, UnitQuaternion, Vector3};
use tracing::{debug, info, warn};

use super::config::AlignmentConfig;
use super::gyro_bias;
use super::linear::{solve_equilibrated, LinearSolution, StateLayout};
use super::tangent;
use super::window::AlignmentWindow;
use crate::error::{InitError, Result};
use crate::geometry::{rotation_between_vectors, SE3};
use crate::imu::{ImuBias, NavState};

/// Result of a successful alignment.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentResult {
    /// Gyroscope bias used for the final deltas.
    pub gyro_bias: Vector3<f64>,
    /// Full bias estimate (accelerometer bias passed through).
    pub bias: ImuBias,
    /// Gravity in the visual frame at nominal magnitude.
    pub gravity: Vector3<f64>,
    /// Metric velocity of every keyframe in the visual frame.
    pub velocities: Vec<Vector3<f64>>,
    /// Metric distance per visual unit (1.0 for metric poses).
    pub scale: f64,
    /// First keyframe pose (metric) and velocity in the gravity-aligned
    /// world frame, gravity along -z.
    pub nav_state: NavState,
    /// Same state expressed in the visual frame.
    pub visual_nav_state: NavState,
    /// Tangent refinement iterations performed.
    pub iterations: usize,
    /// Whether the tangent correction fell below the tolerance.
    pub converged: bool,
    /// Condition number of the final equilibrated system.
    pub condition_number: f64,
}

impl AlignmentResult {
    /// Rotation taking the visual frame to a world frame with gravity along -z.
    pub fn world_from_visual(&self) -> UnitQuaternion<f64> {
        world_from_visual(&self.gravity)
    }
}

fn world_from_visual(gravity: &Vector3<f64>) -> UnitQuaternion<f64> {
    rotation_between_vectors(gravity, &-Vector3::z())
}

/// Per-interval quantities shared by every linear solve.
struct IntervalTerms {
    dt: f64,
    /// R_k ΔP_k (visual frame).
    rotated_dp: Vector3<f64>,
    /// R_k ΔV_k (visual frame).
    rotated_dv: Vector3<f64>,
    /// p_{k+1} − p_k (visual units).
    displacement: Vector3<f64>,
}

/// Gravity unknown in the stacked system.
#[derive(Clone, Copy)]
enum GravityParam<'a> {
    /// Full 3D vector.
    Free,
    /// 2D correction `g + B δ` around a fixed-magnitude estimate.
    Tangent {
        gravity: &'a Vector3<f64>,
        basis: &'a Matrix3x2<f64>,
    },
}

/// Visual-inertial alignment engine. Stateless between calls.
#[derive(Debug, Clone, Default)]
pub struct AlignmentEngine {
    config: AlignmentConfig,
}

impl AlignmentEngine {
    pub fn new(config: AlignmentConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AlignmentConfig {
        &self.config
    }

    /// Stage 1: gyroscope bias from rotation consistency.
    pub fn estimate_gyroscope_bias(
        &self,
        window: &AlignmentWindow,
        initial: &ImuBias,
    ) -> Result<Vector3<f64>> {
        gyro_bias::estimate_gyroscope_bias(window, &initial.gyro, &self.config)
    }

    /// Stage 2: orthonormal basis of the plane orthogonal to `v`.
    pub fn tangent_basis(v: &Vector3<f64>) -> Option<Matrix3x2<f64>> {
        tangent::tangent_basis(v)
    }

    /// Stage 1 followed by stage 3 with the refined gyroscope bias.
    pub fn align(&self, window: &AlignmentWindow, initial: &ImuBias) -> Result<AlignmentResult> {
        let gyro_bias = self.estimate_gyroscope_bias(window, initial)?;
        debug!(
            "Gyro bias estimate: [{:.6}, {:.6}, {:.6}]",
            gyro_bias.x, gyro_bias.y, gyro_bias.z
        );
        self.align_visual_inertial(window, &initial.with_gyro(gyro_bias))
    }

    /// Stage 3: gravity, velocities and scale for a fixed bias.
    ///
    /// Deltas are corrected to `bias` to first order; the accelerometer bias
    /// is not estimated.
    pub fn align_visual_inertial(
        &self,
        window: &AlignmentWindow,
        bias: &ImuBias,
    ) -> Result<AlignmentResult> {
        let config = &self.config;
        let terms = self.interval_terms(window, bias)?;
        let num_keyframes = window.num_keyframes();

        if config.estimate_scale {
            let path = window.path_length();
            if path < config.min_translation {
                return Err(InitError::DegenerateMotion(format!(
                    "visual path length {path:.3e} below {:.3e}",
                    config.min_translation
                )));
            }
        }

        // Initial unconstrained solve
        let layout = StateLayout::new(num_keyframes, 3, config.estimate_scale);
        let (a, b) = build_system(&terms, &layout, GravityParam::Free);
        let solution = solve_equilibrated(&a, &b, config)?;
        let g0 = solution.x.fixed_rows::<3>(layout.gravity_start()).into_owned();

        let magnitude = g0.norm();
        debug!(
            "Unconstrained gravity [{:.4}, {:.4}, {:.4}] (|g| = {:.4}, cond = {:.3e})",
            g0.x, g0.y, g0.z, magnitude, solution.condition
        );
        if !magnitude.is_finite()
            || (magnitude - config.gravity_magnitude).abs() > config.gravity_magnitude_tolerance
        {
            return Err(InitError::OutOfToleranceResult {
                estimated: magnitude,
                nominal: config.gravity_magnitude,
            });
        }

        // Tangent-space refinement with |g| pinned
        let layout = StateLayout::new(num_keyframes, 2, config.estimate_scale);
        let mut gravity = g0 * (config.gravity_magnitude / magnitude);
        let mut iterations = 0;

        let (last, converged) = loop {
            let basis = tangent::tangent_basis(&gravity).ok_or_else(|| {
                InitError::DegenerateMotion("gravity estimate collapsed to zero".into())
            })?;
            let (a, b) = build_system(
                &terms,
                &layout,
                GravityParam::Tangent {
                    gravity: &gravity,
                    basis: &basis,
                },
            );
            let solution = solve_equilibrated(&a, &b, config)?;
            let delta = solution.x.fixed_rows::<2>(layout.gravity_start()).into_owned();

            gravity = (gravity + basis * delta).normalize() * config.gravity_magnitude;
            iterations += 1;

            debug!("Gravity refinement {}: |δ| = {:.3e}", iterations, delta.norm());
            if delta.norm() < config.convergence_tolerance {
                break (solution, true);
            }
            if iterations >= config.max_iterations {
                break (solution, false);
            }
        };

        if !converged {
            warn!(
                "Gravity refinement did not converge in {} iterations",
                config.max_iterations
            );
        }

        self.finish(window, bias, &layout, last, gravity, iterations, converged)
    }

    fn interval_terms(
        &self,
        window: &AlignmentWindow,
        bias: &ImuBias,
    ) -> Result<Vec<IntervalTerms>> {
        let config = &self.config;
        let num_intervals = window.num_intervals();
        if num_intervals < config.min_intervals {
            return Err(InitError::InsufficientData(format!(
                "alignment needs {} intervals, window has {}",
                config.min_intervals, num_intervals
            )));
        }

        let poses = window.poses();
        window
            .pims()
            .iter()
            .zip(window.delta_t())
            .enumerate()
            .map(|(k, (pim, &camera_dt))| {
                let dt = pim.dt();
                if (dt - camera_dt).abs() > config.max_time_misalignment_s {
                    return Err(InitError::InvalidWindow(format!(
                        "interval {k}: imu span {dt:.6} s vs camera delta {camera_dt:.6} s"
                    )));
                }
                let rotation = poses[k].pose.rotation;
                Ok(IntervalTerms {
                    dt,
                    rotated_dp: rotation * pim.delta_position_corrected(bias),
                    rotated_dv: rotation * pim.delta_velocity_corrected(bias),
                    displacement: poses[k + 1].pose.translation - poses[k].pose.translation,
                })
            })
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        window: &AlignmentWindow,
        bias: &ImuBias,
        layout: &StateLayout,
        solution: LinearSolution,
        gravity: Vector3<f64>,
        iterations: usize,
        converged: bool,
    ) -> Result<AlignmentResult> {
        let x = &solution.x;
        let scale = layout.scale_index().map_or(1.0, |idx| x[idx]);
        if !scale.is_finite() || scale <= 0.0 {
            return Err(InitError::DegenerateMotion(format!(
                "non-positive scale estimate {scale:.4e}"
            )));
        }

        let velocities: Vec<Vector3<f64>> = (0..window.num_keyframes())
            .map(|k| x.fixed_rows::<3>(layout.vel_start(k)).into_owned())
            .collect();

        let first = &window.poses()[0].pose;
        let visual_nav_state = NavState::new(
            SE3::new(first.rotation, first.translation * scale),
            velocities[0],
        );
        let r_wv = world_from_visual(&gravity);
        let nav_state = NavState::new(
            SE3::new(r_wv * first.rotation, r_wv * visual_nav_state.pose.translation),
            r_wv * velocities[0],
        );

        info!(
            "Aligned {} keyframes: gravity [{:.4}, {:.4}, {:.4}], scale {:.4}, {} iterations",
            window.num_keyframes(),
            gravity.x,
            gravity.y,
            gravity.z,
            scale,
            iterations
        );

        Ok(AlignmentResult {
            gyro_bias: bias.gyro,
            bias: *bias,
            gravity,
            velocities,
            scale,
            nav_state,
            visual_nav_state,
            iterations,
            converged,
            condition_number: solution.condition,
        })
    }
}

/// Stack the position and velocity rows of every interval.
fn build_system(
    terms: &[IntervalTerms],
    layout: &StateLayout,
    gravity: GravityParam<'_>,
) -> (DMatrix<f64>, DVector<f64>) {
    let mut a = DMatrix::zeros(layout.total_rows(), layout.total_params());
    let mut b = DVector::zeros(layout.total_rows());
    let identity = Matrix3::<f64>::identity();
    let g_col = layout.gravity_start();

    for (k, term) in terms.iter().enumerate() {
        let dt = term.dt;
        let half_dt2 = 0.5 * dt * dt;
        let pos_row = 6 * k;
        let vel_row = pos_row + 3;

        // Position: v_k Δt + ½ g Δt² − s Δp = −R_k ΔP
        a.fixed_view_mut::<3, 3>(pos_row, layout.vel_start(k))
            .copy_from(&(identity * dt));
        let mut pos_rhs = -term.rotated_dp;

        // Velocity: v_{k+1} − v_k − g Δt = R_k ΔV
        a.fixed_view_mut::<3, 3>(vel_row, layout.vel_start(k))
            .copy_from(&(-identity));
        a.fixed_view_mut::<3, 3>(vel_row, layout.vel_start(k + 1))
            .copy_from(&identity);
        let mut vel_rhs = term.rotated_dv;

        match gravity {
            GravityParam::Free => {
                a.fixed_view_mut::<3, 3>(pos_row, g_col)
                    .copy_from(&(identity * half_dt2));
                a.fixed_view_mut::<3, 3>(vel_row, g_col)
                    .copy_from(&(identity * -dt));
            }
            GravityParam::Tangent { gravity, basis } => {
                a.fixed_view_mut::<3, 2>(pos_row, g_col)
                    .copy_from(&(basis * half_dt2));
                a.fixed_view_mut::<3, 2>(vel_row, g_col)
                    .copy_from(&(basis * -dt));
                pos_rhs -= gravity * half_dt2;
                vel_rhs += gravity * dt;
            }
        }

        match layout.scale_index() {
            Some(s_col) => {
                a.fixed_view_mut::<3, 1>(pos_row, s_col)
                    .copy_from(&(-term.displacement));
            }
            None => pos_rhs += term.displacement,
        }

        b.fixed_rows_mut::<3>(pos_row).copy_from(&pos_rhs);
        b.fixed_rows_mut::<3>(vel_row).copy_from(&vel_rhs);
    }

    (a, b)
}
