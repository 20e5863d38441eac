//! Gyroscope bias from rotation consistency between camera and IMU.
//!
//! For each interval the preintegrated rotation, corrected for the current
//! bias guess, is compared with the relative camera rotation R_kᵀ R_{k+1}.
//! The residual Log(ΔR(b)ᵀ R_kᵀ R_{k+1}) is linear in the bias update
//! through ∂ΔR/∂b_g, so each Gauss-Newton step solves a 3×3 system.

use nalgebra::{Matrix3, Vector3};
use tracing::debug;

use super::config::AlignmentConfig;
use super::window::AlignmentWindow;
use crate::error::{InitError, Result};

/// Bias updates smaller than this end the Gauss-Newton loop.
const MIN_BIAS_STEP: f64 = 1e-12;

/// Estimate the gyroscope bias starting from `initial`.
pub fn estimate_gyroscope_bias(
    window: &AlignmentWindow,
    initial: &Vector3<f64>,
    config: &AlignmentConfig,
) -> Result<Vector3<f64>> {
    let num_intervals = window.num_intervals();
    if num_intervals < config.min_gyro_intervals {
        return Err(InitError::InsufficientData(format!(
            "gyroscope bias needs {} intervals, window has {}",
            config.min_gyro_intervals, num_intervals
        )));
    }

    let poses = window.poses();
    let mut bias_gyro = *initial;

    for iter in 0..config.gyro_bias_iterations {
        let mut normal = Matrix3::zeros();
        let mut rhs = Vector3::zeros();

        for (k, pim) in window.pims().iter().enumerate() {
            let relative = poses[k].pose.between(&poses[k + 1].pose).rotation;
            let predicted = pim.delta_rotation_corrected(&pim.bias().with_gyro(bias_gyro));
            let residual = (predicted.inverse() * relative).scaled_axis();

            let jac = pim.d_rot_d_bg();
            normal += jac.transpose() * jac;
            rhs += jac.transpose() * residual;
        }

        check_normal_matrix(&normal, config)?;
        let step = normal
            .cholesky()
            .map(|chol| chol.solve(&rhs))
            .ok_or_else(|| {
                InitError::RankDeficient("gyroscope bias normal matrix is not positive definite".into())
            })?;

        bias_gyro += step;
        debug!(
            "Gyro bias iteration {}: step {:.3e}, bias [{:.6}, {:.6}, {:.6}]",
            iter,
            step.norm(),
            bias_gyro.x,
            bias_gyro.y,
            bias_gyro.z
        );

        if step.norm() < MIN_BIAS_STEP {
            break;
        }
    }

    if !bias_gyro.iter().all(|x| x.is_finite()) {
        return Err(InitError::RankDeficient(
            "gyroscope bias estimate is not finite".into(),
        ));
    }
    Ok(bias_gyro)
}

fn check_normal_matrix(normal: &Matrix3<f64>, config: &AlignmentConfig) -> Result<()> {
    let eigenvalues = normal.symmetric_eigenvalues();
    let max = eigenvalues.max();
    let min = eigenvalues.min();
    if !max.is_finite() || max <= 0.0 || min <= config.rank_tolerance * max {
        return Err(InitError::RankDeficient(format!(
            "gyroscope bias normal matrix eigenvalues [{min:.3e}, {max:.3e}]"
        )));
    }
    Ok(())
}
