//! SO(3) Lie group utilities for IMU preintegration and gravity alignment.
//!
//! Provides skew-symmetric matrix construction and the right Jacobian Jr(φ)
//! following the convention in Forster et al. "IMU Preintegration on Manifold".

use nalgebra::{Matrix3, Unit, UnitQuaternion, Vector3};

/// Small angle threshold for numerical stability.
const SMALL_ANGLE_THRESHOLD: f64 = 1e-6;

/// Constructs the skew-symmetric matrix [v]× such that [v]× u = v × u.
///
/// ```text
/// [v]× = |  0   -v_z   v_y |
///        |  v_z   0   -v_x |
///        | -v_y  v_x    0  |
/// ```
#[inline]
#[rustfmt::skip]
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v.z, v.y,
        v.z, 0.0, -v.x,
        -v.y, v.x, 0.0,
    )
}

/// Computes the right Jacobian Jr(φ) of SO(3).
///
/// ```text
/// Jr(φ) = I - (1 - cos|φ|)/|φ|² [φ]× + (|φ| - sin|φ|)/|φ|³ [φ]×²
/// ```
///
/// For small angles (|φ| < ε) the first-order form `I - 0.5 [φ]×` is used.
pub fn right_jacobian_so3(phi: &Vector3<f64>) -> Matrix3<f64> {
    let theta = phi.norm();

    if theta < SMALL_ANGLE_THRESHOLD {
        return Matrix3::identity() - 0.5 * skew(phi);
    }

    let theta_sq = theta * theta;
    let theta_cu = theta_sq * theta;

    let skew_phi = skew(phi);
    let skew_phi_sq = skew_phi * skew_phi;

    Matrix3::identity() - ((1.0 - theta.cos()) / theta_sq) * skew_phi
        + ((theta - theta.sin()) / theta_cu) * skew_phi_sq
}

/// Compute the rotation that transforms direction `from` onto direction `to`.
///
/// Neither input needs to be unit length. Anti-parallel inputs rotate by π
/// about an axis perpendicular to `from`.
pub fn rotation_between_vectors(from: &Vector3<f64>, to: &Vector3<f64>) -> UnitQuaternion<f64> {
    let from_normalized = from.normalize();
    let to_normalized = to.normalize();

    let cross = from_normalized.cross(&to_normalized);
    let dot = from_normalized.dot(&to_normalized);

    if cross.norm() < 1e-10 {
        if dot > 0.0 {
            return UnitQuaternion::identity();
        }
        let perp = if from_normalized.x.abs() < 0.9 {
            Vector3::x()
        } else {
            Vector3::y()
        };
        let axis = Unit::new_normalize(from_normalized.cross(&perp));
        return UnitQuaternion::from_axis_angle(&axis, std::f64::consts::PI);
    }

    let angle = cross.norm().atan2(dot);
    UnitQuaternion::from_axis_angle(&Unit::new_normalize(cross), angle)
}
