//! SE3: rigid-body transformation (rotation + translation).
//!
//! Poses are stored as `T_ref_body`: they map points from the body frame into
//! the reference frame, `p_ref = R * p_body + t`.

use nalgebra::{UnitQuaternion, Vector3};

/// Rigid transformation with unit-quaternion rotation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SE3 {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl SE3 {
    /// Identity transformation.
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    pub fn new(rotation: UnitQuaternion<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Inverse transformation.
    pub fn inverse(&self) -> Self {
        let rot_inv = self.rotation.inverse();
        Self {
            rotation: rot_inv,
            translation: -(rot_inv * self.translation),
        }
    }

    /// Composition `self * other`.
    pub fn compose(&self, other: &SE3) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    /// Relative transformation `self^-1 * other`.
    pub fn between(&self, other: &SE3) -> Self {
        self.inverse().compose(other)
    }
}

impl Default for SE3 {
    fn default() -> Self {
        Self::identity()
    }
}
