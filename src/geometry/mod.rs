//! Geometry utilities: SE3 poses and SO(3) helpers.

pub mod se3;
pub mod so3;

pub use se3::SE3;
pub use so3::{right_jacobian_so3, rotation_between_vectors, skew};
