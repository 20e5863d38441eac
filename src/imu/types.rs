//! Type aliases for IMU covariance and Jacobian matrices.
//!
//! Preintegration covariance uses the 15-dimensional error state
//! [δθ, δv, δp, δb_a, δb_g].

use nalgebra::SMatrix;

/// 15×15 covariance of the combined preintegrated state.
pub type Matrix15 = SMatrix<f64, 15, 15>;

/// 15×6 Jacobian of the error state w.r.t. white measurement noise [n_a, n_g].
pub type Matrix15x6 = SMatrix<f64, 15, 6>;

/// 6×6 measurement noise covariance matrix.
pub type Matrix6 = SMatrix<f64, 6, 6>;

/// Row offsets of each block inside the 15-dimensional error state.
pub mod block {
    pub const ROT: usize = 0;
    pub const VEL: usize = 3;
    pub const POS: usize = 6;
    pub const BIAS_ACC: usize = 9;
    pub const BIAS_GYRO: usize = 12;
}
