//! Visual-inertial alignment: gyroscope bias, gravity, velocities and scale
//! from a short window of keyframes.

pub mod config;
pub mod engine;
pub mod gyro_bias;
mod linear;
pub mod tangent;
pub mod window;

pub use config::AlignmentConfig;
pub use engine::{AlignmentEngine, AlignmentResult};
pub use tangent::tangent_basis;
pub use window::{AlignmentWindow, VisualPose};
