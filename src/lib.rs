pub mod alignment;
pub mod config;
pub mod error;
pub mod geometry;
pub mod imu;
pub mod system;

pub use error::{InitError, Result};
