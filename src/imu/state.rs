//! Initialization state tracking and the navigation state handed downstream.

use nalgebra::Vector3;

use crate::geometry::SE3;

/// State of the inertial initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitState {
    /// Waiting for enough keyframes/data.
    #[default]
    NotInitialized,
    /// Alignment attempts in progress.
    Initializing,
    /// Successfully initialized; result delivered.
    Initialized,
}

/// Navigation state: pose plus velocity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NavState {
    pub pose: SE3,
    pub velocity: Vector3<f64>,
}

impl NavState {
    pub fn new(pose: SE3, velocity: Vector3<f64>) -> Self {
        Self { pose, velocity }
    }
}

impl Default for NavState {
    fn default() -> Self {
        Self {
            pose: SE3::identity(),
            velocity: Vector3::zeros(),
        }
    }
}
