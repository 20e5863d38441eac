//! Inertial data handling: sample buffering, preintegration and simulation.

pub mod buffer;
pub mod preintegration;
pub mod sample;
pub mod simulator;
pub mod state;
pub mod types;

pub use buffer::{BufferConfig, BufferStats, ImuBuffer, ImuRange};
pub use preintegration::{preintegrate, PreintegratedMeasurement, Preintegrator};
pub use sample::{ns_to_sec, ImuBias, ImuParams, ImuSample, GRAVITY_MAGNITUDE};
pub use state::{InitState, NavState};
