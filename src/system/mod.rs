//! Bootstrap orchestration and thread management.
//!
//! This module contains the synchronous `Initializer`, the threaded
//! `VioBootstrap` that drives it, shared state and inter-thread messaging
//! types.

mod bootstrap;
pub mod initializer;
pub mod messages;
pub mod shared_state;

pub use bootstrap::VioBootstrap;
pub use initializer::{Initializer, WindowConfig};
pub use messages::NewKeyFrameMsg;
pub use shared_state::SharedState;
