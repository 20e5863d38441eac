//! Shared state between the caller and the initialization thread.
//!
//! The `SharedState` struct holds all data that needs to be accessed by
//! multiple threads, protected by appropriate synchronization primitives.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::alignment::AlignmentResult;
use crate::imu::InitState;

/// Shared state accessible by the caller and the initialization thread.
#[derive(Debug, Default)]
pub struct SharedState {
    /// Progress of the initialization, written by the initialization thread.
    init_state: RwLock<InitState>,

    /// The successful alignment, once available.
    result: RwLock<Option<AlignmentResult>>,

    /// Number of alignment attempts made so far.
    attempts: AtomicUsize,

    /// Request the initialization thread to finish and exit.
    shutdown_requested: AtomicBool,
}

impl SharedState {
    /// Create a new SharedState in the `NotInitialized` state.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn init_state(&self) -> InitState {
        *self.init_state.read()
    }

    pub fn set_init_state(&self, state: InitState) {
        *self.init_state.write() = state;
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.init_state(), InitState::Initialized)
    }

    /// Store the result and mark the system initialized.
    pub fn publish_result(&self, result: AlignmentResult) {
        *self.result.write() = Some(result);
        self.set_init_state(InitState::Initialized);
    }

    pub fn result(&self) -> Option<AlignmentResult> {
        self.result.read().clone()
    }

    pub fn set_attempts(&self, attempts: usize) {
        self.attempts.store(attempts, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Request shutdown of the initialization thread.
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
    }

    /// Check if shutdown was requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }
}
