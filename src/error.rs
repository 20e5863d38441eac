//! Error taxonomy for the initialization pipeline.
//!
//! Every failure is non-fatal: the current attempt is abandoned and retried
//! later with an extended or shifted window. `BufferNotYetReady` and
//! `KeyframeQueueFull` are transient: the same request may succeed later.

use thiserror::Error;

/// Reasons an initialization step can fail.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InitError {
    /// Too few samples, intervals or keyframes to solve for the unknowns.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// The stacked linear system has no unique solution.
    #[error("rank-deficient system: {0}")]
    RankDeficient(String),

    /// The stacked linear system is solvable but numerically unreliable.
    #[error("ill-conditioned system (condition number {condition:.3e}, limit {limit:.3e})")]
    IllConditioned { condition: f64, limit: f64 },

    /// Rotation or translation too small to observe the unknowns.
    #[error("degenerate motion: {0}")]
    DegenerateMotion(String),

    /// Estimated gravity magnitude is too far from the nominal constant.
    #[error("gravity magnitude {estimated:.4} m/s^2 deviates from nominal {nominal:.4} m/s^2")]
    OutOfToleranceResult { estimated: f64, nominal: f64 },

    /// Requested range is older than the oldest retained sample.
    #[error("imu range ({from_ns}, {to_ns}] is no longer buffered (oldest {oldest_ns})")]
    BufferGap { from_ns: u64, to_ns: u64, oldest_ns: u64 },

    /// Requested range ends after the newest buffered sample.
    #[error("imu data up to {to_ns} not yet buffered (newest {newest_ns:?})")]
    BufferNotYetReady { to_ns: u64, newest_ns: Option<u64> },

    /// A sample did not advance the buffer's clock.
    #[error("non-monotonic imu timestamp {timestamp_ns} (last accepted {last_ns})")]
    NonMonotonicTimestamp { timestamp_ns: u64, last_ns: u64 },

    /// The initialization thread did not accept a keyframe in time.
    #[error("keyframe at {timestamp_ns} dropped: initialization queue full")]
    KeyframeQueueFull { timestamp_ns: u64 },

    /// The buffer was shut down while a reader was waiting.
    #[error("imu buffer shut down")]
    BufferShutdown,

    /// Malformed range query.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Window violates its structural invariants.
    #[error("invalid alignment window: {0}")]
    InvalidWindow(String),

    /// Configuration value out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl InitError {
    /// True when retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::BufferNotYetReady { .. } | Self::KeyframeQueueFull { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, InitError>;
