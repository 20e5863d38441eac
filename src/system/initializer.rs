//! Sliding-window initialization driver.
//!
//! Keyframes arrive in temporal order. For each one the IMU range since the
//! previous keyframe is pulled from the buffer and preintegrated; once the
//! window holds enough keyframes the alignment engine runs on every new
//! keyframe until it succeeds.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::alignment::{AlignmentConfig, AlignmentEngine, AlignmentResult, AlignmentWindow, VisualPose};
use crate::error::{InitError, Result};
use crate::imu::{preintegrate, ImuBias, ImuBuffer, ImuParams, PreintegratedMeasurement};

/// Sliding window configuration.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Keyframes needed before the first alignment attempt.
    pub min_keyframes: usize,
    /// The oldest keyframe is dropped beyond this size.
    pub max_keyframes: usize,
    /// How long to wait for IMU data covering a new keyframe (ms).
    pub imu_wait_timeout_ms: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            min_keyframes: 5,
            max_keyframes: 10,
            imu_wait_timeout_ms: 100,
        }
    }
}

impl WindowConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_keyframes < 2 {
            return Err(InitError::InvalidConfig(format!(
                "min_keyframes must be at least 2, got {}",
                self.min_keyframes
            )));
        }
        if self.max_keyframes < self.min_keyframes {
            return Err(InitError::InvalidConfig(format!(
                "max_keyframes {} is below min_keyframes {}",
                self.max_keyframes, self.min_keyframes
            )));
        }
        Ok(())
    }

    pub fn imu_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.imu_wait_timeout_ms)
    }
}

/// Synchronous initialization core: window bookkeeping plus alignment.
#[derive(Debug)]
pub struct Initializer {
    engine: AlignmentEngine,
    params: ImuParams,
    window_config: WindowConfig,
    bias: ImuBias,
    keyframes: VecDeque<VisualPose>,
    pims: VecDeque<PreintegratedMeasurement>,
    /// Keyframes waiting for IMU data.
    pending: VecDeque<VisualPose>,
    attempts: usize,
    result: Option<AlignmentResult>,
}

impl Initializer {
    pub fn new(
        alignment: AlignmentConfig,
        params: ImuParams,
        window_config: WindowConfig,
        initial_bias: ImuBias,
    ) -> Result<Self> {
        params.validate()?;
        window_config.validate()?;
        if window_config.min_keyframes <= alignment.min_intervals {
            return Err(InitError::InvalidConfig(format!(
                "min_keyframes {} gives fewer than {} intervals",
                window_config.min_keyframes, alignment.min_intervals
            )));
        }
        Ok(Self {
            engine: AlignmentEngine::new(alignment)?,
            params,
            window_config,
            bias: initial_bias,
            keyframes: VecDeque::new(),
            pims: VecDeque::new(),
            pending: VecDeque::new(),
            attempts: 0,
            result: None,
        })
    }

    /// Add a keyframe and, when the window is large enough, try to align.
    ///
    /// Returns `Ok(Some(result))` on the first successful alignment and
    /// `Ok(None)` while more keyframes are needed. `BufferNotYetReady`
    /// leaves the keyframe pending; call [`retry_pending`](Self::retry_pending)
    /// once more IMU data has arrived.
    pub fn process_keyframe(
        &mut self,
        keyframe: VisualPose,
        buffer: &ImuBuffer,
    ) -> Result<Option<AlignmentResult>> {
        if self.result.is_some() {
            return Ok(None);
        }
        self.pending.push_back(keyframe);
        self.retry_pending(buffer)
    }

    /// Process keyframes left pending by a previous `BufferNotYetReady`.
    pub fn retry_pending(&mut self, buffer: &ImuBuffer) -> Result<Option<AlignmentResult>> {
        while let Some(keyframe) = self.pending.front().copied() {
            match self.append_keyframe(keyframe, buffer) {
                Ok(()) => {
                    self.pending.pop_front();
                }
                Err(e) if e.is_transient() => return Err(e),
                Err(InitError::BufferShutdown) => return Err(InitError::BufferShutdown),
                Err(InitError::InvalidQuery(reason)) => {
                    warn!("Dropping keyframe at {} ns: {}", keyframe.timestamp_ns, reason);
                    self.pending.pop_front();
                    continue;
                }
                Err(e) => {
                    warn!(
                        "Restarting window at keyframe {} ns: {}",
                        keyframe.timestamp_ns, e
                    );
                    self.pending.pop_front();
                    self.reset_to(keyframe);
                    continue;
                }
            }

            if self.keyframes.len() < self.window_config.min_keyframes {
                continue;
            }
            if let Some(result) = self.try_align() {
                self.pending.clear();
                return Ok(Some(result));
            }
        }
        Ok(None)
    }

    fn append_keyframe(&mut self, keyframe: VisualPose, buffer: &ImuBuffer) -> Result<()> {
        let Some(previous) = self.keyframes.back().copied() else {
            self.keyframes.push_back(keyframe);
            return Ok(());
        };

        let range = buffer.wait_for_borders(
            previous.timestamp_ns,
            keyframe.timestamp_ns,
            self.window_config.imu_wait_timeout(),
        )?;
        let pim = preintegrate(&range.samples, &self.bias, &self.params)?;

        if self.keyframes.len() >= self.window_config.max_keyframes {
            self.drop_oldest();
        }
        self.keyframes.push_back(keyframe);
        self.pims.push_back(pim);
        debug!(
            "Window holds {} keyframes ({} IMU samples in last interval)",
            self.keyframes.len(),
            range.len()
        );
        Ok(())
    }

    fn try_align(&mut self) -> Option<AlignmentResult> {
        self.attempts += 1;
        let outcome = AlignmentWindow::from_keyframes(
            self.keyframes.iter().copied().collect(),
            self.pims.iter().cloned().collect(),
        )
        .and_then(|window| self.engine.align(&window, &self.bias));

        match outcome {
            Ok(result) => {
                info!(
                    "Initialized after {} attempts with {} keyframes",
                    self.attempts,
                    self.keyframes.len()
                );
                self.bias = result.bias;
                self.result = Some(result.clone());
                Some(result)
            }
            Err(e) => {
                warn!("Alignment attempt {} failed: {}", self.attempts, e);
                if self.keyframes.len() >= self.window_config.max_keyframes {
                    self.drop_oldest();
                }
                None
            }
        }
    }

    fn drop_oldest(&mut self) {
        self.keyframes.pop_front();
        self.pims.pop_front();
    }

    fn reset_to(&mut self, keyframe: VisualPose) {
        self.keyframes.clear();
        self.pims.clear();
        self.keyframes.push_back(keyframe);
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn num_keyframes(&self) -> usize {
        self.keyframes.len()
    }

    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn bias(&self) -> &ImuBias {
        &self.bias
    }

    pub fn result(&self) -> Option<&AlignmentResult> {
        self.result.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.result.is_some()
    }
}
