//! Bootstrap system - entry point and thread orchestration.
//!
//! The `VioBootstrap` is the top-level struct that users interact with.
//! It owns the IMU buffer and shared state and spawns the initialization
//! thread, which consumes keyframes until alignment succeeds.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::alignment::AlignmentResult;
use crate::config::BootstrapConfig;
use crate::error::{InitError, Result};
use crate::geometry::SE3;
use crate::imu::{ImuBias, ImuBuffer, ImuSample, InitState};

use super::initializer::Initializer;
use super::messages::NewKeyFrameMsg;
use super::shared_state::SharedState;

/// Capacity of the keyframe channel to the initialization thread.
const KEYFRAME_CHANNEL_CAPACITY: usize = 5;

/// How long `add_keyframe` waits for room in a full keyframe channel.
const KEYFRAME_SEND_TIMEOUT: Duration = Duration::from_millis(100);

/// Timeout for receiving keyframes. Allows periodic shutdown checks.
const RECV_TIMEOUT: Duration = Duration::from_millis(50);

/// Visual-inertial bootstrap running on its own thread.
pub struct VioBootstrap {
    /// Shared state (init state, result, flags) accessible by all threads.
    shared: Arc<SharedState>,

    /// IMU samples, filled by the caller and read by the initialization thread.
    buffer: Arc<ImuBuffer>,

    /// Channel sender for keyframes (caller -> initialization thread).
    kf_sender: Option<Sender<NewKeyFrameMsg>>,

    /// Receives the result once alignment succeeds.
    result_receiver: Receiver<AlignmentResult>,

    /// Handle to the initialization thread.
    handle: Option<JoinHandle<()>>,
}

impl VioBootstrap {
    /// Validate the configuration and spawn the initialization thread.
    pub fn new(config: BootstrapConfig, initial_bias: ImuBias) -> Result<Self> {
        config.buffer.validate()?;
        let initializer =
            Initializer::new(config.alignment, config.imu, config.window, initial_bias)?;

        let shared = SharedState::new();
        let buffer = Arc::new(ImuBuffer::new(config.buffer));
        let (kf_sender, kf_receiver) = bounded::<NewKeyFrameMsg>(KEYFRAME_CHANNEL_CAPACITY);
        let (result_sender, result_receiver) = bounded::<AlignmentResult>(1);

        let handle = Self::spawn_initialization(
            initializer,
            shared.clone(),
            buffer.clone(),
            kf_receiver,
            result_sender,
        );

        Ok(Self {
            shared,
            buffer,
            kf_sender: Some(kf_sender),
            result_receiver,
            handle: Some(handle),
        })
    }

    fn spawn_initialization(
        mut initializer: Initializer,
        shared: Arc<SharedState>,
        buffer: Arc<ImuBuffer>,
        kf_receiver: Receiver<NewKeyFrameMsg>,
        result_sender: Sender<AlignmentResult>,
    ) -> JoinHandle<()> {
        thread::spawn(move || {
            loop {
                if shared.is_shutdown_requested() {
                    break;
                }

                let outcome = match kf_receiver.recv_timeout(RECV_TIMEOUT) {
                    Ok(msg) => {
                        shared.set_init_state(InitState::Initializing);
                        initializer.process_keyframe(msg.into(), &buffer)
                    }
                    Err(RecvTimeoutError::Timeout) if initializer.has_pending() => {
                        initializer.retry_pending(&buffer)
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                };

                shared.set_attempts(initializer.attempts());

                match outcome {
                    Ok(Some(result)) => {
                        shared.publish_result(result.clone());
                        if result_sender.send(result).is_err() {
                            debug!("Result receiver dropped; result kept in shared state");
                        }
                        break;
                    }
                    Ok(None) => {}
                    Err(InitError::BufferShutdown) => break,
                    Err(e) if e.is_transient() => {
                        debug!("Waiting for IMU data: {}", e);
                    }
                    Err(e) => warn!("Initialization step failed: {}", e),
                }
            }
            debug!("Initialization thread exiting");
        })
    }

    /// Push a raw IMU sample into the buffer.
    pub fn add_imu_measurement(&self, sample: ImuSample) -> Result<()> {
        self.buffer.add_measurement(sample)
    }

    /// Hand a new keyframe pose to the initialization thread.
    ///
    /// Keyframes arriving after initialization are ignored. If the
    /// initialization thread is busy and the channel stays full for
    /// `KEYFRAME_SEND_TIMEOUT`, the keyframe is rejected with the transient
    /// `KeyframeQueueFull`.
    pub fn add_keyframe(&self, timestamp_ns: u64, pose: SE3) -> Result<()> {
        if self.shared.is_initialized() {
            return Ok(());
        }
        let sender = self.kf_sender.as_ref().ok_or(InitError::BufferShutdown)?;
        match sender.send_timeout(NewKeyFrameMsg { timestamp_ns, pose }, KEYFRAME_SEND_TIMEOUT) {
            Ok(()) => Ok(()),
            Err(_) if self.shared.is_initialized() => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => {
                warn!("Keyframe channel full, dropping keyframe at {} ns", timestamp_ns);
                Err(InitError::KeyframeQueueFull { timestamp_ns })
            }
            Err(SendTimeoutError::Disconnected(_)) => Err(InitError::BufferShutdown),
        }
    }

    /// The alignment result, if initialization has finished.
    pub fn try_result(&self) -> Option<AlignmentResult> {
        self.shared.result()
    }

    /// Block until initialization finishes or `timeout` elapses.
    pub fn wait_for_result(&self, timeout: Duration) -> Option<AlignmentResult> {
        if let Some(result) = self.try_result() {
            return Some(result);
        }
        self.result_receiver
            .recv_timeout(timeout)
            .ok()
            .or_else(|| self.try_result())
    }

    pub fn state(&self) -> InitState {
        self.shared.init_state()
    }

    /// Get a reference to the shared state.
    pub fn shared_state(&self) -> &Arc<SharedState> {
        &self.shared
    }

    pub fn buffer(&self) -> &Arc<ImuBuffer> {
        &self.buffer
    }

    /// Shutdown the system gracefully.
    ///
    /// Signals the initialization thread, wakes any buffer waiter and joins.
    pub fn shutdown(&mut self) {
        self.shared.request_shutdown();
        self.buffer.shutdown();
        self.kf_sender.take();

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Initialization thread panicked");
            } else {
                info!("Bootstrap shut down ({} alignment attempts)", self.shared.attempts());
            }
        }
    }
}

impl Drop for VioBootstrap {
    fn drop(&mut self) {
        self.shutdown();
    }
}
