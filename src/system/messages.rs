//! Inter-thread message types.

use crate::alignment::VisualPose;
use crate::geometry::SE3;

/// Message sent to the initialization thread when the front-end creates a
/// new keyframe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewKeyFrameMsg {
    /// Timestamp in nanoseconds, on the IMU clock.
    pub timestamp_ns: u64,

    /// Body pose in the visual reference frame.
    pub pose: SE3,
}

impl From<NewKeyFrameMsg> for VisualPose {
    fn from(msg: NewKeyFrameMsg) -> Self {
        VisualPose::new(msg.timestamp_ns, msg.pose)
    }
}
