//! Alignment window: keyframe poses with the inertial summaries between them.

use crate::error::{InitError, Result};
use crate::geometry::SE3;
use crate::imu::{ns_to_sec, PreintegratedMeasurement};

/// Body pose in the visual reference frame at a keyframe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisualPose {
    pub timestamp_ns: u64,
    pub pose: SE3,
}

impl VisualPose {
    pub fn new(timestamp_ns: u64, pose: SE3) -> Self {
        Self { timestamp_ns, pose }
    }
}

/// N keyframe poses, N-1 camera time deltas and N-1 preintegrated
/// measurements, in temporal order.
#[derive(Debug, Clone)]
pub struct AlignmentWindow {
    poses: Vec<VisualPose>,
    delta_t: Vec<f64>,
    pims: Vec<PreintegratedMeasurement>,
}

impl AlignmentWindow {
    pub fn new(
        poses: Vec<VisualPose>,
        delta_t: Vec<f64>,
        pims: Vec<PreintegratedMeasurement>,
    ) -> Result<Self> {
        if poses.len() != pims.len() + 1 || poses.len() != delta_t.len() + 1 {
            return Err(InitError::InvalidWindow(format!(
                "{} poses need {} deltas and {} measurements, got {} and {}",
                poses.len(),
                poses.len().saturating_sub(1),
                poses.len().saturating_sub(1),
                delta_t.len(),
                pims.len()
            )));
        }
        if let Some(dt) = delta_t.iter().find(|dt| !dt.is_finite() || **dt <= 0.0) {
            return Err(InitError::InvalidWindow(format!(
                "time deltas must be positive, got {dt}"
            )));
        }
        if poses
            .windows(2)
            .any(|pair| pair[1].timestamp_ns <= pair[0].timestamp_ns)
        {
            return Err(InitError::InvalidWindow(
                "keyframe timestamps must be strictly increasing".into(),
            ));
        }
        Ok(Self {
            poses,
            delta_t,
            pims,
        })
    }

    /// Build from poses and measurements, deriving deltas from pose timestamps.
    pub fn from_keyframes(
        poses: Vec<VisualPose>,
        pims: Vec<PreintegratedMeasurement>,
    ) -> Result<Self> {
        let delta_t = poses
            .windows(2)
            .map(|pair| ns_to_sec(pair[1].timestamp_ns.saturating_sub(pair[0].timestamp_ns)))
            .collect();
        Self::new(poses, delta_t, pims)
    }

    pub fn poses(&self) -> &[VisualPose] {
        &self.poses
    }

    pub fn delta_t(&self) -> &[f64] {
        &self.delta_t
    }

    pub fn pims(&self) -> &[PreintegratedMeasurement] {
        &self.pims
    }

    pub fn num_keyframes(&self) -> usize {
        self.poses.len()
    }

    pub fn num_intervals(&self) -> usize {
        self.pims.len()
    }

    /// Sum of distances between consecutive keyframe positions.
    pub fn path_length(&self) -> f64 {
        self.poses
            .windows(2)
            .map(|pair| (pair[1].pose.translation - pair[0].pose.translation).norm())
            .sum()
    }

    /// Time between the first and last keyframe (s).
    pub fn duration(&self) -> f64 {
        self.delta_t.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imu::{preintegrate, ImuBias, ImuParams, ImuSample};
    use nalgebra::{UnitQuaternion, Vector3};

    fn pim(start_ns: u64, end_ns: u64) -> PreintegratedMeasurement {
        let samples = [
            ImuSample::new(start_ns, Vector3::new(0.0, 0.0, 9.81), Vector3::zeros()),
            ImuSample::new(end_ns, Vector3::new(0.0, 0.0, 9.81), Vector3::zeros()),
        ];
        preintegrate(&samples, &ImuBias::zero(), &ImuParams::default()).unwrap()
    }

    fn pose_at(t: u64, x: f64) -> VisualPose {
        VisualPose::new(t, SE3::new(UnitQuaternion::identity(), Vector3::new(x, 0.0, 0.0)))
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let poses = vec![pose_at(0, 0.0), pose_at(100_000_000, 1.0), pose_at(200_000_000, 2.0)];
        let pims = vec![pim(0, 100_000_000)];
        assert!(matches!(
            AlignmentWindow::from_keyframes(poses, pims),
            Err(InitError::InvalidWindow(_))
        ));
    }

    #[test]
    fn test_from_keyframes_derives_deltas() {
        let poses = vec![pose_at(0, 0.0), pose_at(100_000_000, 1.0), pose_at(300_000_000, 3.0)];
        let pims = vec![pim(0, 100_000_000), pim(100_000_000, 300_000_000)];
        let window = AlignmentWindow::from_keyframes(poses, pims).unwrap();

        assert_eq!(window.num_keyframes(), 3);
        assert_eq!(window.num_intervals(), 2);
        assert!((window.delta_t()[1] - 0.2).abs() < 1e-12);
        assert!((window.duration() - 0.3).abs() < 1e-12);
        assert!((window.path_length() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_non_positive_delta_rejected() {
        let poses = vec![pose_at(0, 0.0), pose_at(100_000_000, 1.0)];
        let result = AlignmentWindow::new(poses, vec![0.0], vec![pim(0, 100_000_000)]);
        assert!(matches!(result, Err(InitError::InvalidWindow(_))));
    }
}
