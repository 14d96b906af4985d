use anyhow::Result;

use super::LandmarkSet;
use crate::frame::Frame;

/// Pose estimator contract.
///
/// Implementations receive a borrowed RGB frame and return the landmarks of the single
/// tracked body, or `None` when no body is found. They must not keep the frame past the call.
pub trait PoseEstimator: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Estimate the body pose in a frame.
    fn estimate(&mut self, frame: &Frame) -> Result<Option<LandmarkSet>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
