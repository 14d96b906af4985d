use std::collections::VecDeque;

use anyhow::Result;

use crate::frame::Frame;
use crate::pose::estimator::PoseEstimator;
use crate::pose::{lunge_pose, LandmarkSet, Side, View};

/// Replays a fixed sequence of estimates, one per call, then reports "not found".
pub struct ScriptedEstimator {
    script: VecDeque<Option<LandmarkSet>>,
}

impl ScriptedEstimator {
    pub fn new(script: impl IntoIterator<Item = Option<LandmarkSet>>) -> Self {
        Self {
            script: script.into_iter().collect(),
        }
    }

    /// Script built from lunge depths (see [`lunge_pose`]).
    pub fn from_depths(view: View, side: Side, depths: &[f32]) -> Self {
        Self::new(depths.iter().map(|&d| Some(lunge_pose(view, side, d))))
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl PoseEstimator for ScriptedEstimator {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn estimate(&mut self, _frame: &Frame) -> Result<Option<LandmarkSet>> {
        Ok(self.script.pop_front().flatten())
    }
}
