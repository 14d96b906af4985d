use anyhow::Result;
use rand::Rng;

use crate::frame::Frame;
use crate::pose::estimator::PoseEstimator;
use crate::pose::{index, Landmark, LandmarkSet, Side, View, LANDMARK_COUNT};

/// Thigh and shin length, normalized to frame height.
const SEGMENT: f32 = 0.21;
const STANDING_HIP_Y: f32 = 0.5;
const HIP_TRAVEL: f32 = 0.22;
const STRIDE: f32 = 0.19;
const FLOOR_Y: f32 = 0.92;
const DEFAULT_PERIOD: u64 = 90;

/// Synthetic estimator for testing and camera-less demos.
///
/// Ignores pixel content and plays back an endless lunge cycle: stand, descend, hold,
/// rise. Every cycle produces one clean repetition at Medium difficulty.
pub struct StubEstimator {
    view: View,
    side: Side,
    period: u64,
    jitter: f32,
    tick: u64,
}

impl StubEstimator {
    pub fn new(view: View) -> Self {
        Self {
            view,
            side: Side::Left,
            period: DEFAULT_PERIOD,
            jitter: 0.002,
            tick: 0,
        }
    }

    pub fn with_side(mut self, side: Side) -> Self {
        self.side = side;
        self
    }

    /// Number of frames per repetition cycle.
    pub fn with_period(mut self, period: u64) -> Self {
        self.period = period.max(10);
        self
    }

    /// Uniform landmark noise amplitude. Zero gives a deterministic stream.
    pub fn with_jitter(mut self, jitter: f32) -> Self {
        self.jitter = jitter.max(0.0);
        self
    }

    fn depth_at(&self, tick: u64) -> f32 {
        let t = (tick % self.period) as f32 / self.period as f32;
        match t {
            t if t < 0.3 => 0.0,
            t if t < 0.5 => (t - 0.3) / 0.2,
            t if t < 0.7 => 1.0,
            t if t < 0.9 => 1.0 - (t - 0.7) / 0.2,
            _ => 0.0,
        }
    }
}

impl PoseEstimator for StubEstimator {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn estimate(&mut self, _frame: &Frame) -> Result<Option<LandmarkSet>> {
        let depth = self.depth_at(self.tick);
        self.tick = self.tick.wrapping_add(1);

        let pose = lunge_pose(self.view, self.side, depth);
        if self.jitter == 0.0 {
            return Ok(Some(pose));
        }
        let mut rng = rand::thread_rng();
        let noisy = pose
            .iter()
            .map(|lm| {
                Landmark::new(
                    lm.index,
                    lm.x + rng.gen_range(-self.jitter..=self.jitter),
                    lm.y + rng.gen_range(-self.jitter..=self.jitter),
                    lm.z,
                )
            })
            .collect();
        Ok(Some(LandmarkSet::new(noisy)))
    }
}

/// Landmarks of a forward lunge at `depth` (0 standing, 1 bottom position).
///
/// The `side` leg steps forward. At full depth the front knee sits near 82° with a near
/// vertical shin and an upright torso, and the hip has dropped 0.22 below standing height.
pub fn lunge_pose(view: View, side: Side, depth: f32) -> LandmarkSet {
    let depth = depth.clamp(0.0, 1.0);
    let hip_y = STANDING_HIP_Y + HIP_TRAVEL * depth;
    let mut points: Vec<Landmark> = (0..LANDMARK_COUNT)
        .map(|i| Landmark::new(i, 0.5, hip_y - 0.2, 0.0))
        .collect();
    let mut set = |i: usize, (x, y): (f32, f32)| points[i] = Landmark::new(i, x, y, 0.0);

    let other = match side {
        Side::Left => Side::Right,
        Side::Right => Side::Left,
    };

    match view {
        View::Side => {
            let hip = (0.5, hip_y);
            let front_ankle = (hip.0 + STRIDE * depth, FLOOR_Y);
            let back_ankle = (hip.0 - STRIDE * depth, FLOOR_Y);
            set(index::NOSE, (hip.0 + 0.03, hip_y - 0.4));
            for s in [side, other] {
                set(s.shoulder(), (hip.0 + 0.02, hip_y - 0.3));
                set(s.hip(), hip);
            }
            set(side.ankle(), front_ankle);
            set(side.knee(), knee_between(hip, front_ankle, 1.0));
            set(side.foot_index(), (front_ankle.0 + 0.05, FLOOR_Y + 0.02));
            set(other.ankle(), back_ankle);
            set(other.knee(), knee_between(hip, back_ankle, -1.0));
            set(other.foot_index(), (back_ankle.0 + 0.05, FLOOR_Y + 0.02));
        }
        View::Front => {
            for (s, x) in [(side, 0.45), (other, 0.55)] {
                set(s.shoulder(), (x - (0.5 - x) * 0.6, hip_y - 0.3));
                set(s.hip(), (x, hip_y));
                set(s.knee(), (x, (hip_y + FLOOR_Y) / 2.0));
                set(s.ankle(), (x, FLOOR_Y));
                set(s.foot_index(), (x + (x - 0.5), FLOOR_Y + 0.02));
            }
            set(index::NOSE, (0.5, hip_y - 0.4));
        }
    }

    LandmarkSet::new(points)
}

/// Two-link knee placement between hip and ankle. `bend` selects the side of the hip-ankle
/// line the knee lands on.
fn knee_between(hip: (f32, f32), ankle: (f32, f32), bend: f32) -> (f32, f32) {
    let dx = ankle.0 - hip.0;
    let dy = ankle.1 - hip.1;
    let d = (dx * dx + dy * dy).sqrt();
    let mid = ((hip.0 + ankle.0) / 2.0, (hip.1 + ankle.1) / 2.0);
    if d <= f32::EPSILON {
        return mid;
    }
    let h = (SEGMENT * SEGMENT - (d / 2.0) * (d / 2.0)).max(0.0).sqrt();
    let n = (dy / d, -dx / d);
    (mid.0 + bend * h * n.0, mid.1 + bend * h * n.1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{front_features, side_features};

    #[test]
    fn standing_pose_is_straight_legged() {
        let pose = lunge_pose(View::Side, Side::Left, 0.0);
        assert_eq!(pose.len(), LANDMARK_COUNT);
        let features = side_features(&pose, Side::Left).expect("features");
        assert!(features.knee_angle > 170.0, "knee {}", features.knee_angle);
        assert!((features.hip_height - STANDING_HIP_Y).abs() < 1e-6);
    }

    #[test]
    fn bottom_pose_is_deep_with_clean_form() {
        let pose = lunge_pose(View::Side, Side::Left, 1.0);
        let features = side_features(&pose, Side::Left).expect("features");
        assert!(features.knee_angle < 90.0, "knee {}", features.knee_angle);
        assert!(features.shin_angle < 15.0, "shin {}", features.shin_angle);
        assert!(features.torso_lean < 10.0, "torso {}", features.torso_lean);
        assert!(features.hip_height - STANDING_HIP_Y > 0.2);
    }

    #[test]
    fn front_pose_has_aligned_knees() {
        let pose = lunge_pose(View::Front, Side::Left, 1.0);
        let features = front_features(&pose, Side::Left).expect("features");
        assert!(features.knee_deviation.abs() < 1e-3);
    }

    #[test]
    fn stub_cycle_reaches_depth_and_returns() -> Result<()> {
        let mut estimator = StubEstimator::new(View::Side)
            .with_period(20)
            .with_jitter(0.0);
        let frame = Frame::filled(4, 4, 0)?;
        let mut min_knee = f32::MAX;
        let mut last_knee = 0.0;
        for _ in 0..20 {
            let pose = estimator.estimate(&frame)?.expect("pose");
            let features = side_features(&pose, Side::Left).expect("features");
            min_knee = min_knee.min(features.knee_angle);
            last_knee = features.knee_angle;
        }
        assert!(min_knee < 90.0);
        assert!(last_knee > 170.0);
        Ok(())
    }
}
