//! Joint angles and per-view feature sets.
//!
//! All inputs are normalized image coordinates (`y` grows downwards). Every angle is a
//! 2D angle in degrees within [0, 180], rounded to one decimal.

use serde::{Deserialize, Serialize};

use crate::pose::{LandmarkSet, Side};

/// Offset of the synthetic vertical reference point above a joint.
const VERTICAL_OFFSET: f32 = 0.5;

/// 2D point in normalized image coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f32,
    pub y: f32,
}

impl Point2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    fn above(&self, offset: f32) -> Self {
        Self::new(self.x, self.y - offset)
    }
}

/// Angle at `b` between rays `b→a` and `b→c`, reflected into [0, 180] and rounded to 0.1°.
pub fn angle(a: Point2, b: Point2, c: Point2) -> f32 {
    let radians = (c.y - b.y).atan2(c.x - b.x) - (a.y - b.y).atan2(a.x - b.x);
    let mut degrees = radians.to_degrees().abs();
    if degrees > 180.0 {
        degrees = 360.0 - degrees;
    }
    (degrees * 10.0).round() / 10.0
}

/// Features read from the side camera.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SideFeatures {
    /// Hip-knee-ankle angle. 180 is a straight leg.
    pub knee_angle: f32,
    /// Shoulder-hip angle against vertical.
    pub torso_lean: f32,
    /// Knee-ankle angle against vertical.
    pub shin_angle: f32,
    /// Horizontal distance between both ankles.
    pub foot_spread: f32,
    /// Hip `y`; larger means lower.
    pub hip_height: f32,
    pub shoulder: Point2,
    pub hip: Point2,
    pub knee: Point2,
    pub ankle: Point2,
}

/// Features read from the front camera.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrontFeatures {
    /// Knee `x` minus the hip/ankle midline. The sign tells inward from outward.
    pub knee_deviation: f32,
    pub knee: Point2,
}

fn point(set: &LandmarkSet, index: usize) -> Option<Point2> {
    set.get(index).map(|lm| Point2::new(lm.x, lm.y))
}

pub fn side_features(set: &LandmarkSet, side: Side) -> Option<SideFeatures> {
    if !set.is_complete() {
        return None;
    }
    let shoulder = point(set, side.shoulder())?;
    let hip = point(set, side.hip())?;
    let knee = point(set, side.knee())?;
    let ankle = point(set, side.ankle())?;
    let left_ankle = point(set, Side::Left.ankle())?;
    let right_ankle = point(set, Side::Right.ankle())?;

    Some(SideFeatures {
        knee_angle: angle(hip, knee, ankle),
        torso_lean: angle(shoulder, hip, hip.above(VERTICAL_OFFSET)),
        shin_angle: angle(knee, ankle, ankle.above(VERTICAL_OFFSET)),
        foot_spread: (left_ankle.x - right_ankle.x).abs(),
        hip_height: hip.y,
        shoulder,
        hip,
        knee,
        ankle,
    })
}

pub fn front_features(set: &LandmarkSet, side: Side) -> Option<FrontFeatures> {
    if !set.is_complete() {
        return None;
    }
    let hip = point(set, side.hip())?;
    let knee = point(set, side.knee())?;
    let ankle = point(set, side.ankle())?;

    Some(FrontFeatures {
        knee_deviation: knee.x - (hip.x + ankle.x) / 2.0,
        knee,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{Landmark, LANDMARK_COUNT};

    fn p(x: f32, y: f32) -> Point2 {
        Point2::new(x, y)
    }

    #[test]
    fn right_angle() {
        assert_eq!(angle(p(1.0, 0.0), p(0.0, 0.0), p(0.0, 1.0)), 90.0);
    }

    #[test]
    fn straight_line_is_180() {
        assert_eq!(angle(p(0.0, 0.0), p(0.0, 0.5), p(0.0, 1.0)), 180.0);
    }

    #[test]
    fn angle_is_symmetric_and_bounded() {
        let cases = [
            (p(0.1, 0.2), p(0.5, 0.5), p(0.9, 0.1)),
            (p(0.3, 0.9), p(0.4, 0.4), p(0.2, 0.1)),
            (p(0.0, 0.0), p(0.5, 0.5), p(1.0, 0.0)),
            (p(0.9, 0.9), p(0.1, 0.1), p(0.1, 0.9)),
        ];
        for (a, b, c) in cases {
            let forward = angle(a, b, c);
            assert_eq!(forward, angle(c, b, a));
            assert!((0.0..=180.0).contains(&forward), "{}", forward);
        }
    }

    #[test]
    fn angle_rounds_to_one_decimal() {
        let value = angle(p(1.0, 0.0), p(0.0, 0.0), p(1.0, 0.37));
        assert_eq!(value, (value * 10.0).round() / 10.0);
    }

    fn body_with(overrides: &[(usize, f32, f32)]) -> LandmarkSet {
        let mut points: Vec<Landmark> = (0..LANDMARK_COUNT)
            .map(|i| Landmark::new(i, 0.5, 0.5, 0.0))
            .collect();
        for &(i, x, y) in overrides {
            points[i] = Landmark::new(i, x, y, 0.0);
        }
        LandmarkSet::new(points)
    }

    #[test]
    fn side_features_measure_lean_and_shin() {
        let body = body_with(&[
            (11, 0.6, 0.2),
            (23, 0.5, 0.5),
            (25, 0.7, 0.5),
            (27, 0.7, 0.8),
            (28, 0.3, 0.8),
        ]);
        let f = side_features(&body, Side::Left).expect("features");
        assert_eq!(f.knee_angle, 90.0);
        assert_eq!(f.shin_angle, 0.0);
        assert_eq!(f.torso_lean, 18.4);
        assert!((f.foot_spread - 0.4).abs() < 1e-6);
        assert_eq!(f.hip_height, 0.5);
        assert_eq!(f.knee, p(0.7, 0.5));
    }

    #[test]
    fn right_side_reads_right_landmarks() {
        let body = body_with(&[(24, 0.5, 0.4), (26, 0.5, 0.6), (28, 0.5, 0.8)]);
        let f = side_features(&body, Side::Right).expect("features");
        assert_eq!(f.knee_angle, 180.0);
        assert_eq!(f.hip_height, 0.4);
    }

    #[test]
    fn front_features_report_signed_deviation() {
        let body = body_with(&[(23, 0.40, 0.5), (25, 0.46, 0.7), (27, 0.40, 0.9)]);
        let f = front_features(&body, Side::Left).expect("features");
        assert!((f.knee_deviation - 0.06).abs() < 1e-6);
    }

    #[test]
    fn incomplete_body_yields_nothing() {
        let partial = LandmarkSet::new((0..20).map(|i| Landmark::new(i, 0.5, 0.5, 0.0)).collect());
        assert!(side_features(&partial, Side::Left).is_none());
        assert!(front_features(&partial, Side::Left).is_none());
    }
}
