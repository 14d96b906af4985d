//! Exponential landmark smoothing.

use crate::pose::{Landmark, LandmarkSet};

/// Default weight of the newest observation.
pub const DEFAULT_ALPHA: f32 = 0.65;

/// Per-landmark EMA over consecutive detections of one camera.
///
/// `alpha` weighs the current observation. A frame without a body clears the history, so
/// the next detection passes through unsmoothed.
#[derive(Clone, Debug)]
pub struct LandmarkSmoother {
    alpha: f32,
    prev: Option<LandmarkSet>,
}

impl LandmarkSmoother {
    pub fn new(alpha: f32) -> Self {
        Self { alpha, prev: None }
    }

    pub fn smooth(&mut self, current: Option<LandmarkSet>) -> Option<LandmarkSet> {
        let current = match current {
            Some(current) if !current.is_empty() => current,
            _ => {
                self.prev = None;
                return None;
            }
        };
        let prev = match self.prev.take() {
            Some(prev) => prev,
            None => {
                self.prev = Some(current.clone());
                return Some(current);
            }
        };

        debug_assert_eq!(
            prev.len(),
            current.len(),
            "landmark count changed between frames"
        );

        let a = self.alpha;
        let points = current
            .iter()
            .zip(prev.iter())
            .map(|(cur, old)| {
                Landmark::new(
                    cur.index,
                    a * cur.x + (1.0 - a) * old.x,
                    a * cur.y + (1.0 - a) * old.y,
                    a * cur.z + (1.0 - a) * old.z,
                )
            })
            .collect();
        let result = LandmarkSet::new(points);
        self.prev = Some(result.clone());
        Some(result)
    }

    pub fn reset(&mut self) {
        self.prev = None;
    }

    pub fn has_history(&self) -> bool {
        self.prev.is_some()
    }
}

impl Default for LandmarkSmoother {
    fn default() -> Self {
        Self::new(DEFAULT_ALPHA)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_at(x: f32, y: f32) -> LandmarkSet {
        LandmarkSet::new((0..3).map(|i| Landmark::new(i, x, y, 0.0)).collect())
    }

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn first_frame_passes_through() {
        let mut s = LandmarkSmoother::default();
        let first = set_at(0.3, 0.4);
        assert_eq!(s.smooth(Some(first.clone())), Some(first));
    }

    #[test]
    fn alpha_one_is_identity() {
        let mut s = LandmarkSmoother::new(1.0);
        s.smooth(Some(set_at(0.1, 0.1)));
        let out = s.smooth(Some(set_at(0.9, 0.5))).expect("smoothed");
        assert!(out.iter().all(|lm| approx_eq(lm.x, 0.9) && approx_eq(lm.y, 0.5)));
    }

    #[test]
    fn alpha_zero_pins_history() {
        let mut s = LandmarkSmoother::new(0.0);
        s.smooth(Some(set_at(0.2, 0.3)));
        for _ in 0..5 {
            let out = s.smooth(Some(set_at(0.8, 0.9))).expect("smoothed");
            assert!(out.iter().all(|lm| approx_eq(lm.x, 0.2) && approx_eq(lm.y, 0.3)));
        }
    }

    #[test]
    fn blends_with_previous() {
        let mut s = LandmarkSmoother::new(0.65);
        s.smooth(Some(set_at(0.0, 1.0)));
        let out = s.smooth(Some(set_at(1.0, 0.0))).expect("smoothed");
        let lm = out.get(1).expect("landmark");
        assert_eq!(lm.index, 1);
        assert!(approx_eq(lm.x, 0.65));
        assert!(approx_eq(lm.y, 0.35));
    }

    #[test]
    fn absent_input_clears_history() {
        let mut s = LandmarkSmoother::new(0.5);
        s.smooth(Some(set_at(0.0, 0.0)));
        assert!(s.smooth(None).is_none());
        assert!(!s.has_history());

        let fresh = set_at(1.0, 1.0);
        assert_eq!(s.smooth(Some(fresh.clone())), Some(fresh));
    }

    #[test]
    fn empty_detection_counts_as_absent() {
        let mut s = LandmarkSmoother::new(0.5);
        s.smooth(Some(set_at(0.0, 0.0)));
        assert!(s.smooth(Some(LandmarkSet::new(Vec::new()))).is_none());
        assert!(!s.has_history());

        let fresh = set_at(0.4, 0.4);
        assert_eq!(s.smooth(Some(fresh.clone())), Some(fresh));
    }

    #[test]
    fn reset_clears_history() {
        let mut s = LandmarkSmoother::new(0.5);
        s.smooth(Some(set_at(0.0, 0.0)));
        s.reset();
        let fresh = set_at(0.6, 0.6);
        assert_eq!(s.smooth(Some(fresh.clone())), Some(fresh));
    }
}
