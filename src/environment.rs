//! Lighting and framing checks.
//!
//! These run on a slow cadence and their results are cached between runs, so the tick loop
//! only pays for them every `interval` ticks.

use serde::Serialize;

use crate::frame::Frame;
use crate::pose::{index, LandmarkSet, View};

pub const TOO_DARK_LUMA: f32 = 60.0;
pub const TOO_BRIGHT_LUMA: f32 = 240.0;
pub const FRAME_MARGIN: f32 = 0.02;
pub const MIN_BODY_HEIGHT: f32 = 0.35;
pub const MAX_BODY_HEIGHT: f32 = 0.95;
pub const DEFAULT_CHECK_INTERVAL: u64 = 30;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum NoticeKind {
    TooDark,
    TooBright,
    BodyNotVisible,
    HeadOutOfFrame,
    FeetOutOfFrame,
    TooFar,
    TooClose,
}

impl NoticeKind {
    pub fn message(&self) -> &'static str {
        match self {
            NoticeKind::TooDark => "Too dark, add more light",
            NoticeKind::TooBright => "Too bright, avoid backlight",
            NoticeKind::BodyNotVisible => "Cannot see you",
            NoticeKind::HeadOutOfFrame => "Head out of frame",
            NoticeKind::FeetOutOfFrame => "Feet out of frame",
            NoticeKind::TooFar => "Step closer",
            NoticeKind::TooClose => "Step back a little",
        }
    }
}

/// A setup problem seen by one camera.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub view: View,
    pub kind: NoticeKind,
}

impl Notice {
    pub fn message(&self) -> &'static str {
        self.kind.message()
    }
}

pub fn check_brightness(frame: &Frame) -> Option<NoticeKind> {
    let luma = frame.mean_luma();
    if luma < TOO_DARK_LUMA {
        Some(NoticeKind::TooDark)
    } else if luma > TOO_BRIGHT_LUMA {
        Some(NoticeKind::TooBright)
    } else {
        None
    }
}

/// Whole body in frame and at a usable distance, judged from nose and left foot.
pub fn check_framing(landmarks: Option<&LandmarkSet>) -> Option<NoticeKind> {
    let landmarks = match landmarks {
        Some(landmarks) => landmarks,
        None => return Some(NoticeKind::BodyNotVisible),
    };
    let (Some(nose), Some(foot)) = (
        landmarks.get(index::NOSE),
        landmarks.get(index::LEFT_FOOT_INDEX),
    ) else {
        return Some(NoticeKind::BodyNotVisible);
    };

    let inside = |v: f32| v > FRAME_MARGIN && v < 1.0 - FRAME_MARGIN;
    if !(inside(nose.x) && inside(nose.y)) {
        return Some(NoticeKind::HeadOutOfFrame);
    }
    if !(inside(foot.x) && inside(foot.y)) {
        return Some(NoticeKind::FeetOutOfFrame);
    }

    let height = foot.y - nose.y;
    if height < MIN_BODY_HEIGHT {
        Some(NoticeKind::TooFar)
    } else if height > MAX_BODY_HEIGHT {
        Some(NoticeKind::TooClose)
    } else {
        None
    }
}

/// Cached environment state for both cameras.
#[derive(Debug)]
pub struct EnvironmentMonitor {
    interval: u64,
    ticks: u64,
    lighting: Option<Option<NoticeKind>>,
    front_framing: Option<Option<NoticeKind>>,
    side_framing: Option<Option<NoticeKind>>,
}

impl EnvironmentMonitor {
    pub fn new(interval: u64) -> Self {
        Self {
            interval: interval.max(1),
            ticks: 0,
            lighting: None,
            front_framing: None,
            side_framing: None,
        }
    }

    /// Advance one tick and return the current notices.
    ///
    /// A check re-runs on every `interval`-th tick, or on any tick until it has produced a
    /// first result. Checks whose input is missing keep their cached result.
    pub fn observe(
        &mut self,
        front_frame: Option<&Frame>,
        front: Option<&LandmarkSet>,
        side_frame: Option<&Frame>,
        side: Option<&LandmarkSet>,
    ) -> Vec<Notice> {
        self.ticks += 1;
        let due = self.ticks % self.interval == 0;

        if let Some(frame) = front_frame {
            if due || self.lighting.is_none() {
                self.lighting = Some(check_brightness(frame));
            }
            if due || self.front_framing.is_none() {
                self.front_framing = Some(check_framing(front));
            }
        }
        if side_frame.is_some() && (due || self.side_framing.is_none()) {
            self.side_framing = Some(check_framing(side));
        }

        self.notices()
    }

    pub fn notices(&self) -> Vec<Notice> {
        let front = [self.lighting, self.front_framing]
            .into_iter()
            .flatten()
            .flatten()
            .map(|kind| Notice {
                view: View::Front,
                kind,
            });
        let side = self.side_framing.flatten().map(|kind| Notice {
            view: View::Side,
            kind,
        });
        front.chain(side).collect()
    }
}

impl Default for EnvironmentMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_CHECK_INTERVAL)
    }
}
