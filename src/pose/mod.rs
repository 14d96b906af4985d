//! Body landmarks and pose estimation backends.
//!
//! The pose model itself is external. This module fixes the contract it must meet: one
//! ordered set of 33 normalized landmarks per frame (BlazePose topology), or nothing.

mod backends;
mod estimator;

pub use backends::{lunge_pose, ScriptedEstimator, StubEstimator};
#[cfg(feature = "backend-tract")]
pub use backends::TractEstimator;
pub use estimator::PoseEstimator;

use serde::{Deserialize, Serialize};

/// Number of landmarks in a complete body.
pub const LANDMARK_COUNT: usize = 33;

/// BlazePose landmark indices used by the lunge analysis.
pub mod index {
    pub const NOSE: usize = 0;
    pub const LEFT_SHOULDER: usize = 11;
    pub const RIGHT_SHOULDER: usize = 12;
    pub const LEFT_HIP: usize = 23;
    pub const RIGHT_HIP: usize = 24;
    pub const LEFT_KNEE: usize = 25;
    pub const RIGHT_KNEE: usize = 26;
    pub const LEFT_ANKLE: usize = 27;
    pub const RIGHT_ANKLE: usize = 28;
    pub const LEFT_FOOT_INDEX: usize = 31;
    pub const RIGHT_FOOT_INDEX: usize = 32;
}

/// One tracked joint. Coordinates are normalized to the frame, `y` grows downwards.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub index: usize,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub fn new(index: usize, x: f32, y: f32, z: f32) -> Self {
        Self { index, x, y, z }
    }
}

/// Ordered landmarks of one detected body.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSet {
    points: Vec<Landmark>,
}

impl LandmarkSet {
    pub fn new(points: Vec<Landmark>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// True when every landmark of the body is present.
    pub fn is_complete(&self) -> bool {
        self.points.len() >= LANDMARK_COUNT
    }

    pub fn get(&self, index: usize) -> Option<&Landmark> {
        self.points.get(index)
    }

    pub fn points(&self) -> &[Landmark] {
        &self.points
    }

    pub fn iter(&self) -> impl Iterator<Item = &Landmark> {
        self.points.iter()
    }
}

/// Camera placement relative to the athlete.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum View {
    Front,
    Side,
}

impl View {
    pub fn as_str(&self) -> &'static str {
        match self {
            View::Front => "FRONT",
            View::Side => "SIDE",
        }
    }
}

/// Body side whose leg is analysed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[default]
    Left,
    Right,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }

    pub fn shoulder(&self) -> usize {
        match self {
            Side::Left => index::LEFT_SHOULDER,
            Side::Right => index::RIGHT_SHOULDER,
        }
    }

    pub fn hip(&self) -> usize {
        match self {
            Side::Left => index::LEFT_HIP,
            Side::Right => index::RIGHT_HIP,
        }
    }

    pub fn knee(&self) -> usize {
        match self {
            Side::Left => index::LEFT_KNEE,
            Side::Right => index::RIGHT_KNEE,
        }
    }

    pub fn ankle(&self) -> usize {
        match self {
            Side::Left => index::LEFT_ANKLE,
            Side::Right => index::RIGHT_ANKLE,
        }
    }

    pub fn foot_index(&self) -> usize {
        match self {
            Side::Left => index::LEFT_FOOT_INDEX,
            Side::Right => index::RIGHT_FOOT_INDEX,
        }
    }
}

impl std::str::FromStr for Side {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(Side::Left),
            "right" => Ok(Side::Right),
            other => Err(anyhow::anyhow!("unknown body side '{}'", other)),
        }
    }
}
