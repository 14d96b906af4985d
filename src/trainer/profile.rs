use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Knee angle above which the athlete counts as standing, shared by every level.
pub const UP_ANGLE: f32 = 160.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }

    pub fn profile(&self) -> DifficultyProfile {
        DifficultyProfile::for_difficulty(*self)
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(anyhow!(
                "unknown difficulty '{}'; expected easy, medium or hard",
                other
            )),
        }
    }
}

/// Thresholds used to count reps and judge form.
///
/// Built once per session and never mutated. Angles are in degrees; `valgus_limit` is a
/// normalized horizontal knee offset.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct DifficultyProfile {
    down_angle: f32,
    up_angle: f32,
    torso_limit: f32,
    shin_limit: f32,
    valgus_limit: f32,
}

impl DifficultyProfile {
    pub fn new(
        down_angle: f32,
        up_angle: f32,
        torso_limit: f32,
        shin_limit: f32,
        valgus_limit: f32,
    ) -> Result<Self> {
        if down_angle >= up_angle {
            return Err(anyhow!(
                "down angle ({}) must be below up angle ({})",
                down_angle,
                up_angle
            ));
        }
        if !(0.0..=180.0).contains(&down_angle) || !(0.0..=180.0).contains(&up_angle) {
            return Err(anyhow!("rep angles must lie within 0..=180 degrees"));
        }
        if torso_limit <= 0.0 || shin_limit <= 0.0 || valgus_limit <= 0.0 {
            return Err(anyhow!("form limits must be positive"));
        }
        Ok(Self {
            down_angle,
            up_angle,
            torso_limit,
            shin_limit,
            valgus_limit,
        })
    }

    pub fn for_difficulty(difficulty: Difficulty) -> Self {
        let (down_angle, torso_limit, shin_limit, valgus_limit) = match difficulty {
            Difficulty::Easy => (105.0, 30.0, 40.0, 0.05),
            Difficulty::Medium => (95.0, 20.0, 30.0, 0.03),
            Difficulty::Hard => (85.0, 15.0, 25.0, 0.02),
        };
        Self {
            down_angle,
            up_angle: UP_ANGLE,
            torso_limit,
            shin_limit,
            valgus_limit,
        }
    }

    pub fn down_angle(&self) -> f32 {
        self.down_angle
    }

    pub fn up_angle(&self) -> f32 {
        self.up_angle
    }

    pub fn torso_limit(&self) -> f32 {
        self.torso_limit
    }

    pub fn shin_limit(&self) -> f32 {
        self.shin_limit
    }

    pub fn valgus_limit(&self) -> f32 {
        self.valgus_limit
    }
}

impl Default for DifficultyProfile {
    fn default() -> Self {
        Self::for_difficulty(Difficulty::Medium)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hard_is_strictest_on_every_limit() {
        let easy = Difficulty::Easy.profile();
        let medium = Difficulty::Medium.profile();
        let hard = Difficulty::Hard.profile();

        for (lo, hi) in [(hard, medium), (medium, easy)] {
            assert!(lo.down_angle() <= hi.down_angle());
            assert!(lo.torso_limit() <= hi.torso_limit());
            assert!(lo.shin_limit() <= hi.shin_limit());
            assert!(lo.valgus_limit() <= hi.valgus_limit());
        }
        assert_eq!(easy.up_angle(), hard.up_angle());
    }

    #[test]
    fn profile_rejects_inverted_angles() {
        assert!(DifficultyProfile::new(160.0, 95.0, 20.0, 30.0, 0.03).is_err());
        assert!(DifficultyProfile::new(160.0, 160.0, 20.0, 30.0, 0.03).is_err());
        assert!(DifficultyProfile::new(95.0, 160.0, 20.0, 30.0, 0.03).is_ok());
    }

    #[test]
    fn difficulty_parses_case_insensitively() -> Result<()> {
        assert_eq!(" HARD ".parse::<Difficulty>()?, Difficulty::Hard);
        assert_eq!("Easy".parse::<Difficulty>()?, Difficulty::Easy);
        assert!("brutal".parse::<Difficulty>().is_err());
        Ok(())
    }
}
